use super::ir::{BlockId, Function, Op, RegId, Terminator, Value};
use std::collections::HashMap;
use std::mem;

/// Upper bound on pipeline rounds per function.
const MAX_ROUNDS: usize = 16;

/// A transformation over one function. Passes must never change what the
/// function computes.
pub(crate) trait FunctionPass {
    fn name(&self) -> &'static str;

    /// Returns `true` if the function was changed.
    fn run_on_function(&self, f: &mut Function) -> bool;
}

/// Runs its passes in order, repeating until none of them changes anything.
pub(crate) struct PassManager {
    passes: Vec<Box<dyn FunctionPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager { passes: Vec::new() }
    }

    pub fn with_default_passes() -> Self {
        let mut fpm = PassManager::new();
        fpm.add(Box::new(ConstantFolding));
        fpm.add(Box::new(BranchFolding));
        fpm.add(Box::new(UnreachableBlockElim));
        fpm.add(Box::new(PhiElim));
        fpm.add(Box::new(DeadCodeElim));
        fpm
    }

    pub fn add(&mut self, pass: Box<dyn FunctionPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run_on_function(&self, f: &mut Function) -> bool {
        if f.is_declaration() {
            return false;
        }
        let mut changed = false;
        for _ in 0..MAX_ROUNDS {
            let mut round = false;
            for pass in &self.passes {
                round |= pass.run_on_function(f);
            }
            if !round {
                break;
            }
            changed = true;
        }
        changed
    }
}

fn resolve(replacements: &HashMap<RegId, Value>, mut value: Value) -> Value {
    while let Value::Reg(r) = value {
        match replacements.get(&r) {
            Some(v) if *v != value => value = *v,
            _ => break,
        }
    }
    value
}

fn replace_uses(f: &mut Function, replacements: &HashMap<RegId, Value>) {
    for block in &mut f.blocks {
        for instr in &mut block.instrs {
            for operand in instr.op.operands_mut() {
                *operand = resolve(replacements, *operand);
            }
        }
        if let Some(operand) = block.terminator.as_mut().and_then(Terminator::operand_mut) {
            *operand = resolve(replacements, *operand);
        }
    }
}

/// Deletes every instruction `simplify` can express as an existing value and
/// rewrites its uses.
fn simplify_instrs<F>(f: &mut Function, mut simplify: F) -> bool
where
    F: FnMut(RegId, &Op) -> Option<Value>,
{
    let mut replacements = HashMap::new();
    for block in &mut f.blocks {
        block.instrs.retain(|instr| match simplify(instr.dest, &instr.op) {
            Some(value) => {
                replacements.insert(instr.dest, value);
                false
            }
            None => true,
        });
    }
    if replacements.is_empty() {
        return false;
    }
    replace_uses(f, &replacements);
    true
}

pub(crate) struct ConstantFolding;

impl FunctionPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constfold"
    }

    fn run_on_function(&self, f: &mut Function) -> bool {
        simplify_instrs(f, |_, op| match op {
            Op::Binary(op, Value::Const(l), Value::Const(r)) => Some(Value::Const(op.apply(*l, *r))),
            Op::FCmp(pred, Value::Const(l), Value::Const(r)) => {
                Some(Value::Bool(pred.evaluate(*l, *r)))
            }
            Op::UIToFP(Value::Bool(b)) => Some(Value::Const(if *b { 1.0 } else { 0.0 })),
            _ => None,
        })
    }
}

/// Replaces phis whose incoming values are all the same.
pub(crate) struct PhiElim;

impl FunctionPass for PhiElim {
    fn name(&self) -> &'static str {
        "phielim"
    }

    fn run_on_function(&self, f: &mut Function) -> bool {
        simplify_instrs(f, |dest, op| match op {
            Op::Phi(incoming) => {
                let mut values = incoming
                    .iter()
                    .map(|(v, _)| *v)
                    .filter(|v| *v != Value::Reg(dest));
                let first = values.next()?;
                if values.all(|v| v == first) {
                    Some(first)
                } else {
                    None
                }
            }
            _ => None,
        })
    }
}

/// Turns branches on a constant condition into plain jumps.
pub(crate) struct BranchFolding;

impl FunctionPass for BranchFolding {
    fn name(&self) -> &'static str {
        "brfold"
    }

    fn run_on_function(&self, f: &mut Function) -> bool {
        let mut changed = false;
        for block in &mut f.blocks {
            if let Some(Terminator::CondBr(Value::Bool(cond), then, els)) = block.terminator {
                block.terminator = Some(Terminator::Br(if cond { then } else { els }));
                changed = true;
            }
        }
        changed
    }
}

/// Removes blocks that cannot be reached from the entry block, along with
/// phi edges coming from blocks that no longer branch to the phi's block.
pub(crate) struct UnreachableBlockElim;

impl FunctionPass for UnreachableBlockElim {
    fn name(&self) -> &'static str {
        "unreachable"
    }

    fn run_on_function(&self, f: &mut Function) -> bool {
        let n = f.blocks.len();
        let mut reachable = vec![false; n];
        let mut worklist = vec![0];
        while let Some(b) = worklist.pop() {
            if reachable[b] {
                continue;
            }
            reachable[b] = true;
            worklist.extend(f.blocks[b].successors());
        }

        let preds = f.predecessors();
        let mut changed = false;
        for (id, block) in f.blocks.iter_mut().enumerate() {
            for instr in &mut block.instrs {
                if let Op::Phi(incoming) = &mut instr.op {
                    let before = incoming.len();
                    incoming.retain(|(_, from)| reachable[*from] && preds[id].contains(from));
                    changed |= incoming.len() != before;
                }
            }
        }

        if reachable.iter().all(|r| *r) {
            return changed;
        }

        let mut remap: Vec<BlockId> = Vec::with_capacity(n);
        let mut next = 0;
        for r in &reachable {
            remap.push(next);
            if *r {
                next += 1;
            }
        }

        let blocks = mem::replace(&mut f.blocks, Vec::new());
        f.blocks = blocks
            .into_iter()
            .enumerate()
            .filter(|(id, _)| reachable[*id])
            .map(|(_, mut block)| {
                for instr in &mut block.instrs {
                    if let Op::Phi(incoming) = &mut instr.op {
                        for (_, from) in incoming.iter_mut() {
                            *from = remap[*from];
                        }
                    }
                }
                match &mut block.terminator {
                    Some(Terminator::Br(dest)) => *dest = remap[*dest],
                    Some(Terminator::CondBr(_, then, els)) => {
                        *then = remap[*then];
                        *els = remap[*els];
                    }
                    _ => {}
                }
                block
            })
            .collect();
        true
    }
}

/// Removes instructions without side effects whose result is never used.
pub(crate) struct DeadCodeElim;

impl FunctionPass for DeadCodeElim {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run_on_function(&self, f: &mut Function) -> bool {
        let mut used = vec![false; f.regs.len()];
        for block in &f.blocks {
            let operands = block
                .instrs
                .iter()
                .flat_map(|instr| instr.op.operands())
                .chain(block.terminator.as_ref().and_then(Terminator::operand));
            for operand in operands {
                if let Value::Reg(r) = operand {
                    used[r] = true;
                }
            }
        }

        let mut changed = false;
        for block in &mut f.blocks {
            let before = block.instrs.len();
            block
                .instrs
                .retain(|instr| used[instr.dest] || instr.op.has_side_effects());
            changed |= block.instrs.len() != before;
        }
        changed
    }
}
