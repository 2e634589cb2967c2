use super::error::Error;
use super::ir::{BlockId, Function, Module, Op, Terminator, Type, Value};

/// Structural and type checks on a generated function. Calls are checked
/// against the functions declared in `module`.
pub(crate) fn verify_function(module: &Module, f: &Function) -> Result<(), Error> {
    if f.is_declaration() {
        return Ok(());
    }
    let fail = |message: String| Err(Error::semantic(format!("invalid function '{}': {}", f.name, message)));

    let nblocks = f.blocks.len();
    let mut def_site: Vec<Option<(BlockId, usize)>> = vec![None; f.regs.len()];

    for (id, block) in f.blocks.iter().enumerate() {
        let term = match &block.terminator {
            Some(term) => term,
            None => return fail(format!("block '{}' has no terminator", block.name)),
        };
        if let Some(bad) = term.successors().into_iter().find(|s| *s >= nblocks) {
            return fail(format!("branch to missing block {}", bad));
        }

        let mut seen_non_phi = false;
        for (index, instr) in block.instrs.iter().enumerate() {
            if instr.op.is_phi() {
                if seen_non_phi {
                    return fail(format!("phi node not at start of block '{}'", block.name));
                }
            } else {
                seen_non_phi = true;
            }
            let site = match def_site.get_mut(instr.dest) {
                Some(site) => site,
                None => return fail(format!("register {} out of range", instr.dest)),
            };
            if site.is_some() {
                return fail(format!("register {} defined twice", instr.dest));
            }
            *site = Some((id, index));
        }
    }

    let doms = dominators(f);
    let preds = f.predecessors();
    let dominates = |def: BlockId, user: BlockId| doms[user].contains(&def);

    // Whether `value` is available at instruction `index` of block `at`.
    let available = |value: Value, at: BlockId, index: usize| -> bool {
        match value {
            Value::Reg(r) => match def_site.get(r).copied().flatten() {
                Some((b, i)) if b == at => i < index,
                Some((b, _)) => dominates(b, at),
                None => false,
            },
            _ => true,
        }
    };

    let expect_type = |value: Value, ty: Type, what: &str| -> Result<(), Error> {
        match f.value_type(value) {
            Some(actual) if actual == ty => Ok(()),
            Some(actual) => fail(format!("{} has type {}, expected {}", what, actual, ty)),
            None => fail(format!("{} refers to an unknown value", what)),
        }
    };

    for (id, block) in f.blocks.iter().enumerate() {
        for (index, instr) in block.instrs.iter().enumerate() {
            let dest_ty = f.regs[instr.dest].ty;
            match &instr.op {
                Op::Binary(_, l, r) => {
                    expect_type(*l, Type::Double, "arithmetic operand")?;
                    expect_type(*r, Type::Double, "arithmetic operand")?;
                }
                Op::FCmp(_, l, r) => {
                    expect_type(*l, Type::Double, "comparison operand")?;
                    expect_type(*r, Type::Double, "comparison operand")?;
                }
                Op::UIToFP(v) => expect_type(*v, Type::I1, "uitofp operand")?,
                Op::Call(callee, args) => {
                    let target = match module.get_function(callee) {
                        Some(target) => target,
                        None => return fail(format!("call to undeclared function '{}'", callee)),
                    };
                    if target.arity() != args.len() {
                        return fail(format!(
                            "call to '{}' passes {} arguments, expected {}",
                            callee,
                            args.len(),
                            target.arity()
                        ));
                    }
                    for arg in args {
                        expect_type(*arg, Type::Double, "call argument")?;
                    }
                }
                Op::Phi(incoming) => {
                    let mut sources: Vec<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
                    sources.sort();
                    let mut expected = preds[id].clone();
                    expected.sort();
                    if sources != expected {
                        return fail(format!(
                            "phi in block '{}' does not match its predecessors",
                            block.name
                        ));
                    }
                    for (value, from) in incoming {
                        expect_type(*value, dest_ty, "phi incoming value")?;
                        let end = f.blocks[*from].instrs.len();
                        if !available(*value, *from, end) {
                            return fail(format!("phi incoming value from block {} is not available", from));
                        }
                    }
                    continue;
                }
            }
            for operand in instr.op.operands() {
                if !available(operand, id, index) {
                    return fail(format!("operand of '{}' used before definition", f.regs[instr.dest].name));
                }
            }
        }

        let operand = match &block.terminator {
            Some(Terminator::CondBr(cond, ..)) => {
                expect_type(*cond, Type::I1, "branch condition")?;
                Some(*cond)
            }
            Some(Terminator::Ret(v)) => {
                expect_type(*v, Type::Double, "return value")?;
                Some(*v)
            }
            _ => None,
        };
        if let Some(v) = operand {
            if !available(v, id, block.instrs.len()) {
                return fail(format!("terminator of block '{}' uses an undefined value", block.name));
            }
        }
    }

    Ok(())
}

/// Dominator sets by iterative dataflow. Unreachable blocks are dominated by
/// every block, which keeps checks on them vacuous.
fn dominators(f: &Function) -> Vec<Vec<BlockId>> {
    let n = f.blocks.len();
    let preds = f.predecessors();
    let all: Vec<BlockId> = (0..n).collect();
    let mut doms: Vec<Vec<BlockId>> = vec![all; n];
    doms[0] = vec![0];

    let mut changed = true;
    while changed {
        changed = false;
        for b in 1..n {
            let mut new: Vec<BlockId> = match preds[b].first() {
                Some(first) => doms[*first].clone(),
                None => continue,
            };
            for p in &preds[b][1..] {
                new.retain(|d| doms[*p].contains(d));
            }
            if !new.contains(&b) {
                new.push(b);
                new.sort();
            }
            if new != doms[b] {
                doms[b] = new;
                changed = true;
            }
        }
    }
    doms
}
