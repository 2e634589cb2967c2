use super::error::Error;
use super::ir::{BlockId, Function, Module, Op, RegId, Terminator, Value};
use std::io::Write;

/// Deepest call chain the interpreter will follow before giving up.
const MAX_CALL_DEPTH: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ModuleHandle(usize);

/// Something `find_symbol` resolved and `invoke` can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    Compiled { module: ModuleHandle, index: usize },
    Builtin(Builtin),
}

/// Compiles modules and runs their functions. Symbols are resolved by name
/// across every module currently added. Anything the running code prints
/// goes to `out`.
pub(crate) trait ExecutionEngine {
    fn add_module(&mut self, module: Module) -> ModuleHandle;
    fn find_symbol(&self, name: &str) -> Option<Symbol>;
    fn invoke(&self, symbol: &Symbol, args: &[f64], out: &mut dyn Write) -> Result<f64, Error>;
    fn remove_module(&mut self, handle: ModuleHandle);
}

/// Host functions available to `import` declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Sin,
    Cos,
    Tan,
    Atan,
    Sqrt,
    Exp,
    Log,
    Fabs,
    Floor,
    Ceil,
    Pow,
    Putchard,
    Printd,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "sin" => Builtin::Sin,
            "cos" => Builtin::Cos,
            "tan" => Builtin::Tan,
            "atan" => Builtin::Atan,
            "sqrt" => Builtin::Sqrt,
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "fabs" => Builtin::Fabs,
            "floor" => Builtin::Floor,
            "ceil" => Builtin::Ceil,
            "pow" => Builtin::Pow,
            "putchard" => Builtin::Putchard,
            "printd" => Builtin::Printd,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Pow => 2,
            _ => 1,
        }
    }

    fn call(self, args: &[f64], out: &mut dyn Write) -> Result<f64, Error> {
        if args.len() != self.arity() {
            return Err(Error::execution(format!(
                "builtin {:?} takes {} arguments, got {}",
                self,
                self.arity(),
                args.len()
            )));
        }
        let x = args[0];
        let result = match self {
            Builtin::Sin => x.sin(),
            Builtin::Cos => x.cos(),
            Builtin::Tan => x.tan(),
            Builtin::Atan => x.atan(),
            Builtin::Sqrt => x.sqrt(),
            Builtin::Exp => x.exp(),
            Builtin::Log => x.ln(),
            Builtin::Fabs => x.abs(),
            Builtin::Floor => x.floor(),
            Builtin::Ceil => x.ceil(),
            Builtin::Pow => x.powf(args[1]),
            Builtin::Putchard => {
                if let Some(c) = std::char::from_u32(x as u32) {
                    write!(out, "{}", c)?;
                }
                0.0
            }
            Builtin::Printd => {
                writeln!(out, "{:.6}", x)?;
                0.0
            }
        };
        Ok(result)
    }
}

/// Runs IR directly. Each added module is kept as is; a call is resolved at
/// the moment it executes, against the newest module defining the callee and
/// then the builtins.
pub(crate) struct Jit {
    modules: Vec<(ModuleHandle, Module)>,
    next_handle: usize,
}

enum Target<'m> {
    Compiled(&'m Function),
    Builtin(Builtin),
}

struct Frame<'m> {
    function: &'m Function,
    args: Vec<f64>,
    regs: Vec<f64>,
    block: BlockId,
    ip: usize,
    pending: Option<RegId>,
}

enum Step<'m> {
    Continue,
    Call(&'m Function, Vec<f64>),
    Return(f64),
}

impl<'m> Frame<'m> {
    fn new(function: &'m Function, args: Vec<f64>) -> Self {
        Frame {
            function,
            args,
            regs: vec![0.0; function.regs.len()],
            block: 0,
            ip: 0,
            pending: None,
        }
    }

    fn value(&self, value: Value) -> f64 {
        match value {
            Value::Const(n) => n,
            Value::Bool(b) => bool_to_f64(b),
            Value::Param(i) => self.args[i],
            Value::Reg(r) => self.regs[r],
        }
    }

    /// Moves to `target`, resolving its leading phis against the block we
    /// came from.
    fn enter(&mut self, target: BlockId) -> Result<(), Error> {
        let function = self.function;
        let from = self.block;
        let block = function
            .blocks
            .get(target)
            .ok_or_else(|| Error::execution(format!("branch to missing block {}", target)))?;

        let mut values = Vec::new();
        for instr in block.instrs.iter().take_while(|i| i.op.is_phi()) {
            if let Op::Phi(incoming) = &instr.op {
                let value = incoming
                    .iter()
                    .find(|(_, b)| *b == from)
                    .map(|(v, _)| self.value(*v))
                    .ok_or_else(|| {
                        Error::execution(format!("phi in '{}' has no edge from block {}", block.name, from))
                    })?;
                values.push((instr.dest, value));
            }
        }

        self.block = target;
        self.ip = values.len();
        for (dest, value) in values {
            self.regs[dest] = value;
        }
        Ok(())
    }

    fn complete_call(&mut self, value: f64) {
        if let Some(dest) = self.pending.take() {
            self.regs[dest] = value;
        }
        self.ip += 1;
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Jit {
    pub fn new() -> Self {
        Jit {
            modules: Vec::new(),
            next_handle: 0,
        }
    }

    #[cfg(test)]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    fn resolve(&self, name: &str) -> Option<Target<'_>> {
        self.modules
            .iter()
            .rev()
            .filter_map(|(_, m)| m.get_function(name))
            .find(|f| !f.is_declaration())
            .map(Target::Compiled)
            .or_else(|| Builtin::lookup(name).map(Target::Builtin))
    }

    fn step<'m>(
        &'m self,
        frame: &mut Frame<'m>,
        out: &mut dyn Write,
    ) -> Result<Step<'m>, Error> {
        let function = frame.function;
        let block = &function.blocks[frame.block];

        if let Some(instr) = block.instrs.get(frame.ip) {
            let result = match &instr.op {
                Op::Binary(op, l, r) => op.apply(frame.value(*l), frame.value(*r)),
                Op::FCmp(pred, l, r) => bool_to_f64(pred.evaluate(frame.value(*l), frame.value(*r))),
                Op::UIToFP(v) => frame.value(*v),
                // Already assigned on block entry.
                Op::Phi(_) => frame.regs[instr.dest],
                Op::Call(callee, args) => {
                    let args: Vec<f64> = args.iter().map(|a| frame.value(*a)).collect();
                    match self.resolve(callee) {
                        Some(Target::Compiled(f)) => {
                            if f.arity() != args.len() {
                                return Err(Error::execution(format!(
                                    "'{}' expects {} arguments, got {}",
                                    callee,
                                    f.arity(),
                                    args.len()
                                )));
                            }
                            frame.pending = Some(instr.dest);
                            return Ok(Step::Call(f, args));
                        }
                        Some(Target::Builtin(b)) => b.call(&args, out)?,
                        None => {
                            return Err(Error::execution(format!("unresolved symbol '{}'", callee)))
                        }
                    }
                }
            };
            frame.regs[instr.dest] = result;
            frame.ip += 1;
            return Ok(Step::Continue);
        }

        match &block.terminator {
            Some(Terminator::Br(dest)) => frame.enter(*dest)?,
            Some(Terminator::CondBr(cond, then, els)) => {
                let dest = if frame.value(*cond) != 0.0 { *then } else { *els };
                frame.enter(dest)?
            }
            Some(Terminator::Ret(v)) => return Ok(Step::Return(frame.value(*v))),
            None => {
                return Err(Error::execution(format!(
                    "fell off the end of block '{}' in '{}'",
                    block.name, function.name
                )))
            }
        }
        Ok(Step::Continue)
    }

    /// Interprets `function` with an explicit frame stack.
    fn run<'m>(
        &'m self,
        function: &'m Function,
        args: Vec<f64>,
        out: &mut dyn Write,
    ) -> Result<f64, Error> {
        let mut stack = vec![Frame::new(function, args)];
        loop {
            let depth = stack.len();
            let step = match stack.last_mut() {
                Some(frame) => self.step(frame, out)?,
                None => return Err(Error::execution("empty call stack")),
            };
            match step {
                Step::Continue => {}
                Step::Call(callee, args) => {
                    if depth >= MAX_CALL_DEPTH {
                        return Err(Error::execution(format!(
                            "call stack overflow calling '{}'",
                            callee.name
                        )));
                    }
                    stack.push(Frame::new(callee, args));
                }
                Step::Return(value) => {
                    stack.pop();
                    match stack.last_mut() {
                        Some(caller) => caller.complete_call(value),
                        None => return Ok(value),
                    }
                }
            }
        }
    }
}

impl ExecutionEngine for Jit {
    fn add_module(&mut self, module: Module) -> ModuleHandle {
        let handle = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        self.modules.push((handle, module));
        handle
    }

    fn find_symbol(&self, name: &str) -> Option<Symbol> {
        for (handle, module) in self.modules.iter().rev() {
            let found = module
                .functions()
                .iter()
                .position(|f| f.name == name && !f.is_declaration());
            if let Some(index) = found {
                return Some(Symbol::Compiled {
                    module: *handle,
                    index,
                });
            }
        }
        Builtin::lookup(name).map(Symbol::Builtin)
    }

    fn invoke(&self, symbol: &Symbol, args: &[f64], out: &mut dyn Write) -> Result<f64, Error> {
        match *symbol {
            Symbol::Builtin(b) => b.call(args, out),
            Symbol::Compiled { module, index } => {
                let function = self
                    .modules
                    .iter()
                    .find(|(h, _)| *h == module)
                    .and_then(|(_, m)| m.functions().get(index))
                    .ok_or_else(|| Error::execution("symbol refers to a removed module"))?;
                if function.arity() != args.len() {
                    return Err(Error::execution(format!(
                        "'{}' expects {} arguments, got {}",
                        function.name,
                        function.arity(),
                        args.len()
                    )));
                }
                self.run(function, args.to_vec(), out)
            }
        }
    }

    fn remove_module(&mut self, handle: ModuleHandle) {
        self.modules.retain(|(h, _)| *h != handle);
    }
}
