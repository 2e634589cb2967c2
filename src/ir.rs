//! A small SSA instruction set modelled on LLVM IR: every value is a `double`
//! except comparison results, which are `i1`.

use std::collections::HashSet;
use std::fmt;

pub(crate) type BlockId = usize;
pub(crate) type RegId = usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Const(f64),
    Bool(bool),
    Param(usize),
    Reg(RegId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Type {
    Double,
    I1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// Floating point comparison predicates. The `U` forms are true when either
/// operand is NaN, the `O` forms are false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RealPredicate {
    ULT,
    UGT,
    UEQ,
    ONE,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Op {
    Binary(BinOp, Value, Value),
    FCmp(RealPredicate, Value, Value),
    UIToFP(Value),
    Call(String, Vec<Value>),
    Phi(Vec<(Value, BlockId)>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Instr {
    pub dest: RegId,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Terminator {
    Br(BlockId),
    CondBr(Value, BlockId, BlockId),
    Ret(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BasicBlock {
    pub name: String,
    pub instrs: Vec<Instr>,
    pub terminator: Option<Terminator>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Register {
    pub name: String,
    pub ty: Type,
}

/// A function with no blocks is a declaration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub blocks: Vec<BasicBlock>,
    pub regs: Vec<Register>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Module {
    pub name: String,
    functions: Vec<Function>,
}

impl BinOp {
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::FAdd => lhs + rhs,
            BinOp::FSub => lhs - rhs,
            BinOp::FMul => lhs * rhs,
            BinOp::FDiv => lhs / rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
        }
    }
}

impl RealPredicate {
    pub fn evaluate(self, lhs: f64, rhs: f64) -> bool {
        let unordered = lhs.is_nan() || rhs.is_nan();
        match self {
            RealPredicate::ULT => unordered || lhs < rhs,
            RealPredicate::UGT => unordered || lhs > rhs,
            RealPredicate::UEQ => unordered || lhs == rhs,
            RealPredicate::ONE => !unordered && lhs != rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            RealPredicate::ULT => "ult",
            RealPredicate::UGT => "ugt",
            RealPredicate::UEQ => "ueq",
            RealPredicate::ONE => "one",
        }
    }
}

impl Op {
    pub fn is_phi(&self) -> bool {
        match self {
            Op::Phi(_) => true,
            _ => false,
        }
    }

    /// Instructions whose removal could change what a program does.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Op::Call(..) => true,
            _ => false,
        }
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            Op::Binary(_, l, r) | Op::FCmp(_, l, r) => vec![*l, *r],
            Op::UIToFP(v) => vec![*v],
            Op::Call(_, args) => args.clone(),
            Op::Phi(incoming) => incoming.iter().map(|(v, _)| *v).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Op::Binary(_, l, r) | Op::FCmp(_, l, r) => vec![l, r],
            Op::UIToFP(v) => vec![v],
            Op::Call(_, args) => args.iter_mut().collect(),
            Op::Phi(incoming) => incoming.iter_mut().map(|(v, _)| v).collect(),
        }
    }
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(dest) => vec![*dest],
            Terminator::CondBr(_, then, els) => vec![*then, *els],
            Terminator::Ret(_) => vec![],
        }
    }

    pub fn operand(&self) -> Option<Value> {
        match self {
            Terminator::Br(_) => None,
            Terminator::CondBr(v, ..) | Terminator::Ret(v) => Some(*v),
        }
    }

    pub fn operand_mut(&mut self) -> Option<&mut Value> {
        match self {
            Terminator::Br(_) => None,
            Terminator::CondBr(v, ..) | Terminator::Ret(v) => Some(v),
        }
    }
}

impl BasicBlock {
    fn new(name: String) -> Self {
        BasicBlock {
            name,
            instrs: Vec::new(),
            terminator: None,
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator
            .as_ref()
            .map(Terminator::successors)
            .unwrap_or_default()
    }
}

impl Function {
    pub fn declaration(name: &str, params: &[String]) -> Self {
        Function {
            name: name.to_owned(),
            params: unique_names(params),
            blocks: Vec::new(),
            regs: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `None` when the value refers to something that does not exist.
    pub fn value_type(&self, value: Value) -> Option<Type> {
        match value {
            Value::Const(_) => Some(Type::Double),
            Value::Bool(_) => Some(Type::I1),
            Value::Param(i) if i < self.params.len() => Some(Type::Double),
            Value::Param(_) => None,
            Value::Reg(r) => self.regs.get(r).map(|reg| reg.ty),
        }
    }

    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (id, block) in self.blocks.iter().enumerate() {
            for succ in block.successors() {
                if let Some(p) = preds.get_mut(succ) {
                    p.push(id);
                }
            }
        }
        preds
    }

    fn fmt_value(&self, value: Value) -> String {
        match value {
            Value::Const(n) => format!("{:?}", n),
            Value::Bool(b) => b.to_string(),
            Value::Param(i) => match self.params.get(i) {
                Some(name) => format!("%{}", name),
                None => format!("%arg{}", i),
            },
            Value::Reg(r) => match self.regs.get(r) {
                Some(reg) => format!("%{}", reg.name),
                None => format!("%{}", r),
            },
        }
    }

    fn fmt_typed(&self, value: Value) -> String {
        let ty = self.value_type(value).unwrap_or(Type::Double);
        format!("{} {}", ty, self.fmt_value(value))
    }

    fn fmt_block(&self, id: BlockId) -> String {
        match self.blocks.get(id) {
            Some(block) => format!("%{}", block.name),
            None => format!("%bb{}", id),
        }
    }

    fn fmt_instr(&self, instr: &Instr) -> String {
        let dest = self.fmt_value(Value::Reg(instr.dest));
        match &instr.op {
            Op::Binary(op, l, r) => format!(
                "{} = {} {}, {}",
                dest,
                op.mnemonic(),
                self.fmt_typed(*l),
                self.fmt_value(*r)
            ),
            Op::FCmp(pred, l, r) => format!(
                "{} = fcmp {} {}, {}",
                dest,
                pred.mnemonic(),
                self.fmt_typed(*l),
                self.fmt_value(*r)
            ),
            Op::UIToFP(v) => format!("{} = uitofp {} to double", dest, self.fmt_typed(*v)),
            Op::Call(callee, args) => {
                let args: Vec<String> = args.iter().map(|a| self.fmt_typed(*a)).collect();
                format!("{} = call double @{}({})", dest, callee, args.join(", "))
            }
            Op::Phi(incoming) => {
                let incoming: Vec<String> = incoming
                    .iter()
                    .map(|(v, b)| format!("[ {}, {} ]", self.fmt_value(*v), self.fmt_block(*b)))
                    .collect();
                format!("{} = phi double {}", dest, incoming.join(", "))
            }
        }
    }

    fn fmt_terminator(&self, term: &Terminator) -> String {
        match term {
            Terminator::Br(dest) => format!("br label {}", self.fmt_block(*dest)),
            Terminator::CondBr(cond, then, els) => format!(
                "br {}, label {}, label {}",
                self.fmt_typed(*cond),
                self.fmt_block(*then),
                self.fmt_block(*els)
            ),
            Terminator::Ret(v) => format!("ret {}", self.fmt_typed(*v)),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Double => write!(f, "double"),
            Type::I1 => write!(f, "i1"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| format!("double %{}", p)).collect();
        if self.is_declaration() {
            return writeln!(f, "declare double @{}({})", self.name, params.join(", "));
        }

        writeln!(f, "define double @{}({}) {{", self.name, params.join(", "))?;
        for (id, block) in self.blocks.iter().enumerate() {
            if id > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;
            for instr in &block.instrs {
                writeln!(f, "  {}", self.fmt_instr(instr))?;
            }
            match &block.terminator {
                Some(term) => writeln!(f, "  {}", self.fmt_terminator(term))?,
                None => writeln!(f, "  <no terminator>")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Adds `function`, replacing any function of the same name in place.
    pub fn add_function(&mut self, function: Function) -> &Function {
        let index = match self.functions.iter().position(|f| f.name == function.name) {
            Some(index) => {
                self.functions[index] = function;
                index
            }
            None => {
                self.functions.push(function);
                self.functions.len() - 1
            }
        };
        &self.functions[index]
    }

    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        let index = self.functions.iter().position(|f| f.name == name)?;
        Some(self.functions.remove(index))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}

fn unique_name(used: &mut HashSet<String>, base: &str) -> String {
    let mut name = base.to_owned();
    let mut n = 1;
    while used.contains(&name) {
        name = format!("{}{}", base, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

fn unique_names(names: &[String]) -> Vec<String> {
    let mut used = HashSet::new();
    names.iter().map(|n| unique_name(&mut used, n)).collect()
}

/// Emits instructions at the end of a current block, the way an LLVM
/// `IRBuilder` does. A new builder is positioned in an `entry` block.
pub(crate) struct FunctionBuilder {
    function: Function,
    block: BlockId,
    reg_names: HashSet<String>,
    block_names: HashSet<String>,
}

impl FunctionBuilder {
    pub fn new(name: &str, params: &[String]) -> Self {
        let function = Function::declaration(name, params);
        let reg_names = function.params.iter().cloned().collect();
        let mut builder = FunctionBuilder {
            function,
            block: 0,
            reg_names,
            block_names: HashSet::new(),
        };
        let entry = builder.append_block("entry");
        builder.position_at_end(entry);
        builder
    }

    pub fn append_block(&mut self, name: &str) -> BlockId {
        let name = unique_name(&mut self.block_names, name);
        self.function.blocks.push(BasicBlock::new(name));
        self.function.blocks.len() - 1
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = block;
    }

    pub fn insert_block(&self) -> BlockId {
        self.block
    }

    fn push(&mut self, op: Op, name: &str, ty: Type) -> Value {
        let dest = self.function.regs.len();
        self.function.regs.push(Register {
            name: unique_name(&mut self.reg_names, name),
            ty,
        });
        self.function.blocks[self.block]
            .instrs
            .push(Instr { dest, op });
        Value::Reg(dest)
    }

    fn terminate(&mut self, term: Terminator) {
        self.function.blocks[self.block].terminator = Some(term);
    }

    pub fn build_binary(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
        self.push(Op::Binary(op, lhs, rhs), name, Type::Double)
    }

    pub fn build_fcmp(&mut self, pred: RealPredicate, lhs: Value, rhs: Value, name: &str) -> Value {
        self.push(Op::FCmp(pred, lhs, rhs), name, Type::I1)
    }

    pub fn build_ui_to_fp(&mut self, value: Value, name: &str) -> Value {
        self.push(Op::UIToFP(value), name, Type::Double)
    }

    pub fn build_call(&mut self, callee: &str, args: Vec<Value>, name: &str) -> Value {
        self.push(Op::Call(callee.to_owned(), args), name, Type::Double)
    }

    pub fn build_phi(&mut self, incoming: Vec<(Value, BlockId)>, name: &str) -> Value {
        self.push(Op::Phi(incoming), name, Type::Double)
    }

    pub fn build_br(&mut self, dest: BlockId) {
        self.terminate(Terminator::Br(dest));
    }

    pub fn build_cond_br(&mut self, cond: Value, then: BlockId, els: BlockId) {
        self.terminate(Terminator::CondBr(cond, then, els));
    }

    pub fn build_ret(&mut self, value: Value) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn finish(self) -> Function {
        self.function
    }
}
