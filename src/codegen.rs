use super::ast::{self, Expr, Prototype};
use super::error::Error;
use super::ir::{self, BinOp, FunctionBuilder, Module, RealPredicate, Value};
use super::passes::PassManager;
use super::verify::verify_function;
use std::collections::HashMap;

/// Name tables that outlive a single compilation unit.
pub(crate) struct SessionState {
    prototypes: HashMap<String, Prototype>,
    named_values: HashMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            prototypes: HashMap::new(),
            named_values: HashMap::new(),
        }
    }

    pub fn prototype(&self, name: &str) -> Option<&Prototype> {
        self.prototypes.get(name)
    }
}

/// Generates code for one compilation unit. Functions are built outside the
/// module and only added to it once they are complete and verified.
pub(crate) struct CodeGen<'a> {
    state: &'a mut SessionState,
    module: &'a mut Module,
}

impl<'a> CodeGen<'a> {
    pub fn new(state: &'a mut SessionState, module: &'a mut Module) -> Self {
        CodeGen { state, module }
    }

    /// Declares `proto` in the module unless a function of that name is
    /// already there.
    pub fn codegen_proto(&mut self, proto: &Prototype) -> Result<&ir::Function, Error> {
        match self.module.get_function(&proto.name) {
            Some(f) if f.arity() == proto.arity() => {}
            Some(f) if !f.is_declaration() => {
                return Err(Error::semantic(format!(
                    "function '{}' is already defined with {} arguments",
                    proto.name,
                    f.arity()
                )))
            }
            _ => {
                self.module
                    .add_function(ir::Function::declaration(&proto.name, &proto.params));
            }
        }
        self.module
            .get_function(&proto.name)
            .ok_or_else(|| Error::semantic(format!("failed to declare '{}'", proto.name)))
    }

    /// Declares an external function and records its prototype so later
    /// units can call it.
    pub fn codegen_extern(&mut self, proto: &Prototype) -> Result<&ir::Function, Error> {
        self.codegen_proto(proto)?;
        self.state
            .prototypes
            .insert(proto.name.clone(), proto.clone());
        self.codegen_proto(proto)
    }

    /// Resolves a callee: functions already in this module first, then the
    /// session's prototypes, declaring the callee here on demand.
    fn get_function(&mut self, name: &str) -> Result<&ir::Function, Error> {
        if self.module.get_function(name).is_some() {
            return self
                .module
                .get_function(name)
                .ok_or_else(|| Error::semantic(format!("unknown function referenced: '{}'", name)));
        }
        let proto = match self.state.prototype(name) {
            Some(proto) => proto.clone(),
            None => {
                return Err(Error::semantic(format!(
                    "unknown function referenced: '{}'",
                    name
                )))
            }
        };
        self.codegen_proto(&proto)
    }

    fn codegen_expr(&mut self, builder: &mut FunctionBuilder, e: &Expr) -> Result<Value, Error> {
        match e {
            Expr::Number(n) => Ok(Value::Const(*n)),
            Expr::Variable(name) => self
                .state
                .named_values
                .get(name)
                .copied()
                .ok_or_else(|| Error::semantic(format!("unknown variable name '{}'", name))),
            Expr::Binary(op, lhs, rhs) => {
                let l = self.codegen_expr(builder, lhs)?;
                let r = self.codegen_expr(builder, rhs)?;
                let (bin_op, name) = match op {
                    '+' => (BinOp::FAdd, "addtmp"),
                    '-' => (BinOp::FSub, "subtmp"),
                    '*' => (BinOp::FMul, "multmp"),
                    '/' => (BinOp::FDiv, "divtmp"),
                    '<' | '>' | '=' => {
                        let pred = match op {
                            '<' => RealPredicate::ULT,
                            '>' => RealPredicate::UGT,
                            _ => RealPredicate::UEQ,
                        };
                        let cmp = builder.build_fcmp(pred, l, r, "cmptmp");
                        return Ok(builder.build_ui_to_fp(cmp, "booltmp"));
                    }
                    _ => return Err(Error::semantic(format!("invalid binary operator '{}'", op))),
                };
                Ok(builder.build_binary(bin_op, l, r, name))
            }
            Expr::Call(callee, args) => {
                let arity = self.get_function(callee)?.arity();
                if arity != args.len() {
                    return Err(Error::semantic(format!(
                        "incorrect number of arguments passed to '{}': expected {}, found {}",
                        callee,
                        arity,
                        args.len()
                    )));
                }

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.codegen_expr(builder, arg)?);
                }
                Ok(builder.build_call(callee, values, "calltmp"))
            }
            Expr::If(cond, then, els) => {
                let cond = self.codegen_expr(builder, cond)?;
                let cond = builder.build_fcmp(RealPredicate::ONE, cond, Value::Const(0.0), "ifcond");

                let then_bb = builder.append_block("then");
                let else_bb = builder.append_block("else");
                let merge_bb = builder.append_block("ifcont");
                builder.build_cond_br(cond, then_bb, else_bb);

                builder.position_at_end(then_bb);
                let then_val = self.codegen_expr(builder, then)?;
                builder.build_br(merge_bb);
                // Codegen of 'then' can change the current block.
                let then_end = builder.insert_block();

                builder.position_at_end(else_bb);
                let else_val = self.codegen_expr(builder, els)?;
                builder.build_br(merge_bb);
                let else_end = builder.insert_block();

                builder.position_at_end(merge_bb);
                Ok(builder.build_phi(vec![(then_val, then_end), (else_val, else_end)], "iftmp"))
            }
        }
    }

    fn build_function(&mut self, func: &ast::Function) -> Result<ir::Function, Error> {
        let proto = &func.proto;
        let mut builder = FunctionBuilder::new(&proto.name, &proto.params);

        // Later duplicates of a parameter name shadow earlier ones.
        self.state.named_values.clear();
        for (i, param) in proto.params.iter().enumerate() {
            self.state.named_values.insert(param.clone(), Value::Param(i));
        }

        let body = self.codegen_expr(&mut builder, &func.body);
        self.state.named_values.clear();

        builder.build_ret(body?);
        let function = builder.finish();
        verify_function(self.module, &function)?;
        Ok(function)
    }

    /// Generates, verifies and optimizes `func`, then adds it to the module,
    /// replacing any earlier function of the same name. On failure the module
    /// and the prototype table are left as they were.
    pub fn codegen_func(
        &mut self,
        func: &ast::Function,
        fpm: &PassManager,
    ) -> Result<&ir::Function, Error> {
        let name = func.proto.name.clone();
        let previous_proto = if func.is_anonymous() {
            None
        } else {
            self.state
                .prototypes
                .insert(name.clone(), func.proto.clone())
        };
        let previous_fn = self.module.remove_function(&name);
        self.module
            .add_function(ir::Function::declaration(&name, &func.proto.params));

        match self.build_function(func) {
            Ok(mut function) => {
                fpm.run_on_function(&mut function);
                Ok(self.module.add_function(function))
            }
            Err(e) => {
                self.module.remove_function(&name);
                if let Some(f) = previous_fn {
                    self.module.add_function(f);
                }
                match previous_proto {
                    Some(proto) => {
                        self.state.prototypes.insert(name, proto);
                    }
                    None if !func.is_anonymous() => {
                        self.state.prototypes.remove(&name);
                    }
                    None => {}
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::ast::ANON_FN_NAME;
    use super::super::error::ErrorKind;
    use super::super::lexer::Scanner;
    use super::super::parser::Parser;
    use super::*;
    use std::io::Cursor;

    fn parse_fn(s: &str) -> ast::Function {
        let mut p = Parser::new(Scanner::new(Cursor::new(s)));
        p.advance().unwrap();
        p.parse_definition().unwrap()
    }

    fn parse_top(s: &str) -> ast::Function {
        let mut p = Parser::new(Scanner::new(Cursor::new(s)));
        p.advance().unwrap();
        p.parse_top_level_expr().unwrap()
    }

    fn semantic_message(e: Error) -> String {
        match e.kind() {
            ErrorKind::Semantic(message) => message.clone(),
            other => panic!("not a semantic error: {:?}", other),
        }
    }

    #[test]
    fn test_codegen_func() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let fpm = PassManager::new();
        let f = CodeGen::new(&mut state, &mut module)
            .codegen_func(&parse_fn("fn sq(x) x*x"), &fpm)
            .unwrap()
            .to_string();

        assert_eq!(
            f,
            "define double @sq(double %x) {\n\
             entry:\n  \
             %multmp = fmul double %x, %x\n  \
             ret double %multmp\n\
             }\n"
        );
        assert!(state.prototype("sq").is_some());
    }

    #[test]
    fn test_comparison_widens() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let f = CodeGen::new(&mut state, &mut module)
            .codegen_func(&parse_fn("fn lt(a b) a < b"), &PassManager::new())
            .unwrap()
            .to_string();
        assert!(f.contains("%cmptmp = fcmp ult double %a, %b"));
        assert!(f.contains("%booltmp = uitofp i1 %cmptmp to double"));
    }

    #[test]
    fn test_conditional_blocks() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let mut cg = CodeGen::new(&mut state, &mut module);
        let f = cg
            .codegen_func(&parse_fn("fn pick(c) if c then 10 else 20"), &PassManager::new())
            .unwrap();

        assert_eq!(f.blocks.len(), 4);
        assert!(f
            .to_string()
            .contains("%iftmp = phi double [ 10.0, %then ], [ 20.0, %else ]"));
    }

    #[test]
    fn test_unknown_variable() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let e = CodeGen::new(&mut state, &mut module)
            .codegen_func(&parse_fn("fn f(x) y"), &PassManager::new())
            .unwrap_err();
        assert_eq!(semantic_message(e), "unknown variable name 'y'");

        // Nothing of the failed definition survives.
        assert!(module.get_function("f").is_none());
        assert!(state.prototype("f").is_none());
    }

    #[test]
    fn test_unknown_function() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let e = CodeGen::new(&mut state, &mut module)
            .codegen_func(&parse_top("nope(1)"), &PassManager::new())
            .unwrap_err();
        assert_eq!(semantic_message(e), "unknown function referenced: 'nope'");
        assert!(module.get_function(ANON_FN_NAME).is_none());
    }

    #[test]
    fn test_argument_count() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let fpm = PassManager::new();
        let mut cg = CodeGen::new(&mut state, &mut module);
        cg.codegen_func(&parse_fn("fn sq(x) x*x"), &fpm).unwrap();
        let e = cg.codegen_func(&parse_top("sq(1, 2)"), &fpm).unwrap_err();
        assert_eq!(
            semantic_message(e),
            "incorrect number of arguments passed to 'sq': expected 1, found 2"
        );
    }

    #[test]
    fn test_invalid_operator() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let func = ast::Function::anonymous(Expr::Binary(
            '%',
            Box::new(Expr::Number(1.0)),
            Box::new(Expr::Number(2.0)),
        ));
        let e = CodeGen::new(&mut state, &mut module)
            .codegen_func(&func, &PassManager::new())
            .unwrap_err();
        assert_eq!(semantic_message(e), "invalid binary operator '%'");
    }

    #[test]
    fn test_duplicate_params_last_wins() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let mut cg = CodeGen::new(&mut state, &mut module);
        let f = cg
            .codegen_func(&parse_fn("fn f(a b a) a"), &PassManager::new())
            .unwrap();
        assert_eq!(f.arity(), 3);
        assert_eq!(
            f.blocks[0].terminator,
            Some(ir::Terminator::Ret(Value::Param(2)))
        );
    }

    #[test]
    fn test_prototype_declared_on_demand() {
        let mut state = SessionState::new();
        let mut persistent = Module::new("persistent");
        let fpm = PassManager::new();
        CodeGen::new(&mut state, &mut persistent)
            .codegen_func(&parse_fn("fn sq(x) x*x"), &fpm)
            .unwrap();

        let mut unit = Module::new("unit");
        CodeGen::new(&mut state, &mut unit)
            .codegen_func(&parse_top("sq(5)"), &fpm)
            .unwrap();
        let sq = unit.get_function("sq").unwrap();
        assert!(sq.is_declaration());
        assert_eq!(sq.arity(), 1);
    }

    #[test]
    fn test_recursive_definition() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let mut cg = CodeGen::new(&mut state, &mut module);
        let f = cg
            .codegen_func(
                &parse_fn("fn fib(n) if n < 2 then n else fib(n-1) + fib(n-2)"),
                &PassManager::with_default_passes(),
            )
            .unwrap();
        assert!(!f.is_declaration());
        assert_eq!(module.functions().len(), 1);
    }

    #[test]
    fn test_failed_redefinition_keeps_old() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let fpm = PassManager::new();
        let mut cg = CodeGen::new(&mut state, &mut module);
        cg.codegen_func(&parse_fn("fn f(x) x+1"), &fpm).unwrap();
        assert!(cg.codegen_func(&parse_fn("fn f(x y) z"), &fpm).is_err());

        let f = module.get_function("f").unwrap();
        assert!(!f.is_declaration());
        assert_eq!(f.arity(), 1);
        assert_eq!(state.prototype("f").map(Prototype::arity), Some(1));
    }

    #[test]
    fn test_extern() {
        let mut state = SessionState::new();
        let mut module = Module::new("test");
        let fpm = PassManager::new();
        let mut cg = CodeGen::new(&mut state, &mut module);
        let decl = cg
            .codegen_extern(&Prototype::new("foo", vec!["a".to_owned()]))
            .unwrap();
        assert_eq!(decl.to_string(), "declare double @foo(double %a)\n");

        cg.codegen_func(&parse_fn("fn bar(x) foo(x) + 1"), &fpm).unwrap();
        cg.codegen_func(&parse_fn("fn foo(a) a*2"), &fpm).unwrap();
        assert!(!module.get_function("foo").unwrap().is_declaration());

        let mut cg = CodeGen::new(&mut state, &mut module);
        let e = cg
            .codegen_extern(&Prototype::new("foo", vec![]))
            .unwrap_err();
        assert_eq!(
            semantic_message(e),
            "function 'foo' is already defined with 1 arguments"
        );
    }
}
