use std::fmt;

/// Name of the synthetic function wrapping a top-level expression. It cannot
/// be written as an identifier, so it never clashes with user functions.
pub(crate) const ANON_FN_NAME: &str = "__anon_expr";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Variable(String),
    Binary(char, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// A function signature. Parameter names are not required to be unique.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prototype {
    pub name: String,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Function {
    pub proto: Prototype,
    pub body: Expr,
}

impl Prototype {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Prototype {
            name: name.into(),
            params,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl Function {
    /// Wraps a bare expression as a zero-argument anonymous function.
    pub fn anonymous(body: Expr) -> Self {
        Function {
            proto: Prototype::new(ANON_FN_NAME, vec![]),
            body,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.proto.name == ANON_FN_NAME
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op, rhs),
            Expr::Call(callee, args) => {
                write!(f, "{}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::If(cond, then, els) => write!(f, "(if {} then {} else {})", cond, then, els),
        }
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(" "))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "fn {} {}", self.proto, self.body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display() {
        let e = Expr::Binary(
            '+',
            Box::new(Expr::Number(1.0)),
            Box::new(Expr::Call(
                "f".to_owned(),
                vec![Expr::Variable("x".to_owned()), Expr::Number(2.5)],
            )),
        );
        assert_eq!(e.to_string(), "(1 + f(x, 2.5))");

        let func = Function {
            proto: Prototype::new("g", vec!["a".to_owned(), "b".to_owned()]),
            body: Expr::If(
                Box::new(Expr::Variable("a".to_owned())),
                Box::new(Expr::Number(1.0)),
                Box::new(Expr::Variable("b".to_owned())),
            ),
        };
        assert_eq!(func.to_string(), "fn g(a b) (if a then 1 else b)");
    }

    #[test]
    fn test_anonymous() {
        let func = Function::anonymous(Expr::Number(3.0));
        assert!(func.is_anonymous());
        assert_eq!(func.proto.arity(), 0);
    }
}
