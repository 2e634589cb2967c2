use super::ast::{Expr, Function, Prototype};
use super::error::{Error, Position};
use super::lexer::Scanner;
use super::token::Token;
use std::io::BufRead;

/// Tallest expression tree accepted.
const MAX_EXPR_DEPTH: usize = 256;

/// Recursive-descent parser with one token of lookahead. Binary operators are
/// handled by precedence climbing.
///
/// A failed parse leaves the offending token as the lookahead; skipping it is
/// up to the caller.
pub(crate) struct Parser<R> {
    scanner: Scanner<R>,
    current: Token,
    position: Position,
    nesting: usize,
}

impl<R: BufRead> Parser<R> {
    /// The lookahead is empty until the first `advance`.
    pub fn new(scanner: Scanner<R>) -> Self {
        Parser {
            scanner,
            current: Token::Eof,
            position: Position::default(),
            nesting: 0,
        }
    }

    pub fn current(&self) -> &Token {
        &self.current
    }

    pub fn advance(&mut self) -> Result<(), Error> {
        let (token, position) = self.scanner.next_token()?;
        self.current = token;
        self.position = position;
        Ok(())
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, Error> {
        Err(Error::syntax(message, self.position))
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), Error> {
        if self.current != expected {
            return self.error(format!("expected {}, found {}", what, self.current));
        }
        self.advance()
    }

    fn ident(&mut self, what: &str) -> Result<String, Error> {
        match &self.current {
            Token::Ident(id) => {
                let id = id.clone();
                self.advance()?;
                Ok(id)
            }
            other => self.error(format!("expected {}, found {}", what, other)),
        }
    }

    /// Checks the height of a node about to be built.
    fn node_depth(&self, depth: usize) -> Result<usize, Error> {
        if depth > MAX_EXPR_DEPTH {
            return self.error("expression too deeply nested");
        }
        Ok(depth)
    }

    fn parse_primary(&mut self) -> Result<(Expr, usize), Error> {
        match self.current {
            Token::Ident(_) => self.parse_identifier_expr(),
            Token::Number(n) => {
                self.advance()?;
                Ok((Expr::Number(n), 1))
            }
            Token::Kwd('(') => self.parse_paren_expr(),
            Token::If => self.parse_conditional(),
            _ => self.error(format!(
                "unexpected {} when expecting an expression",
                self.current
            )),
        }
    }

    fn parse_identifier_expr(&mut self) -> Result<(Expr, usize), Error> {
        let name = self.ident("identifier")?;
        if self.current != Token::Kwd('(') {
            return Ok((Expr::Variable(name), 1));
        }
        self.advance()?;

        let mut args = Vec::new();
        let mut depth = 0;
        if self.current != Token::Kwd(')') {
            loop {
                let (arg, d) = self.parse_nested()?;
                args.push(arg);
                depth = depth.max(d);
                match self.current {
                    Token::Kwd(')') => break,
                    Token::Kwd(',') => self.advance()?,
                    _ => return self.error("expected ')' or ',' in argument list"),
                }
            }
        }
        self.advance()?;
        let depth = self.node_depth(depth + 1)?;
        Ok((Expr::Call(name, args), depth))
    }

    fn parse_paren_expr(&mut self) -> Result<(Expr, usize), Error> {
        self.advance()?;
        let e = self.parse_nested()?;
        self.expect(Token::Kwd(')'), "')'")?;
        Ok(e)
    }

    fn parse_conditional(&mut self) -> Result<(Expr, usize), Error> {
        self.advance()?;
        let (cond, c) = self.parse_nested()?;
        self.expect(Token::Then, "'then'")?;
        let (then, t) = self.parse_nested()?;
        self.expect(Token::Else, "'else'")?;
        let (els, e) = self.parse_nested()?;
        let depth = self.node_depth(c.max(t).max(e) + 1)?;
        Ok((Expr::If(Box::new(cond), Box::new(then), Box::new(els)), depth))
    }

    pub fn parse_expression(&mut self) -> Result<Expr, Error> {
        self.parse_nested().map(|(e, _)| e)
    }

    /// An expression together with the height of its tree. Both the tree
    /// height and the parser's own recursion are bounded by `MAX_EXPR_DEPTH`.
    fn parse_nested(&mut self) -> Result<(Expr, usize), Error> {
        if self.nesting >= MAX_EXPR_DEPTH {
            return self.error("expression too deeply nested");
        }
        self.nesting += 1;
        let result = self
            .parse_primary()
            .and_then(|lhs| self.parse_bin_op_rhs(0, lhs));
        self.nesting -= 1;
        result
    }

    fn current_operator(&self) -> Option<(char, u32)> {
        match (&self.current, self.current.precedence()) {
            (Token::Kwd(op), Some(prec)) => Some((*op, prec)),
            _ => None,
        }
    }

    fn parse_bin_op_rhs(
        &mut self,
        min_prec: u32,
        lhs: (Expr, usize),
    ) -> Result<(Expr, usize), Error> {
        let (mut lhs, mut depth) = lhs;
        loop {
            let (op, prec) = match self.current_operator() {
                Some((op, prec)) if prec >= min_prec => (op, prec),
                _ => return Ok((lhs, depth)),
            };
            self.advance()?;

            let mut rhs = self.parse_primary()?;
            if let Some((_, next_prec)) = self.current_operator() {
                if prec < next_prec {
                    rhs = self.parse_bin_op_rhs(prec + 1, rhs)?;
                }
            }

            depth = self.node_depth(depth.max(rhs.1) + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs.0));
        }
    }

    fn parse_prototype(&mut self) -> Result<Prototype, Error> {
        let name = self.ident("function name in prototype")?;
        if self.current != Token::Kwd('(') {
            return self.error("expected '(' in prototype");
        }
        self.advance()?;

        let mut params = Vec::new();
        while let Token::Ident(id) = &self.current {
            params.push(id.clone());
            self.advance()?;
        }

        if self.current != Token::Kwd(')') {
            return self.error("expected ')' in prototype");
        }
        self.advance()?;
        Ok(Prototype::new(name, params))
    }

    /// fn <prototype> <expression>
    pub fn parse_definition(&mut self) -> Result<Function, Error> {
        self.advance()?;
        let proto = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function { proto, body })
    }

    /// import <prototype>
    pub fn parse_import(&mut self) -> Result<Prototype, Error> {
        self.advance()?;
        self.parse_prototype()
    }

    pub fn parse_top_level_expr(&mut self) -> Result<Function, Error> {
        let body = self.parse_expression()?;
        Ok(Function::anonymous(body))
    }
}

#[cfg(test)]
mod test {
    use super::super::ast::ANON_FN_NAME;
    use super::super::error::ErrorKind;
    use super::*;
    use std::io::Cursor;

    fn parser(s: &str) -> Parser<Cursor<&str>> {
        let mut p = Parser::new(Scanner::new(Cursor::new(s)));
        p.advance().unwrap();
        p
    }

    fn expr(s: &str) -> Expr {
        parser(s).parse_expression().unwrap()
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    fn syntax_message(e: Error) -> String {
        match e.kind() {
            ErrorKind::Syntax { message, .. } => message.clone(),
            other => panic!("not a syntax error: {:?}", other),
        }
    }

    #[test]
    fn test_primary() {
        assert_eq!(expr("1.0"), Expr::Number(1.0));
        assert_eq!(expr("y"), Expr::Variable("y".to_owned()));
        assert_eq!(expr("(y)"), Expr::Variable("y".to_owned()));
    }

    #[test]
    fn test_expr() {
        assert_eq!(expr("1+2"), Expr::Binary('+', num(1.0), num(2.0)));

        assert_eq!(
            expr("1+2*3"),
            Expr::Binary('+', num(1.0), Box::new(Expr::Binary('*', num(2.0), num(3.0))))
        );

        assert_eq!(
            expr("(1+2)*3"),
            Expr::Binary('*', Box::new(Expr::Binary('+', num(1.0), num(2.0))), num(3.0))
        );
    }

    #[test]
    fn test_precedence() {
        assert_eq!(expr("10-2-3").to_string(), "((10 - 2) - 3)");
        assert_eq!(expr("2*3<10").to_string(), "((2 * 3) < 10)");
        assert_eq!(expr("1+2*3<4").to_string(), "((1 + (2 * 3)) < 4)");
        assert_eq!(expr("1*2+3").to_string(), "((1 * 2) + 3)");
        assert_eq!(expr("a=b+c/d-e").to_string(), "(a = ((b + (c / d)) - e))");
        assert_eq!(expr("8/4/2").to_string(), "((8 / 4) / 2)");
    }

    #[test]
    fn test_stops_at_non_operator() {
        let mut p = parser("1+2 ; 3");
        assert_eq!(p.parse_expression().unwrap().to_string(), "(1 + 2)");
        assert_eq!(p.current(), &Token::Kwd(';'));

        let mut p = parser("1.2.3");
        assert_eq!(p.parse_expression().unwrap(), Expr::Number(1.2));
        assert_eq!(p.current(), &Token::Kwd('.'));
    }

    #[test]
    fn test_call() {
        assert_eq!(
            expr("foo(y, 4.0)"),
            Expr::Call(
                "foo".to_owned(),
                vec![Expr::Variable("y".to_owned()), Expr::Number(4.0)]
            )
        );
        assert_eq!(expr("bar()"), Expr::Call("bar".to_owned(), vec![]));
        assert_eq!(expr("f(1+2)").to_string(), "f((1 + 2))");
    }

    #[test]
    fn test_bad_call() {
        let e = parser("foo(1,)").parse_expression().unwrap_err();
        assert!(syntax_message(e).starts_with("unexpected ')'"));

        let e = parser("foo(1 2)").parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expected ')' or ',' in argument list");

        let e = parser("foo(1").parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expected ')' or ',' in argument list");
    }

    #[test]
    fn test_conditional() {
        assert_eq!(
            expr("if 1 then 10 else 20"),
            Expr::If(num(1.0), num(10.0), num(20.0))
        );

        let e = parser("if 1 then 10").parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expected 'else', found end of input");

        let e = parser("if 1 10 else 20").parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expected 'then', found number 10");
    }

    #[test]
    fn test_unexpected_token() {
        let e = parser(")").parse_expression().unwrap_err();
        match e.kind() {
            ErrorKind::Syntax { message, position } => {
                assert_eq!(message, "unexpected ')' when expecting an expression");
                assert_eq!(*position, Position { line: 1, column: 1 });
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let sum = |terms: usize| format!("1{}", "+1".repeat(terms - 1));
        assert_eq!(expr(&sum(200)).to_string().matches('+').count(), 199);

        let e = parser(&sum(300)).parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expression too deeply nested");

        let parens = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let e = parser(&parens).parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expression too deeply nested");

        let calls = format!("{}x{}", "f(".repeat(300), ")".repeat(300));
        let e = parser(&calls).parse_expression().unwrap_err();
        assert_eq!(syntax_message(e), "expression too deeply nested");

        // The limit is per expression, not per session.
        let input = format!("{} ; {}", parens, sum(10));
        let mut p = parser(&input);
        assert!(p.parse_expression().is_err());
        while p.current() != &Token::Kwd(';') {
            p.advance().unwrap();
        }
        p.advance().unwrap();
        assert_eq!(p.parse_expression().unwrap().to_string().matches('+').count(), 9);
    }

    #[test]
    fn test_prototype() {
        assert_eq!(
            parser("f()").parse_prototype().unwrap(),
            Prototype::new("f", vec![])
        );
        assert_eq!(
            parser("f(a b a)").parse_prototype().unwrap(),
            Prototype::new("f", vec!["a".to_owned(), "b".to_owned(), "a".to_owned()])
        );

        let e = parser("(a)").parse_prototype().unwrap_err();
        assert_eq!(
            syntax_message(e),
            "expected function name in prototype, found '('"
        );
        let e = parser("f a").parse_prototype().unwrap_err();
        assert_eq!(syntax_message(e), "expected '(' in prototype");
        let e = parser("f(a, b)").parse_prototype().unwrap_err();
        assert_eq!(syntax_message(e), "expected ')' in prototype");
    }

    #[test]
    fn test_definition() {
        let func = parser("fn sq(x) x*x").parse_definition().unwrap();
        assert_eq!(func.proto, Prototype::new("sq", vec!["x".to_owned()]));
        assert_eq!(func.body.to_string(), "(x * x)");
    }

    #[test]
    fn test_import() {
        let proto = parser("import sin(x)").parse_import().unwrap();
        assert_eq!(proto, Prototype::new("sin", vec!["x".to_owned()]));
    }

    #[test]
    fn test_top_level_expr() {
        let func = parser("1+x").parse_top_level_expr().unwrap();
        assert_eq!(func.proto.name, ANON_FN_NAME);
        assert!(func.proto.params.is_empty());
    }
}
