use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Fn,
    Import,
    Exit,
    If,
    Then,
    Else,
    Ident(String),
    Number(f64),
    Kwd(char),
    Eof,
}

impl Token {
    pub fn keyword_or_ident(text: String) -> Token {
        match text.as_str() {
            "fn" => Token::Fn,
            "import" => Token::Import,
            "exit" => Token::Exit,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            _ => Token::Ident(text),
        }
    }

    /// Binding power of a binary operator; higher binds tighter.
    pub fn precedence(&self) -> Option<u32> {
        match self {
            Token::Kwd('<') | Token::Kwd('>') | Token::Kwd('=') => Some(10),
            Token::Kwd('+') | Token::Kwd('-') => Some(20),
            Token::Kwd('*') | Token::Kwd('/') => Some(40),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "'fn'"),
            Token::Import => write!(f, "'import'"),
            Token::Exit => write!(f, "'exit'"),
            Token::If => write!(f, "'if'"),
            Token::Then => write!(f, "'then'"),
            Token::Else => write!(f, "'else'"),
            Token::Ident(id) => write!(f, "identifier '{}'", id),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Kwd(c) => write!(f, "'{}'", c),
            Token::Eof => write!(f, "end of input"),
        }
    }
}
