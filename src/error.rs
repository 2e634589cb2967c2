use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};
use std::io;

/// Line and column of a token, both starting at one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub line: u32,
    pub column: u32,
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug)]
pub(crate) struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub(crate) enum ErrorKind {
    #[fail(display = "syntax error at {}: {}", position, message)]
    Syntax { message: String, position: Position },
    #[fail(display = "{}", _0)]
    Semantic(String),
    #[fail(display = "execution failed: {}", _0)]
    Execution(String),
    #[fail(display = "failed to read input")]
    Io,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> Error {
        Error::from(ErrorKind::Syntax {
            message: message.into(),
            position,
        })
    }

    pub fn semantic(message: impl Into<String>) -> Error {
        Error::from(ErrorKind::Semantic(message.into()))
    }

    pub fn execution(message: impl Into<String>) -> Error {
        Error::from(ErrorKind::Execution(message.into()))
    }

    /// Errors that end the session instead of being reported and skipped.
    pub fn is_fatal(&self) -> bool {
        match self.kind() {
            ErrorKind::Io => true,
            _ => false,
        }
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error {
            inner: error.context(ErrorKind::Io),
        }
    }
}
