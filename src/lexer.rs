use super::error::{Error, Position};
use super::token::Token;
use combine::error::{ParseError, StreamError};
use combine::parser::char::{digit, space};
use combine::parser::Parser;
use combine::stream::{Stream, StreamErrorFor};
use combine::{any, choice, eof, many, many1, optional, satisfy, skip_many, token};
use std::io::BufRead;

fn number<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    // A second '.' is left for the next token.
    (
        many1::<String, _, _>(digit()),
        optional((token('.'), many::<String, _, _>(digit()))),
    )
        .and_then(|(int, frac)| {
            let mut text = int;
            if let Some((dot, digits)) = frac {
                text.push(dot);
                text.push_str(&digits);
            }
            text.parse::<f64>()
                .map_err(|e| StreamErrorFor::<Input>::other(e))
        })
        .map(Token::Number)
}

fn ident<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        satisfy(|c: char| c.is_ascii_alphabetic()),
        many::<String, _, _>(satisfy(|c: char| c.is_ascii_alphanumeric())),
    )
        .map(|(first, rest): (char, String)| {
            let mut text = String::with_capacity(rest.len() + 1);
            text.push(first);
            text.push_str(&rest);
            Token::keyword_or_ident(text)
        })
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (
        token('#'),
        skip_many(satisfy(|c: char| c != '\n' && c != '\r')),
    )
        .map(|_| ())
}

fn trivia<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    skip_many(space().map(|_| ()).or(comment()))
}

/// One token, or `None` once the input is used up.
fn lexeme<Input>() -> impl Parser<Input, Output = Option<Token>>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    choice((
        number().map(Some),
        ident().map(Some),
        eof().map(|_| None),
        any().map(|c| Some(Token::Kwd(c))),
    ))
}

/// Pulls tokens lazily out of a line-buffered character source.
pub(crate) struct Scanner<R> {
    source: R,
    buffer: String,
    offset: usize,
    position: Position,
}

impl<R: BufRead> Scanner<R> {
    pub fn new(source: R) -> Self {
        Scanner {
            source,
            buffer: String::new(),
            offset: 0,
            position: Position::default(),
        }
    }

    /// Returns the next token and where it starts. Yields `Token::Eof` on
    /// every call once the source is exhausted.
    pub fn next_token(&mut self) -> Result<(Token, Position), Error> {
        loop {
            let position = self.position;
            let (skipped, lexed) = {
                let rest = &self.buffer[self.offset..];
                let (_, after) = trivia()
                    .parse(rest)
                    .map_err(|e| Error::syntax(e.to_string(), position))?;
                let (token, remaining) = lexeme()
                    .parse(after)
                    .map_err(|e| Error::syntax(e.to_string(), position))?;
                (
                    rest.len() - after.len(),
                    token.map(|t| (t, after.len() - remaining.len())),
                )
            };
            self.consume(skipped);

            if let Some((token, len)) = lexed {
                let start = self.position;
                self.consume(len);
                return Ok((token, start));
            }
            if !self.fill()? {
                return Ok((Token::Eof, self.position));
            }
        }
    }

    fn consume(&mut self, len: usize) {
        for c in self.buffer[self.offset..self.offset + len].chars() {
            if c == '\n' {
                self.position.line += 1;
                self.position.column = 1;
            } else {
                self.position.column += 1;
            }
        }
        self.offset += len;
    }

    /// Reads the next line. Bytes that are not UTF-8 become U+FFFD, which
    /// then lexes as punctuation.
    fn fill(&mut self) -> Result<bool, Error> {
        self.buffer.clear();
        self.offset = 0;
        let mut line = Vec::new();
        if self.source.read_until(b'\n', &mut line)? == 0 {
            return Ok(false);
        }
        self.buffer.push_str(&String::from_utf8_lossy(&line));
        Ok(true)
    }
}
