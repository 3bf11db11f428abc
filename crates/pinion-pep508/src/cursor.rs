use std::fmt::{Display, Formatter};
use std::str::Chars;

use crate::Pep508Error;

/// A character cursor over a dependency specifier, tracking byte offsets for error spans.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    input: &'a str,
    chars: Chars<'a>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars(),
            pos: 0,
        }
    }

    /// Current byte offset.
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn slice(&self, start: usize, len: usize) -> &'a str {
        &self.input[start..start + len]
    }

    pub(crate) fn peek(&self) -> Option<(usize, char)> {
        self.chars.clone().next().map(|char| (self.pos, char))
    }

    pub(crate) fn peek_char(&self) -> Option<char> {
        self.chars.clone().next()
    }

    /// Consumes `token` if it is next, returning its offset.
    pub(crate) fn eat_char(&mut self, token: char) -> Option<usize> {
        let (pos, char) = self.peek()?;
        if char == token {
            self.next();
            Some(pos)
        } else {
            None
        }
    }

    pub(crate) fn eat_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    pub(crate) fn next(&mut self) -> Option<(usize, char)> {
        let pos = self.pos;
        let char = self.chars.next()?;
        self.pos += char.len_utf8();
        Some((pos, char))
    }

    /// The span `(start, len)` that `take_while` would consume, without consuming it.
    pub(crate) fn peek_while(&self, condition: impl Fn(char) -> bool) -> (usize, usize) {
        let len = self
            .chars
            .clone()
            .take_while(|c| condition(*c))
            .map(char::len_utf8)
            .sum();
        (self.pos, len)
    }

    /// Consumes characters while `condition` holds and returns the consumed span.
    pub(crate) fn take_while(&mut self, condition: impl Fn(char) -> bool) -> (usize, usize) {
        let start = self.pos;
        while let Some(char) = self.peek_char() {
            if !condition(char) {
                break;
            }
            self.next();
        }
        (start, self.pos - start)
    }

    /// Consumes the next character, failing unless it is `expected`.
    pub(crate) fn next_expect_char(
        &mut self,
        expected: char,
        span_start: usize,
    ) -> Result<(), Pep508Error> {
        match self.next() {
            None => Err(self.error(
                format!("Expected '{expected}', found end of dependency specification"),
                span_start,
                1,
            )),
            Some((_, value)) if value == expected => Ok(()),
            Some((pos, other)) => Err(self.error(
                format!("Expected '{expected}', found '{other}'"),
                pos,
                other.len_utf8(),
            )),
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>, start: usize, len: usize) -> Pep508Error {
        Pep508Error {
            message: message.into(),
            start,
            len,
            input: self.input.to_string(),
        }
    }
}

impl Display for Cursor<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.input)
    }
}
