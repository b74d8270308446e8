//! An immutable cursor over source text.
//!
//! Recognisers take a [`ParseProgress`] by value and return either a located
//! [`RecogniseError`] or the recognised value with an advanced cursor. The cursor is `Copy`,
//! so backtracking is just reusing an earlier cursor.

use crate::escape::unescape_text;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at offset {position})")]
pub struct RecogniseError {
    pub message: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Success<'a, T> {
    pub value: T,
    pub progress: ParseProgress<'a>,
}

pub type RecogniseResult<'a, T> = Result<Success<'a, T>, RecogniseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProgress<'a> {
    src: &'a str,
    pos: usize,
}

pub fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic()
}

pub fn is_ident_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

impl<'a> ParseProgress<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn src(&self) -> &'a str {
        self.src
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    #[must_use]
    pub fn advance(self, bytes: usize) -> Self {
        Self {
            src: self.src,
            pos: (self.pos + bytes).min(self.src.len()),
        }
    }

    #[must_use]
    pub fn skip_spaces(self) -> Self {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len())
    }

    /// Next character, without skipping spaces.
    pub fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn error(&self, message: impl Into<String>) -> RecogniseError {
        RecogniseError {
            message: message.into(),
            position: self.pos,
        }
    }

    pub fn success<T>(self, value: T) -> RecogniseResult<'a, T> {
        Ok(Success {
            value,
            progress: self,
        })
    }

    /// Skips spaces then consumes `expected` verbatim.
    pub fn consume_next(self, expected: &str) -> Option<Self> {
        let start = self.skip_spaces();
        start
            .rest()
            .starts_with(expected)
            .then(|| start.advance(expected.len()))
    }

    /// Like [`Self::consume_next`], but the keyword must not run into an identifier character
    /// (`true` does not match the start of `trueish`).
    pub fn consume_keyword(self, keyword: &str) -> Option<Self> {
        let after = self.consume_next(keyword)?;
        match after.peek_char() {
            Some(ch) if is_ident_part(ch) => None,
            _ => Some(after),
        }
    }

    pub fn consume_while(self, mut predicate: impl FnMut(char) -> bool) -> (&'a str, Self) {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, ch)| !predicate(*ch))
            .map_or(rest.len(), |(i, _)| i);
        (&rest[..len], self.advance(len))
    }

    /// Skips spaces then reads `"..."`, unescaping the content.
    pub fn consume_quoted(self) -> RecogniseResult<'a, String> {
        let start = self.skip_spaces();
        let Some(inside) = start.consume_next("\"") else {
            return Err(start.error("expected '\"'"));
        };
        let (raw, after) = inside.consume_while(|c| c != '"');
        if after.at_end() {
            return Err(start.error("unterminated quoted text"));
        }
        after.advance(1).success(unescape_text(raw))
    }

    /// Skips spaces then reads an optionally signed decimal literal: digits with an optional
    /// `.` and further digits. No exponent.
    pub fn consume_number(self) -> Option<(&'a str, Self)> {
        let start = self.skip_spaces();
        let rest = start.rest();
        let bytes = rest.as_bytes();
        let mut len = 0;
        if matches!(bytes.first(), Some(b'+' | b'-')) {
            len += 1;
        }
        let digits_start = len;
        while bytes.get(len).is_some_and(u8::is_ascii_digit) {
            len += 1;
        }
        if len == digits_start {
            return None;
        }
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            len += 1;
            while bytes.get(len).is_some_and(u8::is_ascii_digit) {
                len += 1;
            }
        }
        Some((&rest[..len], start.advance(len)))
    }

    /// Skips spaces then reads an unquoted identifier.
    pub fn consume_ident(self) -> Option<(&'a str, Self)> {
        let start = self.skip_spaces();
        match start.peek_char() {
            Some(ch) if is_ident_start(ch) => Some(start.consume_while(is_ident_part)),
            _ => None,
        }
    }

    /// An identifier, or a quoted name.
    pub fn consume_name(self) -> RecogniseResult<'a, String> {
        if let Some((ident, progress)) = self.consume_ident() {
            return progress.success(ident.to_string());
        }
        self.consume_quoted()
    }
}
