//! Quoting rules for text in saved documents and expressions.
//!
//! Substitution order matters: `^` is escaped first so that the escape sequences introduced
//! for the other characters are never themselves re-escaped.

use crate::ids::is_valid_ident;

pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for ch in raw.chars() {
        match ch {
            '^' => out.push_str("^c"),
            '"' => out.push_str("^q"),
            '\n' => out.push_str("^n"),
            '\r' => out.push_str("^r"),
            '@' => out.push_str("^a"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_text`]. Unknown escape sequences are kept verbatim.
pub fn unescape_text(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '^' {
            out.push(ch);
            continue;
        }
        let replacement = match chars.peek() {
            Some('c') => '^',
            Some('q') => '"',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('a') => '@',
            _ => {
                out.push('^');
                continue;
            }
        };
        chars.next();
        out.push(replacement);
    }
    out
}

pub fn quote(raw: &str) -> String {
    format!("\"{}\"", escape_text(raw))
}

/// Writes `name` bare when it is a valid unquoted identifier, quoted otherwise.
pub fn quoted_if_needed(name: &str) -> String {
    if is_valid_ident(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escapes_in_caret_first_order() {
        assert_eq!(escape_text("a^q\"b"), "a^cq^qb");
        assert_eq!(escape_text("x@y\r\n"), "x^ay^r^n");
    }

    #[test]
    fn unescape_inverts_escape() {
        for raw in ["", "plain", "^^", "\"quoted\"", "a^qb", "@@\n\r^c"] {
            assert_eq!(unescape_text(&escape_text(raw)), raw);
        }
    }

    #[test]
    fn unknown_escape_is_preserved() {
        assert_eq!(unescape_text("a^zb^"), "a^zb^");
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quoted_if_needed("Date"), "Date");
        assert_eq!(quoted_if_needed("Card Number"), "\"Card Number\"");
        assert_eq!(quoted_if_needed("true"), "\"true\"");
    }
}
