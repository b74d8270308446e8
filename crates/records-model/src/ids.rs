//! Validated identifiers for tables, columns and tagged types.
//!
//! Identifiers are compared and ordered by their raw string. Table and column identifiers may
//! contain single interior spaces (`Card Number`); such names are quoted when an expression is
//! saved, see [`crate::escape::quoted_if_needed`].

use core::fmt;

use serde::{Deserialize, Serialize};

/// Words the expression grammar reserves and which therefore always need quoting.
pub const RESERVED_WORDS: &[&str] = &["true", "false"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    Empty,
    InvalidCharacter { ch: char, index: usize },
    SurroundingWhitespace,
    RepeatedWhitespace,
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierError::Empty => f.write_str("identifier cannot be empty"),
            IdentifierError::InvalidCharacter { ch, index } => {
                write!(f, "invalid character '{ch}' at index {index}")
            }
            IdentifierError::SurroundingWhitespace => {
                f.write_str("identifier cannot start or end with whitespace")
            }
            IdentifierError::RepeatedWhitespace => {
                f.write_str("identifier cannot contain consecutive spaces")
            }
        }
    }
}

impl std::error::Error for IdentifierError {}

/// True if `name` can be written in an expression without quotes: a letter followed by
/// letters, digits or `_`, and not a reserved word.
pub fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_alphabetic()
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !RESERVED_WORDS.contains(&name)
}

fn validate_name(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if name.trim() != name {
        return Err(IdentifierError::SurroundingWhitespace);
    }
    if name.contains("  ") {
        return Err(IdentifierError::RepeatedWhitespace);
    }
    for (index, ch) in name.chars().enumerate() {
        if !(ch.is_alphanumeric() || matches!(ch, ' ' | '_' | '-')) {
            return Err(IdentifierError::InvalidCharacter { ch, index });
        }
    }
    Ok(())
}

macro_rules! validated_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
                let raw = raw.into();
                validate_name(&raw)?;
                Ok(Self(raw))
            }

            pub fn raw(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

validated_id!(
    /// Identifier of a table in a document.
    TableId
);
validated_id!(
    /// Identifier of a column within a table.
    ColumnId
);
validated_id!(
    /// Name of a tagged type registered with the [`crate::TypeManager`].
    TypeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_names_with_single_spaces() {
        assert_eq!(ColumnId::new("Card Number").unwrap().raw(), "Card Number");
        assert_eq!(
            ColumnId::new("Card  Number"),
            Err(IdentifierError::RepeatedWhitespace)
        );
        assert_eq!(
            TableId::new(" Cards"),
            Err(IdentifierError::SurroundingWhitespace)
        );
        assert_eq!(
            TableId::new("a\"b"),
            Err(IdentifierError::InvalidCharacter { ch: '"', index: 1 })
        );
    }

    #[test]
    fn ids_order_lexicographically() {
        let mut ids = vec![
            ColumnId::new("b").unwrap(),
            ColumnId::new("B").unwrap(),
            ColumnId::new("a").unwrap(),
        ];
        ids.sort();
        let raw: Vec<&str> = ids.iter().map(ColumnId::raw).collect();
        assert_eq!(raw, vec!["B", "a", "b"]);
    }

    #[test]
    fn valid_idents_exclude_reserved_words_and_spaces() {
        assert!(is_valid_ident("abs"));
        assert!(is_valid_ident("text_length2"));
        assert!(!is_valid_ident("true"));
        assert!(!is_valid_ident("_x"));
        assert!(!is_valid_ident("Card Number"));
        assert!(!is_valid_ident(""));
    }
}
