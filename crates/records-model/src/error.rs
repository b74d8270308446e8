use serde::{Deserialize, Serialize};

/// Character range (byte offsets) in a source string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn point(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn merge(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            start: self.start.saturating_add(delta),
            end: self.end.saturating_add(delta),
        }
    }
}

/// An expected, recoverable failure caused by the user's data or expression (division by
/// zero, an index out of range, an unknown unit, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UserError {
    pub message: String,
    pub span: Option<Span>,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
        }
    }

    pub fn at(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
        }
    }
}

/// A broken invariant inside the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    pub message: String,
}

impl InternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type RecordsResult<T> = Result<T, RecordsError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordsError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl RecordsError {
    pub fn user(message: impl Into<String>) -> Self {
        RecordsError::User(UserError::new(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RecordsError::Internal(InternalError::new(message))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, RecordsError::Internal(_))
    }

    /// The bare message, without the `internal error:` prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            RecordsError::User(err) => &err.message,
            RecordsError::Internal(err) => &err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_covers_both_ranges() {
        assert_eq!(Span::new(4, 6).merge(Span::new(1, 5)), Span::new(1, 6));
    }

    #[test]
    fn internal_errors_display_with_prefix() {
        let err = RecordsError::internal("visitor fell through");
        assert!(err.is_internal());
        assert_eq!(err.to_string(), "internal error: visitor fell through");
        assert_eq!(err.message(), "visitor fell through");
    }
}
