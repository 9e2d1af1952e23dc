//! Parser error types.

use thiserror::Error;

use crate::lexer::{Span, TokenKind};

/// A parse error.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} at position {}..{}", span.start, span.end)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// The location of the error.
    pub span: Span,
}

impl ParseError {
    /// Creates a new parse error.
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Creates an "unexpected token" error.
    #[must_use]
    pub fn unexpected(found: &TokenKind, span: Span) -> Self {
        Self::new(format!("unexpected token {found:?}"), span)
    }

    /// Creates an "unexpected token, expected X" error.
    #[must_use]
    pub fn expected(what: &str, found: &TokenKind, span: Span) -> Self {
        Self::new(
            format!("unexpected token {found:?}, expected {what}"),
            span,
        )
    }
}
