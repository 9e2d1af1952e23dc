//! Token definitions for the condition mini-language.

use super::Span;

/// Keywords recognized by the condition language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    And,
    Or,
    Not,
    In,
    Between,
    Like,
    Is,
    Null,
    As,
    Asc,
    Desc,
    Distinct,
}

impl Keyword {
    /// Looks a keyword up by its (case-insensitive) text.
    #[must_use]
    pub fn from_str(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "NOT" => Some(Self::Not),
            "IN" => Some(Self::In),
            "BETWEEN" => Some(Self::Between),
            "LIKE" => Some(Self::Like),
            "IS" => Some(Self::Is),
            "NULL" => Some(Self::Null),
            "AS" => Some(Self::As),
            "ASC" => Some(Self::Asc),
            "DESC" => Some(Self::Desc),
            "DISTINCT" => Some(Self::Distinct),
            _ => None,
        }
    }
}

/// The kind of a lexed token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier (column, function or alias name).
    Identifier(String),
    /// An integer literal.
    Integer(i64),
    /// A decimal literal.
    Float(f64),
    /// A quoted string literal.
    String(String),
    /// A `?` positional placeholder.
    Placeholder,
    /// A keyword.
    Keyword(Keyword),

    // Symbols
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    LParen,
    RParen,
    Comma,
    Dot,

    /// A lexing error, with a message.
    Error(String),
    /// End of input.
    Eof,
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token kind.
    pub kind: TokenKind,
    /// The source span.
    pub span: Span,
}

impl Token {
    /// Creates a new token.
    #[must_use]
    pub const fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup_is_case_insensitive() {
        assert_eq!(Keyword::from_str("and"), Some(Keyword::And));
        assert_eq!(Keyword::from_str("BETWEEN"), Some(Keyword::Between));
        assert_eq!(Keyword::from_str("select"), None);
    }
}
