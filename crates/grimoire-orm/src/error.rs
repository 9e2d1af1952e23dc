//! Error types for the ORM.

use grimoire_sql_core::{ParseError, TypeError};
use thiserror::Error;

/// The error taxonomy of the ORM.
///
/// Every failure surfaced by the library falls into one of these kinds;
/// driver errors keep the formatted SQL for diagnostics.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Unknown dialect, duplicate connect, missing driver.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Duplicate attribute/association, rename collision, unknown
    /// attribute in a definition.
    #[error("definition error: {0}")]
    Definition(String),

    /// Not-null violation or type coercion failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Sharding-key violation, missing primary key, non-paranoid restore.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Malformed condition, unknown `$op`, invalid limit/offset/batch,
    /// forbidden join alias collision.
    #[error("query error: {0}")]
    Query(String),

    /// Wrapped error from the underlying database.
    #[error("database error: {message} (sql: {sql})")]
    Driver {
        /// The driver's own message.
        message: String,
        /// The formatted SQL that failed.
        sql: String,
    },

    /// Reading an unset or nonexistent attribute.
    #[error("logical error: {0}")]
    Logical(String),
}

impl Error {
    /// Wraps a driver failure, preserving the SQL it was executing.
    #[must_use]
    pub fn driver(error: impl std::fmt::Display, sql: impl Into<String>) -> Self {
        Self::Driver {
            message: error.to_string(),
            sql: sql.into(),
        }
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Self::Query(error.to_string())
    }
}

impl From<TypeError> for Error {
    fn from(error: TypeError) -> Self {
        Self::Validation(error.to_string())
    }
}

/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_preserves_sql() {
        let err = Error::driver("table missing", "SELECT * FROM ghosts");
        assert!(err.to_string().contains("SELECT * FROM ghosts"));
    }

    #[test]
    fn test_parse_error_becomes_query_error() {
        let parse_err = grimoire_sql_core::parser::parse_expr("a = 1 ^").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Query(msg) if msg.contains("unexpected token")));
    }
}
