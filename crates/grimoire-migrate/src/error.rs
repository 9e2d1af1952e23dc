//! Error types for the migration runner.

use thiserror::Error;

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The migration name does not follow `YYYYMMDDHHMMSS-slug`.
    #[error("invalid migration name \"{0}\", expected YYYYMMDDHHMMSS-slug")]
    InvalidName(String),

    /// The migration declares no way back.
    #[error("migration \"{0}\" is not reversible")]
    Irreversible(String),

    /// A migration is recorded as applied but not known to the runner.
    #[error("unknown applied migration \"{0}\"")]
    UnknownMigration(String),

    /// An error from the ORM layer.
    #[error(transparent)]
    Orm(#[from] grimoire_orm::Error),
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
