//! SQLite family dialect, including the in-memory variant.

use super::Dialect;

/// Dialect for SQLite (file-backed or in-memory).
///
/// Generated ids are read back through the driver's `last_insert_rowid`
/// rather than RETURNING.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }
}
