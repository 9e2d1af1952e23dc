//! MySQL family dialect.

use crate::types::DataType;

use super::{ansi_column_type, Dialect, UpsertStyle};

/// Dialect for MySQL and MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnDuplicateKey
    }

    fn supports_update_limit(&self) -> bool {
        true
    }

    fn format_bool(&self, value: bool) -> &'static str {
        // MySQL booleans are numeric.
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn column_type(&self, data_type: &DataType) -> String {
        match data_type {
            DataType::Boolean => String::from("TINYINT(1)"),
            other => ansi_column_type(other),
        }
    }
}
