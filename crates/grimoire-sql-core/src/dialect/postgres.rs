//! PostgreSQL dialect.

use crate::types::{DataType, TextSize};

use super::{ansi_column_type, Dialect};

/// Dialect for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn column_type(&self, data_type: &DataType) -> String {
        match data_type {
            // PostgreSQL has no width'd integers, sized texts or blobs.
            DataType::Integer { .. } => String::from("INTEGER"),
            DataType::Text { size: Some(TextSize::Tiny | TextSize::Medium | TextSize::Long) } => {
                String::from("TEXT")
            }
            DataType::DateTime { precision: Some(p) } => format!("TIMESTAMP({p})"),
            DataType::DateTime { precision: None } => String::from("TIMESTAMP"),
            DataType::Jsonb => String::from("JSONB"),
            DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::Blob => {
                String::from("BYTEA")
            }
            other => ansi_column_type(other),
        }
    }
}
