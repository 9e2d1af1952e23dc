//! SQL dialect support.
//!
//! Different databases differ in quoting, placeholders, boolean and
//! datetime literals, type renderings and upsert idioms. This module holds
//! the trait the formatter compiles against and the three implementations.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use chrono::{DateTime, Utc};

use crate::types::{DataType, TextSize};
use crate::value::Value;

/// How the dialect spells INSERT-or-UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// MySQL `INSERT ... ON DUPLICATE KEY UPDATE col = VALUES(col)`.
    OnDuplicateKey,
    /// `INSERT ... ON CONFLICT (...) DO UPDATE SET col = EXCLUDED.col`.
    OnConflict,
}

/// Trait for SQL dialect-specific behavior.
pub trait Dialect: Send + Sync {
    /// Returns the name of the dialect.
    fn name(&self) -> &'static str;

    /// Returns the identifier quote character.
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quotes a single identifier.
    fn quote(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        let escaped = name.replace(quote, &format!("{quote}{quote}"));
        format!("{quote}{escaped}{quote}")
    }

    /// Returns the parameter placeholder for the 1-based position.
    fn placeholder(&self, position: usize) -> String {
        let _ = position;
        String::from("?")
    }

    /// Returns the upsert idiom.
    fn upsert_style(&self) -> UpsertStyle {
        UpsertStyle::OnConflict
    }

    /// Returns whether mutating statements support RETURNING.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Returns whether UPDATE/DELETE support ORDER BY and LIMIT natively.
    fn supports_update_limit(&self) -> bool {
        false
    }

    /// Renders a boolean literal.
    fn format_bool(&self, value: bool) -> &'static str {
        if value {
            "true"
        } else {
            "false"
        }
    }

    /// Renders a datetime literal body (unquoted), honoring the declared
    /// subsecond precision; millisecond precision when undeclared.
    fn format_datetime(&self, dt: &DateTime<Utc>, precision: Option<u8>) -> String {
        let format = match precision {
            Some(0) => "%Y-%m-%d %H:%M:%S",
            Some(p) if p > 3 => "%Y-%m-%d %H:%M:%S%.6f",
            _ => "%Y-%m-%d %H:%M:%S%.3f",
        };
        dt.format(format).to_string()
    }

    /// Renders a value as an inline SQL literal.
    ///
    /// `Raw` fragments are spliced verbatim; everything else is escaped.
    fn format_value(&self, value: &Value, precision: Option<u8>) -> String {
        match value {
            Value::Null => String::from("NULL"),
            Value::Bool(b) => String::from(self.format_bool(*b)),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Text(s) => {
                let escaped = s.replace('\'', "''");
                format!("'{escaped}'")
            }
            Value::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
            Value::DateTime(dt) => format!("'{}'", self.format_datetime(dt, precision)),
            Value::Json(json) => {
                let escaped = json.to_string().replace('\'', "''");
                format!("'{escaped}'")
            }
            Value::Raw(sql) => sql.clone(),
            Value::List(items) => items
                .iter()
                .map(|item| self.format_value(item, precision))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Renders the column type for DDL.
    fn column_type(&self, data_type: &DataType) -> String {
        ansi_column_type(data_type)
    }
}

/// The ANSI-ish default column renderings; dialects override per type and
/// fall back here for the rest.
#[must_use]
pub fn ansi_column_type(data_type: &DataType) -> String {
    match data_type {
        DataType::Integer { width: Some(w) } => format!("INTEGER({w})"),
        DataType::Integer { width: None } => String::from("INTEGER"),
        DataType::BigInt => String::from("BIGINT"),
        DataType::Decimal {
            precision: Some(p),
            scale: Some(s),
        } => format!("DECIMAL({p},{s})"),
        DataType::Decimal {
            precision: Some(p),
            scale: None,
        } => format!("DECIMAL({p})"),
        DataType::Decimal { .. } => String::from("DECIMAL"),
        DataType::String { length } => format!("VARCHAR({length})"),
        DataType::Text { size: None } => String::from("TEXT"),
        DataType::Text {
            size: Some(TextSize::Tiny),
        } => String::from("TINYTEXT"),
        DataType::Text {
            size: Some(TextSize::Medium),
        } => String::from("MEDIUMTEXT"),
        DataType::Text {
            size: Some(TextSize::Long),
        } => String::from("LONGTEXT"),
        DataType::Boolean => String::from("BOOLEAN"),
        DataType::Date => String::from("DATE"),
        DataType::DateTime {
            precision: Some(p),
        } => format!("DATETIME({p})"),
        DataType::DateTime { precision: None } => String::from("DATETIME"),
        DataType::Json | DataType::Jsonb => String::from("TEXT"),
        DataType::Binary { length: Some(n) } => format!("BINARY({n})"),
        DataType::Binary { length: None } => String::from("BINARY"),
        DataType::Varbinary { length: Some(n) } => format!("VARBINARY({n})"),
        DataType::Varbinary { length: None } => String::from("VARBINARY"),
        DataType::Blob => String::from("BLOB"),
        DataType::Virtual => String::new(),
    }
}

/// Returns the dialect implementation for a configuration name.
#[must_use]
pub fn dialect_by_name(name: &str) -> Option<Box<dyn Dialect>> {
    match name {
        "mysql" | "mariadb" => Some(Box::new(MysqlDialect)),
        "postgres" | "postgresql" => Some(Box::new(PostgresDialect)),
        "sqlite" | "sqlite3" | "sqljs" => Some(Box::new(SqliteDialect)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_placeholders_per_dialect() {
        assert_eq!(MysqlDialect.placeholder(1), "?");
        assert_eq!(SqliteDialect.placeholder(3), "?");
        assert_eq!(PostgresDialect.placeholder(1), "$1");
        assert_eq!(PostgresDialect.placeholder(3), "$3");
    }

    #[test]
    fn test_quoting_per_dialect() {
        assert_eq!(MysqlDialect.quote("title"), "`title`");
        assert_eq!(PostgresDialect.quote("title"), "\"title\"");
        assert_eq!(SqliteDialect.quote("title"), "\"title\"");
    }

    #[test]
    fn test_boolean_encoding() {
        assert_eq!(MysqlDialect.format_bool(true), "1");
        assert_eq!(PostgresDialect.format_bool(true), "true");
    }

    #[test]
    fn test_datetime_precision() {
        let dt = Utc.with_ymd_and_hms(2012, 12, 14, 12, 0, 0).unwrap();
        let dialect = MysqlDialect;
        assert_eq!(
            dialect.format_datetime(&dt, None),
            "2012-12-14 12:00:00.000"
        );
        assert_eq!(dialect.format_datetime(&dt, Some(0)), "2012-12-14 12:00:00");
        assert_eq!(
            dialect.format_datetime(&dt, Some(6)),
            "2012-12-14 12:00:00.000000"
        );
    }

    #[test]
    fn test_raw_bypasses_quoting() {
        let raw = Value::Raw(String::from("CURRENT_TIMESTAMP()"));
        assert_eq!(
            MysqlDialect.format_value(&raw, None),
            "CURRENT_TIMESTAMP()"
        );
    }

    #[test]
    fn test_text_escaping() {
        let value = Value::Text(String::from("it's"));
        assert_eq!(SqliteDialect.format_value(&value, None), "'it''s'");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(
            MysqlDialect.column_type(&DataType::Boolean),
            "TINYINT(1)"
        );
        assert_eq!(PostgresDialect.column_type(&DataType::Boolean), "BOOLEAN");
        assert_eq!(PostgresDialect.column_type(&DataType::Jsonb), "JSONB");
        assert_eq!(SqliteDialect.column_type(&DataType::Jsonb), "TEXT");
        assert_eq!(PostgresDialect.column_type(&DataType::Blob), "BYTEA");
        assert_eq!(
            PostgresDialect.column_type(&DataType::DateTime { precision: Some(3) }),
            "TIMESTAMP(3)"
        );
    }

    #[test]
    fn test_dialect_by_name() {
        assert!(dialect_by_name("mysql").is_some());
        assert!(dialect_by_name("sqljs").is_some());
        assert!(dialect_by_name("oracle").is_none());
    }
}
