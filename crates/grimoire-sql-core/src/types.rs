//! Attribute data types and the value codec.
//!
//! Every declared attribute carries a `DataType`. The type decides the SQL
//! column rendering per dialect, how raw driver values are decoded
//! (`cast`) and how runtime values are encoded for binding (`uncast`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::value::Value;

/// Size class for TEXT columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSize {
    /// TINYTEXT
    Tiny,
    /// MEDIUMTEXT
    Medium,
    /// LONGTEXT
    Long,
}

/// The recognized attribute data types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// INTEGER, with an optional display width.
    Integer { width: Option<u8> },
    /// BIGINT, primary-key friendly.
    BigInt,
    /// DECIMAL(precision, scale).
    Decimal {
        /// Total number of digits.
        precision: Option<u8>,
        /// Digits after the decimal point.
        scale: Option<u8>,
    },
    /// VARCHAR(n), n defaults to 255.
    String { length: u16 },
    /// TEXT with an optional size class.
    Text { size: Option<TextSize> },
    /// BOOLEAN (TINYINT(1) on MySQL).
    Boolean,
    /// DATE (no time component).
    Date,
    /// DATETIME(p) / TIMESTAMP(p), subsecond precision 0..=6.
    DateTime { precision: Option<u8> },
    /// JSON stored as text, parsed on hydration.
    Json,
    /// JSONB where the dialect has it, TEXT elsewhere.
    Jsonb,
    /// Fixed-width binary.
    Binary { length: Option<u16> },
    /// Variable-width binary.
    Varbinary { length: Option<u16> },
    /// BLOB (bytea on PostgreSQL).
    Blob,
    /// Not persisted; lives only on the instance.
    Virtual,
}

impl DataType {
    /// INTEGER with the default width.
    #[must_use]
    pub const fn integer() -> Self {
        Self::Integer { width: None }
    }

    /// VARCHAR(255).
    #[must_use]
    pub const fn string() -> Self {
        Self::String { length: 255 }
    }

    /// TEXT without a size class.
    #[must_use]
    pub const fn text() -> Self {
        Self::Text { size: None }
    }

    /// DATETIME with millisecond precision.
    #[must_use]
    pub const fn datetime() -> Self {
        Self::DateTime { precision: Some(3) }
    }

    /// DECIMAL without explicit precision.
    #[must_use]
    pub const fn decimal() -> Self {
        Self::Decimal {
            precision: None,
            scale: None,
        }
    }

    /// Returns the class-level tag used for reflection.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Integer { .. } => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Decimal { .. } => "DECIMAL",
            Self::String { .. } => "STRING",
            Self::Text { .. } => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::DateTime { .. } => "DATETIME",
            Self::Json => "JSON",
            Self::Jsonb => "JSONB",
            Self::Binary { .. } => "BINARY",
            Self::Varbinary { .. } => "VARBINARY",
            Self::Blob => "BLOB",
            Self::Virtual => "VIRTUAL",
        }
    }

    /// Returns whether values of this type are persisted at all.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual)
    }

    /// Returns the declared subsecond precision, if any.
    #[must_use]
    pub const fn datetime_precision(&self) -> Option<u8> {
        match self {
            Self::DateTime { precision } => *precision,
            _ => None,
        }
    }
}

/// Looks a data type up by its reflection tag.
#[must_use]
pub fn reflect_type(tag: &str) -> Option<DataType> {
    match tag.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" => Some(DataType::integer()),
        "BIGINT" => Some(DataType::BigInt),
        "DECIMAL" | "NUMERIC" => Some(DataType::decimal()),
        "STRING" | "VARCHAR" => Some(DataType::string()),
        "TEXT" => Some(DataType::text()),
        "TINYTEXT" => Some(DataType::Text {
            size: Some(TextSize::Tiny),
        }),
        "MEDIUMTEXT" => Some(DataType::Text {
            size: Some(TextSize::Medium),
        }),
        "LONGTEXT" => Some(DataType::Text {
            size: Some(TextSize::Long),
        }),
        "BOOLEAN" | "TINYINT" => Some(DataType::Boolean),
        "DATE" => Some(DataType::Date),
        "DATETIME" | "TIMESTAMP" => Some(DataType::datetime()),
        "JSON" => Some(DataType::Json),
        "JSONB" => Some(DataType::Jsonb),
        "BINARY" => Some(DataType::Binary { length: None }),
        "VARBINARY" => Some(DataType::Varbinary { length: None }),
        "BLOB" => Some(DataType::Blob),
        "VIRTUAL" => Some(DataType::Virtual),
        _ => None,
    }
}

/// A value/type coercion failure.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid value {value:?} for type {type_tag}")]
pub struct TypeError {
    /// Debug rendering of the offending value.
    pub value: String,
    /// The reflection tag of the target type.
    pub type_tag: &'static str,
}

impl TypeError {
    fn new(value: &Value, data_type: &DataType) -> Self {
        Self {
            value: format!("{value:?}"),
            type_tag: data_type.tag(),
        }
    }
}

/// Parses a datetime out of the formats drivers and callers actually send.
fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Decodes a raw driver value into the canonical runtime shape.
///
/// Total over `Value`; only genuine coercion failures (e.g. malformed JSON
/// text in a JSON column) report an error.
pub fn cast(value: Value, data_type: &DataType) -> Result<Value, TypeError> {
    match (data_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DataType::Boolean, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (DataType::Json | DataType::Jsonb, Value::Text(text)) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|_| TypeError::new(&Value::Text(text), data_type)),
        (DataType::Json | DataType::Jsonb, Value::Json(json)) => Ok(Value::Json(json)),
        (DataType::Date | DataType::DateTime { .. }, Value::Text(text)) => parse_datetime(&text)
            .map(Value::DateTime)
            .ok_or_else(|| TypeError::new(&Value::Text(text.clone()), data_type)),
        (DataType::Date | DataType::DateTime { .. }, Value::DateTime(dt)) => {
            Ok(Value::DateTime(dt))
        }
        (DataType::Decimal { .. }, Value::Text(text)) => Ok(Value::Decimal(text)),
        (DataType::Integer { .. } | DataType::BigInt, Value::Text(text)) => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| TypeError::new(&Value::Text(text.clone()), data_type)),
        // Everything else is already in its runtime shape.
        (_, value) => Ok(value),
    }
}

/// Encodes a runtime value for binding against a column of `data_type`.
pub fn uncast(value: Value, data_type: &DataType) -> Result<Value, TypeError> {
    match (data_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (_, raw @ Value::Raw(_)) => Ok(raw),
        (DataType::Json | DataType::Jsonb, Value::Json(json)) => {
            Ok(Value::Text(json.to_string()))
        }
        (DataType::Json | DataType::Jsonb, Value::Text(text)) => Ok(Value::Text(text)),
        (DataType::Date | DataType::DateTime { .. }, Value::Text(text)) => parse_datetime(&text)
            .map(Value::DateTime)
            .ok_or_else(|| TypeError::new(&Value::Text(text.clone()), data_type)),
        (DataType::Date | DataType::DateTime { .. }, Value::DateTime(dt)) => {
            Ok(Value::DateTime(dt))
        }
        (DataType::Boolean, Value::Int(i)) => Ok(Value::Bool(i != 0)),
        (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (DataType::Integer { .. } | DataType::BigInt, Value::Int(i)) => Ok(Value::Int(i)),
        (DataType::Integer { .. } | DataType::BigInt, Value::Text(text)) => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| TypeError::new(&Value::Text(text.clone()), data_type)),
        (
            DataType::Boolean | DataType::Integer { .. } | DataType::BigInt,
            value @ (Value::Float(_) | Value::Blob(_) | Value::Json(_) | Value::List(_)),
        ) => Err(TypeError::new(&value, data_type)),
        (_, value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for data_type in [
            DataType::integer(),
            DataType::BigInt,
            DataType::string(),
            DataType::Boolean,
            DataType::datetime(),
            DataType::Json,
        ] {
            assert_eq!(reflect_type(data_type.tag()).unwrap().tag(), data_type.tag());
        }
    }

    #[test]
    fn test_cast_boolean_from_integer() {
        assert_eq!(cast(Value::Int(1), &DataType::Boolean), Ok(Value::Bool(true)));
        assert_eq!(cast(Value::Int(0), &DataType::Boolean), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_cast_json_from_text() {
        let cast_value = cast(
            Value::Text(String::from(r#"{"a":1}"#)),
            &DataType::Json,
        )
        .unwrap();
        assert_eq!(cast_value, Value::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_cast_malformed_json_fails() {
        let err = cast(Value::Text(String::from("{oops")), &DataType::Json).unwrap_err();
        assert!(err.to_string().starts_with("invalid value"));
    }

    #[test]
    fn test_cast_datetime_from_text() {
        let cast_value = cast(
            Value::Text(String::from("2017-12-12")),
            &DataType::datetime(),
        )
        .unwrap();
        match cast_value {
            Value::DateTime(dt) => {
                assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2017-12-12 00:00:00");
            }
            other => panic!("expected DateTime, got {other:?}"),
        }
    }

    #[test]
    fn test_uncast_json_stringifies() {
        let bound = uncast(Value::Json(serde_json::json!({"a": 1})), &DataType::Json).unwrap();
        assert_eq!(bound, Value::Text(String::from(r#"{"a":1}"#)));
    }

    #[test]
    fn test_uncast_raw_passes_through() {
        let bound = uncast(
            Value::Raw(String::from("CURRENT_TIMESTAMP()")),
            &DataType::datetime(),
        )
        .unwrap();
        assert_eq!(bound, Value::Raw(String::from("CURRENT_TIMESTAMP()")));
    }

    #[test]
    fn test_uncast_rejects_list_for_integer() {
        assert!(uncast(Value::List(vec![]), &DataType::BigInt).is_err());
    }
}
