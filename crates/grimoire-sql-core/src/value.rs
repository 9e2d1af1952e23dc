//! Runtime SQL values and conversions.
//!
//! `Value` is the single currency between the query engine and the driver:
//! conditions bind them, the formatter literalizes or parameterizes them,
//! and hydrated rows carry them back out.

use chrono::{DateTime, Utc};

/// A runtime SQL value.
///
/// Values are bound as parameters wherever possible; `Raw` is the escape
/// hatch that is spliced into the statement verbatim, and `List` only
/// appears transiently while binding `IN` arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (covers the whole integer family).
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Arbitrary-precision decimal, kept as text to avoid rounding.
    Decimal(String),
    /// Text value.
    Text(String),
    /// Binary blob value.
    Blob(Vec<u8>),
    /// Date/time value in UTC.
    DateTime(DateTime<Utc>),
    /// Parsed JSON document (JSON / JSONB columns).
    Json(serde_json::Value),
    /// Raw SQL fragment, spliced verbatim without quoting.
    Raw(String),
    /// A list of values, expanded into an `IN` list when bound.
    List(Vec<Value>),
}

impl Value {
    /// Returns whether the value is SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a JSON document into the closest runtime value.
    ///
    /// Objects stay as `Json`; arrays become `List` so they can expand
    /// into `IN` lists when used as a condition operand.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            value @ serde_json::Value::Object(_) => Self::Json(value),
        }
    }

    /// Converts the value back into a JSON document for serialization.
    ///
    /// Datetimes render as RFC 3339 strings; blobs as arrays of numbers.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Decimal(d) | Self::Text(d) | Self::Raw(d) => {
                serde_json::Value::String(d.clone())
            }
            Self::Blob(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| (*b).into()).collect())
            }
            Self::DateTime(dt) => serde_json::Value::String(
                dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ),
            Self::Json(json) => json.clone(),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
        }
    }
}

/// A raw SQL fragment.
///
/// Wrap trusted SQL in `Raw` to bypass quoting, e.g.
/// `Raw::new("CURRENT_TIMESTAMP()")` as an update value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw(pub String);

impl Raw {
    /// Creates a raw fragment.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }
}

/// Trait for types that can be converted to SQL values.
pub trait ToValue {
    /// Converts the value to a `Value`.
    fn to_value(self) -> Value;
}

impl ToValue for Value {
    fn to_value(self) -> Value {
        self
    }
}

impl ToValue for bool {
    fn to_value(self) -> Value {
        Value::Bool(self)
    }
}

impl ToValue for i64 {
    fn to_value(self) -> Value {
        Value::Int(self)
    }
}

impl ToValue for i32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for i16 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for i8 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u32 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u16 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for u8 {
    fn to_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl ToValue for f64 {
    fn to_value(self) -> Value {
        Value::Float(self)
    }
}

impl ToValue for f32 {
    fn to_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl ToValue for String {
    fn to_value(self) -> Value {
        Value::Text(self)
    }
}

impl ToValue for &str {
    fn to_value(self) -> Value {
        Value::Text(String::from(self))
    }
}

impl ToValue for Vec<u8> {
    fn to_value(self) -> Value {
        Value::Blob(self)
    }
}

impl ToValue for &[u8] {
    fn to_value(self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(self) -> Value {
        Value::DateTime(self)
    }
}

impl ToValue for serde_json::Value {
    fn to_value(self) -> Value {
        Value::Json(self)
    }
}

impl ToValue for Raw {
    fn to_value(self) -> Value {
        Value::Raw(self.0)
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(self) -> Value {
        Value::List(self.into_iter().map(ToValue::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_value_conversions() {
        assert_eq!(true.to_value(), Value::Bool(true));
        assert_eq!(42_i32.to_value(), Value::Int(42));
        assert_eq!(3.5_f64.to_value(), Value::Float(3.5));
        assert_eq!("hello".to_value(), Value::Text(String::from("hello")));
        assert_eq!(None::<i32>.to_value(), Value::Null);
        assert_eq!(Some(42_i32).to_value(), Value::Int(42));
        assert_eq!(
            vec![1_i64, 2, 3].to_value(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_raw_bypasses_conversion() {
        assert_eq!(
            Raw::new("CURRENT_TIMESTAMP()").to_value(),
            Value::Raw(String::from("CURRENT_TIMESTAMP()"))
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(serde_json::json!(null)), Value::Null);
        assert_eq!(Value::from_json(serde_json::json!(1)), Value::Int(1));
        assert_eq!(
            Value::from_json(serde_json::json!([1, 2])),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            Value::from_json(serde_json::json!({"a": 1})),
            Value::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_datetime_to_json_is_rfc3339() {
        let dt = DateTime::parse_from_rfc3339("2017-12-12T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            Value::DateTime(dt).to_json(),
            serde_json::json!("2017-12-12T00:00:00.000Z")
        );
    }
}
