//! Schema introspection records.
//!
//! `ColumnInfo` is the shape `query_schema_info` returns for every column
//! of every inspected table; the sync engine diffs declared attributes
//! against it.

/// A column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnInfo {
    /// The column name.
    pub column_name: String,
    /// The full column type as rendered by the database (e.g. `VARCHAR(255)`).
    pub column_type: String,
    /// The bare data type name (e.g. `VARCHAR`).
    pub data_type: String,
    /// The default value, if any.
    pub default_value: Option<String>,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Whether the column carries a unique constraint.
    pub unique: bool,
    /// The column comment, if any.
    pub comment: Option<String>,
    /// Subsecond precision for datetime columns.
    pub datetime_precision: Option<u8>,
}

impl ColumnInfo {
    /// Creates a column record with just a name and type.
    #[must_use]
    pub fn new(column_name: impl Into<String>, column_type: impl Into<String>) -> Self {
        let column_type: String = column_type.into();
        let data_type = column_type
            .split(['(', ' '])
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        Self {
            column_name: column_name.into(),
            column_type,
            data_type,
            allow_null: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_derivation() {
        assert_eq!(ColumnInfo::new("title", "VARCHAR(255)").data_type, "VARCHAR");
        assert_eq!(ColumnInfo::new("id", "bigint").data_type, "BIGINT");
    }
}
