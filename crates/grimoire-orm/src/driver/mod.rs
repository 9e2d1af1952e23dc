//! Database drivers.
//!
//! A `Driver` is the execution half of a dialect adapter: it runs
//! formatted SQL with bound values, reports schema information, provides
//! the DDL primitives the sync engine needs, and hands out pinned
//! connections for transactions. The SQLite driver is always compiled;
//! MySQL and PostgreSQL live behind cargo features of the same name.

mod sqlite;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use sqlite::SqliteDriver;

#[cfg(feature = "mysql")]
pub use mysql::MysqlDriver;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use grimoire_sql_core::dialect::Dialect;
use grimoire_sql_core::types::DataType;
use grimoire_sql_core::value::Value;
use grimoire_sql_core::ColumnInfo;

use crate::error::Result;
use crate::model::AttributeDef;

/// A result row, keyed by column name.
pub type Row = HashMap<String, Value>;

/// The outcome of one query.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// Rows for selects; empty for mutations without RETURNING.
    pub rows: Vec<Row>,
    /// Affected row count for mutations.
    pub affected_rows: u64,
    /// The generated id, when the dialect reports one.
    pub insert_id: Option<i64>,
}

/// Per-query options.
#[derive(Debug, Default)]
pub struct QueryOptions {
    /// Pinned connection id (inside a transaction).
    pub connection: Option<u64>,
}

/// The query logging contract.
///
/// Invoked around every query; errors keep the formatted SQL.
pub trait Logger: Send + Sync {
    /// Called after a successful query.
    fn log_query(&self, sql: &str, duration: Duration, result: &QueryResult);

    /// Called after a failed query.
    fn log_query_error(&self, sql: &str, error: &crate::error::Error) {
        tracing::warn!(sql, %error, "query failed");
    }
}

/// The default logger, reporting through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_query(&self, sql: &str, duration: Duration, result: &QueryResult) {
        tracing::debug!(
            sql,
            elapsed_ms = duration.as_millis() as u64,
            rows = result.rows.len(),
            affected = result.affected_rows,
            "query"
        );
    }
}

/// Plain functions work as loggers too.
impl<F> Logger for F
where
    F: Fn(&str, Duration) + Send + Sync,
{
    fn log_query(&self, sql: &str, duration: Duration, _result: &QueryResult) {
        self(sql, duration);
    }
}

/// The polymorphic execution interface.
pub trait Driver: Send + Sync {
    /// Returns the formatting dialect.
    fn dialect(&self) -> &dyn Dialect;

    /// Runs a query with bound values.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        values: &'a [Value],
        options: &'a QueryOptions,
    ) -> BoxFuture<'a, Result<QueryResult>>;

    /// Reports column information for the given tables.
    fn query_schema_info<'a>(
        &'a self,
        tables: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, Vec<ColumnInfo>>>>;

    /// Opens a transaction, returning the pinned connection id.
    fn begin(&self) -> BoxFuture<'_, Result<u64>>;

    /// Commits the pinned connection.
    fn commit(&self, connection: u64) -> BoxFuture<'_, Result<()>>;

    /// Rolls the pinned connection back.
    fn rollback(&self, connection: u64) -> BoxFuture<'_, Result<()>>;

    /// Tears the pool down.
    fn close(&self) -> BoxFuture<'_, Result<()>>;

    // ---- DDL primitives, shared across drivers -------------------------

    /// Creates a table from attribute definitions.
    fn create_table<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [&'a AttributeDef],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let body: Vec<String> = columns
                .iter()
                .map(|column| column_ddl(dialect, column))
                .collect();
            let sql = format!(
                "CREATE TABLE {} ({})",
                dialect.quote(table),
                body.join(", ")
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Drops a table if it exists.
    fn drop_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!("DROP TABLE IF EXISTS {}", self.dialect().quote(table));
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Renames a table.
    fn rename_table<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = format!(
                "ALTER TABLE {} RENAME TO {}",
                dialect.quote(from),
                dialect.quote(to)
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Empties a table.
    fn truncate_table<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            // SQLite has no TRUNCATE.
            let sql = if dialect.name() == "sqlite" {
                format!("DELETE FROM {}", dialect.quote(table))
            } else {
                format!("TRUNCATE TABLE {}", dialect.quote(table))
            };
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Adds a column.
    fn add_column<'a>(
        &'a self,
        table: &'a str,
        column: &'a AttributeDef,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {}",
                dialect.quote(table),
                column_ddl(dialect, column)
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Changes a column's type or nullability.
    fn change_column<'a>(
        &'a self,
        table: &'a str,
        column: &'a AttributeDef,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = match dialect.name() {
                "mysql" => format!(
                    "ALTER TABLE {} MODIFY COLUMN {}",
                    dialect.quote(table),
                    column_ddl(dialect, column)
                ),
                "postgres" => format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                    dialect.quote(table),
                    dialect.quote(&column.column_name),
                    dialect.column_type(&column.data_type)
                ),
                _ => {
                    tracing::warn!(
                        table,
                        column = column.column_name,
                        "sqlite cannot alter column types in place, skipping"
                    );
                    return Ok(());
                }
            };
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Removes a column.
    fn remove_column<'a>(&'a self, table: &'a str, column: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = format!(
                "ALTER TABLE {} DROP COLUMN {}",
                dialect.quote(table),
                dialect.quote(column)
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Renames a column.
    fn rename_column<'a>(
        &'a self,
        table: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                dialect.quote(table),
                dialect.quote(from),
                dialect.quote(to)
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Creates an index over the given columns.
    fn add_index<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [&'a str],
        unique: bool,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let name = index_name(table, columns);
            let quoted: Vec<String> = columns.iter().map(|c| dialect.quote(c)).collect();
            let sql = format!(
                "CREATE {}INDEX {} ON {} ({})",
                if unique { "UNIQUE " } else { "" },
                dialect.quote(&name),
                dialect.quote(table),
                quoted.join(", ")
            );
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Drops an index.
    fn remove_index<'a>(
        &'a self,
        table: &'a str,
        columns: &'a [&'a str],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let name = index_name(table, columns);
            let sql = if dialect.name() == "mysql" {
                format!(
                    "DROP INDEX {} ON {}",
                    dialect.quote(&name),
                    dialect.quote(table)
                )
            } else {
                format!("DROP INDEX {}", dialect.quote(&name))
            };
            self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(())
        })
    }

    /// Lists the table's indexes as raw rows.
    fn show_indexes<'a>(&'a self, table: &'a str) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let dialect = self.dialect();
            let sql = match dialect.name() {
                "mysql" => format!("SHOW INDEX FROM {}", dialect.quote(table)),
                "postgres" => format!(
                    "SELECT indexname, indexdef FROM pg_indexes WHERE tablename = '{table}'"
                ),
                _ => format!("PRAGMA index_list({table})"),
            };
            let result = self.query(&sql, &[], &QueryOptions::default()).await?;
            Ok(result.rows)
        })
    }
}

/// Derives the conventional index name.
fn index_name(table: &str, columns: &[&str]) -> String {
    format!("idx_{table}_{}", columns.join("_"))
}

/// Renders one column of a CREATE TABLE / ADD COLUMN statement.
fn column_ddl(dialect: &dyn Dialect, column: &AttributeDef) -> String {
    let mut out = dialect.quote(&column.column_name);
    out.push(' ');

    // Auto-increment keys need dialect-specific type spellings.
    if column.auto_increment && column.primary_key {
        match dialect.name() {
            "postgres" => {
                out.push_str(match column.data_type {
                    DataType::BigInt => "BIGSERIAL",
                    _ => "SERIAL",
                });
                out.push_str(" PRIMARY KEY");
                return out;
            }
            "sqlite" => {
                out.push_str("INTEGER PRIMARY KEY AUTOINCREMENT");
                return out;
            }
            _ => {
                out.push_str(&dialect.column_type(&column.data_type));
                out.push_str(" PRIMARY KEY AUTO_INCREMENT");
                return out;
            }
        }
    }

    out.push_str(&dialect.column_type(&column.data_type));
    if column.primary_key {
        out.push_str(" PRIMARY KEY");
    } else if !column.allow_null {
        out.push_str(" NOT NULL");
    }
    if column.unique {
        out.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default_value {
        out.push_str(" DEFAULT ");
        out.push_str(&dialect.format_value(default, None));
    }
    if let Some(comment) = &column.comment {
        if dialect.name() == "mysql" {
            let escaped = comment.replace('\'', "''");
            out.push_str(&format!(" COMMENT '{escaped}'"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_sql_core::dialect::{MysqlDialect, PostgresDialect, SqliteDialect};

    #[test]
    fn test_column_ddl_auto_increment() {
        let id = AttributeDef::new("id", DataType::BigInt)
            .primary_key()
            .auto_increment();
        assert_eq!(
            column_ddl(&SqliteDialect, &id),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            column_ddl(&PostgresDialect, &id),
            "\"id\" BIGSERIAL PRIMARY KEY"
        );
        assert_eq!(
            column_ddl(&MysqlDialect, &id),
            "`id` BIGINT PRIMARY KEY AUTO_INCREMENT"
        );
    }

    #[test]
    fn test_column_ddl_not_null_default() {
        let column = AttributeDef::new("word_count", DataType::integer())
            .allow_null(false)
            .default_value(0);
        assert_eq!(
            column_ddl(&SqliteDialect, &column),
            "\"word_count\" INTEGER NOT NULL DEFAULT 0"
        );
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("articles", &["author_id", "title"]), "idx_articles_author_id_title");
    }
}
