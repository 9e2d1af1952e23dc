//! SQLite driver over sqlx, including the in-memory variant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use grimoire_sql_core::dialect::{Dialect, SqliteDialect};
use grimoire_sql_core::value::Value;
use grimoire_sql_core::ColumnInfo;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::{Driver, Logger, QueryOptions, QueryResult, Row, TracingLogger};

/// Driver for SQLite databases, file-backed or `:memory:`.
pub struct SqliteDriver {
    pool: SqlitePool,
    dialect: SqliteDialect,
    logger: Arc<dyn Logger>,
    transactions: Mutex<HashMap<u64, sqlx::Transaction<'static, sqlx::Sqlite>>>,
    next_transaction: AtomicU64,
}

impl SqliteDriver {
    /// Connects to the given storage path; `:memory:` opens the
    /// in-memory variant.
    pub async fn connect(storage: &str, logger: Option<Arc<dyn Logger>>) -> Result<Self> {
        let (url, max_connections) = if storage == ":memory:" {
            // A pooled in-memory database must stay on one connection,
            // otherwise every checkout sees a different database.
            (String::from("sqlite::memory:"), 1)
        } else {
            (format!("sqlite://{storage}?mode=rwc"), 5)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .map_err(|error| {
                Error::Configuration(format!("unable to open sqlite database {storage}: {error}"))
            })?;
        Ok(Self {
            pool,
            dialect: SqliteDialect,
            logger: logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            transactions: Mutex::new(HashMap::new()),
            next_transaction: AtomicU64::new(1),
        })
    }

    async fn run(&self, sql: &str, values: &[Value], options: &QueryOptions) -> Result<QueryResult> {
        let head = sql.trim_start().to_ascii_uppercase();
        let is_select = head.starts_with("SELECT") || head.starts_with("PRAGMA");
        let is_insert = head.starts_with("INSERT");

        let outcome = if let Some(id) = options.connection {
            let mut transactions = self.transactions.lock().await;
            let transaction = transactions.get_mut(&id).ok_or_else(|| {
                Error::Configuration(format!("unknown transaction connection #{id}"))
            })?;
            execute_on(&mut **transaction, sql, values, is_select, is_insert).await
        } else {
            execute_on(&self.pool, sql, values, is_select, is_insert).await
        };
        outcome.map_err(|error| Error::driver(error, sql))
    }
}

async fn execute_on<'c, E>(
    executor: E,
    sql: &str,
    values: &[Value],
    is_select: bool,
    is_insert: bool,
) -> std::result::Result<QueryResult, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let mut query = sqlx::query(sql);
    for value in values {
        query = bind_value(query, value);
    }

    if is_select {
        let rows = query.fetch_all(executor).await?;
        Ok(QueryResult {
            rows: rows.iter().map(decode_row).collect(),
            affected_rows: 0,
            insert_id: None,
        })
    } else {
        let done = query.execute(executor).await?;
        Ok(QueryResult {
            rows: Vec::new(),
            affected_rows: done.rows_affected(),
            insert_id: if is_insert {
                Some(done.last_insert_rowid())
            } else {
                None
            },
        })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Decimal(s) | Value::Text(s) | Value::Raw(s) => query.bind(s.clone()),
        Value::Blob(bytes) => query.bind(bytes.clone()),
        Value::DateTime(dt) => query.bind(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        Value::Json(json) => query.bind(json.to_string()),
        Value::List(items) => query.bind(Value::List(items.clone()).to_json().to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        out.insert(column.name().to_string(), decode_column(row, i, &type_name));
    }
    out
}

fn decode_column(row: &SqliteRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "INTEGER" | "INT" | "BIGINT" | "INT4" | "INT8" => {
            match row.try_get::<Option<i64>, _>(index) {
                Ok(Some(value)) => Value::Int(value),
                Ok(None) => Value::Null,
                Err(_) => decode_any(row, index),
            }
        }
        "REAL" | "NUMERIC" => match row.try_get::<Option<f64>, _>(index) {
            Ok(Some(value)) => Value::Float(value),
            Ok(None) => Value::Null,
            Err(_) => decode_any(row, index),
        },
        "BOOLEAN" => match row.try_get::<Option<bool>, _>(index) {
            Ok(Some(value)) => Value::Bool(value),
            Ok(None) => Value::Null,
            Err(_) => decode_any(row, index),
        },
        "BLOB" => match row.try_get::<Option<Vec<u8>>, _>(index) {
            Ok(Some(value)) => Value::Blob(value),
            Ok(None) => Value::Null,
            Err(_) => decode_any(row, index),
        },
        "TEXT" | "DATETIME" | "DATE" | "TIME" | "VARCHAR" => {
            match row.try_get::<Option<String>, _>(index) {
                Ok(Some(value)) => Value::Text(value),
                Ok(None) => Value::Null,
                Err(_) => decode_any(row, index),
            }
        }
        // Expression columns may report NULL affinity while carrying a
        // value, so probe instead of trusting the declared type.
        _ => decode_any(row, index),
    }
}

/// Last-resort decoding for expression columns whose declared type the
/// driver does not report.
fn decode_any(row: &SqliteRow, index: usize) -> Value {
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(index) {
        return Value::Int(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<f64>, _>(index) {
        return Value::Float(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<String>, _>(index) {
        return Value::Text(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return Value::Blob(value);
    }
    Value::Null
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        values: &'a [Value],
        options: &'a QueryOptions,
    ) -> BoxFuture<'a, Result<QueryResult>> {
        Box::pin(async move {
            let started = Instant::now();
            let outcome = self.run(sql, values, options).await;
            match &outcome {
                Ok(result) => self.logger.log_query(sql, started.elapsed(), result),
                Err(error) => self.logger.log_query_error(sql, error),
            }
            outcome
        })
    }

    fn query_schema_info<'a>(
        &'a self,
        tables: &'a [String],
    ) -> BoxFuture<'a, Result<HashMap<String, Vec<ColumnInfo>>>> {
        Box::pin(async move {
            let mut info = HashMap::new();
            for table in tables {
                let result = self
                    .query(
                        &format!("PRAGMA table_info({table})"),
                        &[],
                        &QueryOptions::default(),
                    )
                    .await?;
                if result.rows.is_empty() {
                    continue;
                }

                let unique_columns = self.unique_columns(table).await?;
                let mut columns = Vec::new();
                for row in result.rows {
                    let column_name = text_of(&row, "name");
                    let column_type = text_of(&row, "type");
                    let mut column = ColumnInfo::new(column_name.clone(), column_type);
                    column.allow_null = int_of(&row, "notnull") == 0;
                    column.primary_key = int_of(&row, "pk") > 0;
                    column.default_value = match row.get("dflt_value") {
                        Some(Value::Null) | None => None,
                        Some(value) => Some(self.dialect.format_value(value, None)),
                    };
                    column.unique = unique_columns.contains(&column_name);
                    column.datetime_precision = parse_precision(&column.column_type);
                    columns.push(column);
                }
                info.insert(table.clone(), columns);
            }
            Ok(info)
        })
    }

    fn begin(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let transaction = self
                .pool
                .begin()
                .await
                .map_err(|error| Error::driver(error, "BEGIN"))?;
            let id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
            self.transactions.lock().await.insert(id, transaction);
            Ok(id)
        })
    }

    fn commit(&self, connection: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let transaction = self
                .transactions
                .lock()
                .await
                .remove(&connection)
                .ok_or_else(|| {
                    Error::Configuration(format!("unknown transaction connection #{connection}"))
                })?;
            transaction
                .commit()
                .await
                .map_err(|error| Error::driver(error, "COMMIT"))
        })
    }

    fn rollback(&self, connection: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let transaction = self
                .transactions
                .lock()
                .await
                .remove(&connection)
                .ok_or_else(|| {
                    Error::Configuration(format!("unknown transaction connection #{connection}"))
                })?;
            transaction
                .rollback()
                .await
                .map_err(|error| Error::driver(error, "ROLLBACK"))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.pool.close().await;
            Ok(())
        })
    }
}

impl SqliteDriver {
    /// Collects columns covered by single-column unique indexes.
    async fn unique_columns(&self, table: &str) -> Result<Vec<String>> {
        let indexes = self
            .query(
                &format!("PRAGMA index_list({table})"),
                &[],
                &QueryOptions::default(),
            )
            .await?;
        let mut unique = Vec::new();
        for index in indexes.rows {
            if int_of(&index, "unique") != 1 {
                continue;
            }
            let name = text_of(&index, "name");
            let info = self
                .query(
                    &format!("PRAGMA index_info({name})"),
                    &[],
                    &QueryOptions::default(),
                )
                .await?;
            if info.rows.len() == 1 {
                unique.push(text_of(&info.rows[0], "name"));
            }
        }
        Ok(unique)
    }
}

fn text_of(row: &Row, key: &str) -> String {
    match row.get(key) {
        Some(Value::Text(text)) => text.clone(),
        Some(other) => other.to_json().to_string().trim_matches('"').to_string(),
        None => String::new(),
    }
}

fn int_of(row: &Row, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Int(value)) => *value,
        Some(Value::Bool(value)) => i64::from(*value),
        _ => 0,
    }
}

/// Parses the subsecond precision out of a declared type such as
/// `DATETIME(3)`.
fn parse_precision(column_type: &str) -> Option<u8> {
    let upper = column_type.to_ascii_uppercase();
    if !upper.starts_with("DATETIME") && !upper.starts_with("TIMESTAMP") {
        return None;
    }
    let start = upper.find('(')? + 1;
    let end = upper.find(')')?;
    upper.get(start..end)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let driver = SqliteDriver::connect(":memory:", None).await.unwrap();
        let result = driver
            .query("SELECT 1 AS one", &[], &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("one"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_connect_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grimoire.db");
        let driver = SqliteDriver::connect(path.to_str().unwrap(), None)
            .await
            .unwrap();
        driver
            .query(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT)",
                &[],
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_insert_reports_insert_id() {
        let driver = SqliteDriver::connect(":memory:", None).await.unwrap();
        driver
            .query(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)",
                &[],
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        let result = driver
            .query(
                "INSERT INTO notes (body) VALUES (?)",
                &[Value::Text(String::from("hello"))],
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(result.insert_id, Some(1));
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let driver = SqliteDriver::connect(":memory:", None).await.unwrap();
        driver
            .query(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)",
                &[],
                &QueryOptions::default(),
            )
            .await
            .unwrap();

        let tx = driver.begin().await.unwrap();
        driver
            .query(
                "INSERT INTO notes (body) VALUES (?)",
                &[Value::Text(String::from("doomed"))],
                &QueryOptions {
                    connection: Some(tx),
                },
            )
            .await
            .unwrap();
        driver.rollback(tx).await.unwrap();

        let result = driver
            .query("SELECT * FROM notes", &[], &QueryOptions::default())
            .await
            .unwrap();
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_schema_info() {
        let driver = SqliteDriver::connect(":memory:", None).await.unwrap();
        driver
            .query(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL, slug TEXT UNIQUE)",
                &[],
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        let info = driver
            .query_schema_info(&[String::from("notes")])
            .await
            .unwrap();
        let columns = &info["notes"];
        assert_eq!(columns.len(), 3);
        let body = columns.iter().find(|c| c.column_name == "body").unwrap();
        assert!(!body.allow_null);
        let slug = columns.iter().find(|c| c.column_name == "slug").unwrap();
        assert!(slug.unique);
    }

    #[test]
    fn test_parse_precision() {
        assert_eq!(parse_precision("DATETIME(3)"), Some(3));
        assert_eq!(parse_precision("DATETIME"), None);
        assert_eq!(parse_precision("TEXT"), None);
    }
}
