//! The migration ledger.
//!
//! Applied migrations are recorded in the `leoric_meta` table, one row
//! per migration name. `up` inserts the row, `down` removes it.

use std::sync::Arc;

use grimoire_orm::driver::{Driver, QueryOptions};
use grimoire_sql_core::value::Value;

use crate::error::Result;

/// The default ledger table name.
pub const LEDGER_TABLE: &str = "leoric_meta";

/// Tracks which migrations have been applied.
pub struct Ledger {
    driver: Arc<dyn Driver>,
    table: String,
}

impl Ledger {
    /// Creates a ledger over the default table.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_table(driver, LEDGER_TABLE)
    }

    /// Creates a ledger over a custom table.
    #[must_use]
    pub fn with_table(driver: Arc<dyn Driver>, table: impl Into<String>) -> Self {
        Self {
            driver,
            table: table.into(),
        }
    }

    fn quoted_table(&self) -> String {
        self.driver.dialect().quote(&self.table)
    }

    /// Ensures the ledger table exists; idempotent.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (name VARCHAR(255) NOT NULL UNIQUE)",
            self.quoted_table()
        );
        self.driver
            .query(&sql, &[], &QueryOptions::default())
            .await?;
        Ok(())
    }

    /// Records a migration as applied.
    pub async fn record_applied(&self, name: &str) -> Result<()> {
        self.insert(name, &QueryOptions::default()).await
    }

    /// Records a migration as applied, on a transaction's pinned
    /// connection so the row commits with the migration itself.
    pub async fn record_applied_in(&self, name: &str, connection: u64) -> Result<()> {
        self.insert(
            name,
            &QueryOptions {
                connection: Some(connection),
            },
        )
        .await
    }

    /// Removes a migration's record (rollback).
    pub async fn record_unapplied(&self, name: &str) -> Result<()> {
        self.delete(name, &QueryOptions::default()).await
    }

    /// Removes a migration's record on a transaction's pinned connection.
    pub async fn record_unapplied_in(&self, name: &str, connection: u64) -> Result<()> {
        self.delete(
            name,
            &QueryOptions {
                connection: Some(connection),
            },
        )
        .await
    }

    async fn insert(&self, name: &str, options: &QueryOptions) -> Result<()> {
        let sql = format!("INSERT INTO {} (name) VALUES (?)", self.quoted_table());
        self.driver
            .query(&sql, &[Value::Text(String::from(name))], options)
            .await?;
        Ok(())
    }

    async fn delete(&self, name: &str, options: &QueryOptions) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE name = ?", self.quoted_table());
        self.driver
            .query(&sql, &[Value::Text(String::from(name))], options)
            .await?;
        Ok(())
    }

    /// Returns whether a migration has been applied.
    pub async fn is_applied(&self, name: &str) -> Result<bool> {
        Ok(self.applied().await?.iter().any(|n| n == name))
    }

    /// Returns every applied migration name, in name order.
    pub async fn applied(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT name FROM {} ORDER BY name", self.quoted_table());
        let result = self
            .driver
            .query(&sql, &[], &QueryOptions::default())
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| match row.get("name") {
                Some(Value::Text(name)) => Some(name.clone()),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_orm::SqliteDriver;

    async fn ledger() -> Ledger {
        let driver = SqliteDriver::connect(":memory:", None).await.unwrap();
        let ledger = Ledger::new(Arc::new(driver));
        ledger.ensure_table().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let ledger = ledger().await;
        ledger.ensure_table().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_check() {
        let ledger = ledger().await;
        assert!(!ledger.is_applied("20171212000000-create-posts").await.unwrap());

        ledger
            .record_applied("20171212000000-create-posts")
            .await
            .unwrap();
        assert!(ledger.is_applied("20171212000000-create-posts").await.unwrap());

        ledger
            .record_unapplied("20171212000000-create-posts")
            .await
            .unwrap();
        assert!(!ledger.is_applied("20171212000000-create-posts").await.unwrap());
    }

    #[tokio::test]
    async fn test_applied_ordering() {
        let ledger = ledger().await;
        ledger
            .record_applied("20200101000000-later")
            .await
            .unwrap();
        ledger
            .record_applied("20171212000000-earlier")
            .await
            .unwrap();
        assert_eq!(
            ledger.applied().await.unwrap(),
            vec![
                String::from("20171212000000-earlier"),
                String::from("20200101000000-later"),
            ]
        );
    }
}
