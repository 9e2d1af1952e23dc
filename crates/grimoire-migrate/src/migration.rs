//! Migrations and the runner.
//!
//! A migration pairs a `YYYYMMDDHHMMSS-slug` name with async `up` and
//! `down` steps. The runner applies pending migrations in name order and
//! wraps each one in a transaction: the step runs against a pinned
//! connection, the ledger row is written on that same connection, and the
//! whole thing commits together or rolls back together. A step that fails
//! partway leaves neither half-applied schema nor a stale ledger row.

use std::sync::Arc;

use futures::future::BoxFuture;
use grimoire_orm::driver::{Driver, QueryOptions, QueryResult};
use grimoire_sql_core::value::Value;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::ledger::Ledger;

/// Execution context handed to a migration step: the driver plus the
/// pinned connection of the surrounding transaction.
#[derive(Clone)]
pub struct MigrationContext {
    driver: Arc<dyn Driver>,
    connection: u64,
}

impl MigrationContext {
    /// Returns the underlying driver.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Returns the pinned connection id.
    #[must_use]
    pub const fn connection(&self) -> u64 {
        self.connection
    }

    /// Runs SQL on the transaction's pinned connection.
    pub async fn query(
        &self,
        sql: &str,
        values: &[Value],
    ) -> grimoire_orm::Result<QueryResult> {
        self.driver
            .query(
                sql,
                values,
                &QueryOptions {
                    connection: Some(self.connection),
                },
            )
            .await
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("connection", &self.connection)
            .finish()
    }
}

/// An async migration step, run inside the runner's transaction.
pub type MigrationFn =
    Arc<dyn Fn(MigrationContext) -> BoxFuture<'static, grimoire_orm::Result<()>> + Send + Sync>;

fn name_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{14}-[a-z0-9][a-z0-9-]*$").expect("migration name pattern")
    })
}

/// A single migration.
#[derive(Clone)]
pub struct Migration {
    name: String,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("reversible", &self.down.is_some())
            .finish()
    }
}

impl Migration {
    /// Creates a migration; the name must be `YYYYMMDDHHMMSS-slug`.
    pub fn new(name: impl Into<String>, up: MigrationFn) -> Result<Self> {
        let name: String = name.into();
        if !name_pattern().is_match(&name) {
            return Err(MigrateError::InvalidName(name));
        }
        Ok(Self {
            name,
            up,
            down: None,
        })
    }

    /// Adds the way back.
    #[must_use]
    pub fn down(mut self, down: MigrationFn) -> Self {
        self.down = Some(down);
        self
    }

    /// Returns the migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the migration can be rolled back.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Applies and rolls back migrations against one driver.
pub struct Migrator {
    driver: Arc<dyn Driver>,
    ledger: Ledger,
    migrations: Vec<Migration>,
}

impl Migrator {
    /// Creates a runner over the driver, using the default ledger table.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        let ledger = Ledger::new(Arc::clone(&driver));
        Self {
            driver,
            ledger,
            migrations: Vec::new(),
        }
    }

    /// Registers a migration.
    #[must_use]
    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Runs one step and its ledger write on a pinned connection:
    /// commit on success, rollback and re-raise on failure.
    async fn transact(
        &self,
        step: &MigrationFn,
        name: &str,
        applying: bool,
    ) -> Result<()> {
        let connection = self.driver.begin().await?;
        let context = MigrationContext {
            driver: Arc::clone(&self.driver),
            connection,
        };

        let outcome = async {
            step(context).await?;
            if applying {
                self.ledger.record_applied_in(name, connection).await?;
            } else {
                self.ledger.record_unapplied_in(name, connection).await?;
            }
            Ok::<_, MigrateError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                self.driver.commit(connection).await?;
                Ok(())
            }
            Err(error) => {
                if let Err(rollback_error) = self.driver.rollback(connection).await {
                    warn!(name, %rollback_error, "rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Applies every pending migration in name order, each inside its own
    /// transaction; returns the names applied.
    pub async fn up(&self) -> Result<Vec<String>> {
        self.ledger.ensure_table().await?;
        let applied = self.ledger.applied().await?;

        let mut pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.name))
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));

        let mut ran = Vec::new();
        for migration in pending {
            info!(name = migration.name, "applying migration");
            self.transact(&migration.up, &migration.name, true).await?;
            ran.push(migration.name.clone());
        }
        Ok(ran)
    }

    /// Rolls back the last `step` applied migrations, each inside its own
    /// transaction; returns the names rolled back.
    pub async fn down(&self, step: usize) -> Result<Vec<String>> {
        self.ledger.ensure_table().await?;
        let mut applied = self.ledger.applied().await?;
        applied.reverse();

        let mut ran = Vec::new();
        for name in applied.into_iter().take(step) {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.name == name)
                .ok_or_else(|| MigrateError::UnknownMigration(name.clone()))?;
            let down = migration
                .down
                .clone()
                .ok_or_else(|| MigrateError::Irreversible(name.clone()))?;
            info!(name = migration.name, "rolling back migration");
            self.transact(&down, &migration.name, false).await?;
            ran.push(migration.name.clone());
        }
        Ok(ran)
    }

    /// Returns every known migration with its applied state, in name
    /// order.
    pub async fn status(&self) -> Result<Vec<(String, bool)>> {
        self.ledger.ensure_table().await?;
        let applied = self.ledger.applied().await?;
        let mut status: Vec<(String, bool)> = self
            .migrations
            .iter()
            .map(|m| (m.name.clone(), applied.contains(&m.name)))
            .collect();
        status.sort();
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_orm::SqliteDriver;

    fn create_notes() -> MigrationFn {
        Arc::new(|context| {
            Box::pin(async move {
                context
                    .query(
                        "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)",
                        &[],
                    )
                    .await?;
                Ok(())
            })
        })
    }

    fn drop_notes() -> MigrationFn {
        Arc::new(|context| {
            Box::pin(async move {
                context.query("DROP TABLE notes", &[]).await?;
                Ok(())
            })
        })
    }

    #[test]
    fn test_name_validation() {
        assert!(Migration::new("20171212000000-create-notes", create_notes()).is_ok());
        assert!(matches!(
            Migration::new("create-notes", create_notes()),
            Err(MigrateError::InvalidName(_))
        ));
        assert!(matches!(
            Migration::new("2017-create-notes", create_notes()),
            Err(MigrateError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_up_applies_in_order_and_records() {
        let driver: Arc<dyn Driver> =
            Arc::new(SqliteDriver::connect(":memory:", None).await.unwrap());
        let migrator = Migrator::new(Arc::clone(&driver))
            .migration(
                Migration::new("20171212000000-create-notes", create_notes()).unwrap(),
            )
            .migration(
                Migration::new(
                    "20171213000000-add-column",
                    Arc::new(|context| {
                        Box::pin(async move {
                            context
                                .query("ALTER TABLE notes ADD COLUMN slug TEXT", &[])
                                .await?;
                            Ok(())
                        })
                    }),
                )
                .unwrap(),
            );

        let ran = migrator.up().await.unwrap();
        assert_eq!(ran.len(), 2);
        assert_eq!(ran[0], "20171212000000-create-notes");

        // A second run is a no-op.
        assert!(migrator.up().await.unwrap().is_empty());

        let status = migrator.status().await.unwrap();
        assert!(status.iter().all(|(_, applied)| *applied));
    }

    #[tokio::test]
    async fn test_down_walks_back() {
        let driver: Arc<dyn Driver> =
            Arc::new(SqliteDriver::connect(":memory:", None).await.unwrap());
        let migrator = Migrator::new(Arc::clone(&driver)).migration(
            Migration::new("20171212000000-create-notes", create_notes())
                .unwrap()
                .down(drop_notes()),
        );

        migrator.up().await.unwrap();
        let rolled_back = migrator.down(1).await.unwrap();
        assert_eq!(rolled_back, vec![String::from("20171212000000-create-notes")]);

        let status = migrator.status().await.unwrap();
        assert!(status.iter().all(|(_, applied)| !*applied));
    }

    #[tokio::test]
    async fn test_down_requires_reversible() {
        let driver: Arc<dyn Driver> =
            Arc::new(SqliteDriver::connect(":memory:", None).await.unwrap());
        let migrator = Migrator::new(Arc::clone(&driver)).migration(
            Migration::new("20171212000000-create-notes", create_notes()).unwrap(),
        );
        migrator.up().await.unwrap();
        assert!(matches!(
            migrator.down(1).await,
            Err(MigrateError::Irreversible(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_schema_and_ledger() {
        let driver: Arc<dyn Driver> =
            Arc::new(SqliteDriver::connect(":memory:", None).await.unwrap());
        let migrator = Migrator::new(Arc::clone(&driver)).migration(
            Migration::new(
                "20171212000000-broken",
                Arc::new(|context| {
                    Box::pin(async move {
                        context
                            .query(
                                "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT)",
                                &[],
                            )
                            .await?;
                        // The second statement fails after the first took
                        // effect on the pinned connection.
                        context.query("THIS IS NOT SQL", &[]).await?;
                        Ok(())
                    })
                }),
            )
            .unwrap(),
        );

        assert!(migrator.up().await.is_err());

        // The transaction rolled back: no ledger row, no table.
        let status = migrator.status().await.unwrap();
        assert!(status.iter().all(|(_, applied)| !*applied));
        let leftover = driver
            .query("SELECT * FROM notes", &[], &QueryOptions::default())
            .await;
        assert!(leftover.is_err());
    }

    #[tokio::test]
    async fn test_failed_migration_can_be_retried() {
        let driver: Arc<dyn Driver> =
            Arc::new(SqliteDriver::connect(":memory:", None).await.unwrap());

        let flaky: MigrationFn = Arc::new(|context| {
            Box::pin(async move {
                context
                    .query(
                        "INSERT INTO checkpoints (name) VALUES ('only-once')",
                        &[],
                    )
                    .await?;
                Ok(())
            })
        });

        driver
            .query(
                "CREATE TABLE checkpoints (name TEXT NOT NULL UNIQUE)",
                &[],
                &QueryOptions::default(),
            )
            .await
            .unwrap();

        let migrator = Migrator::new(Arc::clone(&driver))
            .migration(Migration::new("20171212000000-checkpoint", flaky).unwrap());

        // First run applies and records; the checkpoint row exists once.
        migrator.up().await.unwrap();
        let rows = driver
            .query("SELECT name FROM checkpoints", &[], &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);

        // Re-running is a no-op because the ledger row committed with it.
        migrator.up().await.unwrap();
        let rows = driver
            .query("SELECT name FROM checkpoints", &[], &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.rows.len(), 1);
    }
}
