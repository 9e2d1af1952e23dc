//! The Realm: a registry binding one driver to a set of models.
//!
//! Nothing is process-global. A realm owns its driver and its model
//! registry, so multiple realms with different databases coexist
//! naturally. Transactions pin one pooled connection and propagate it to
//! Spells through a task-local, so code inside the body needs no
//! plumbing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use grimoire_sql_core::value::Value;
use serde::Deserialize;

use crate::driver::{Driver, Logger, QueryOptions, QueryResult, SqliteDriver};
use crate::error::{Error, Result};
use crate::model::{Model, ModelDef, SyncOptions};

tokio::task_local! {
    static CURRENT_CONNECTION: Option<u64>;
}

/// Returns the pinned connection of the enclosing transaction scope.
pub(crate) fn current_connection() -> Option<u64> {
    CURRENT_CONNECTION.try_with(|connection| *connection).ok().flatten()
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target dialect: `mysql`, `postgres`, `sqlite` or `sqljs`.
    pub dialect: String,
    /// Database server host.
    pub host: String,
    /// Database server port; 0 picks the dialect default.
    pub port: u16,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database (schema) name.
    pub database: String,
    /// SQLite storage path; `:memory:` for the in-memory variant.
    pub storage: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: String::from("sqlite"),
            host: String::from("127.0.0.1"),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            storage: String::from(":memory:"),
        }
    }
}

impl Config {
    /// An in-memory SQLite configuration, handy in tests.
    #[must_use]
    pub fn sqlite_in_memory() -> Self {
        Self::default()
    }

    fn dsn(&self, scheme: &str, default_port: u16) -> String {
        let port = if self.port == 0 { default_port } else { self.port };
        format!(
            "{scheme}://{}:{}@{}:{port}/{}",
            self.user, self.password, self.host, self.database
        )
    }
}

/// A handle on an open transaction.
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    /// Returns the pinned connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Shared state behind a realm and every model handle it issued.
pub struct RealmCore {
    config: Config,
    driver: OnceLock<Arc<dyn Driver>>,
    logger: Mutex<Option<Arc<dyn Logger>>>,
    models: RwLock<HashMap<String, Arc<ModelDef>>>,
}

impl std::fmt::Debug for RealmCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmCore")
            .field("dialect", &self.config.dialect)
            .field("connected", &self.driver.get().is_some())
            .finish()
    }
}

impl RealmCore {
    /// Returns the connected driver.
    pub fn driver(&self) -> Result<Arc<dyn Driver>> {
        self.driver
            .get()
            .cloned()
            .ok_or_else(|| Error::Configuration(String::from("missing driver, connect first")))
    }

    /// Looks a registered model up by name.
    #[must_use]
    pub fn model(self: &Arc<Self>, name: &str) -> Option<Model> {
        let defs = self.models.read().expect("model registry poisoned");
        defs.get(name)
            .map(|def| Model::new(Arc::clone(def), Arc::clone(self)))
    }
}

/// A realm: one driver, one model registry.
#[derive(Debug, Clone)]
pub struct Realm {
    core: Arc<RealmCore>,
}

impl Realm {
    /// Creates an unconnected realm.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            core: Arc::new(RealmCore {
                config,
                driver: OnceLock::new(),
                logger: Mutex::new(None),
                models: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates a realm and connects it.
    pub async fn connect(config: Config) -> Result<Self> {
        let realm = Self::new(config);
        realm.establish().await?;
        Ok(realm)
    }

    /// Installs a query logger; must run before connecting.
    #[must_use]
    pub fn logger(self, logger: Arc<dyn Logger>) -> Self {
        *self.core.logger.lock().expect("logger slot poisoned") = Some(logger);
        self
    }

    /// Connects the driver; connecting twice fails.
    pub async fn establish(&self) -> Result<()> {
        if self.core.driver.get().is_some() {
            return Err(Error::Configuration(String::from("connected already")));
        }
        let config = &self.core.config;
        let logger = self.core.logger.lock().expect("logger slot poisoned").clone();

        let driver: Arc<dyn Driver> = match config.dialect.as_str() {
            "sqlite" | "sqlite3" => {
                let storage = if config.storage.is_empty() {
                    ":memory:"
                } else {
                    &config.storage
                };
                Arc::new(SqliteDriver::connect(storage, logger).await?)
            }
            "sqljs" => Arc::new(SqliteDriver::connect(":memory:", logger).await?),
            #[cfg(feature = "mysql")]
            "mysql" | "mariadb" => Arc::new(
                crate::driver::MysqlDriver::connect(
                    &config.dsn("mysql", 3306),
                    &config.database,
                    logger,
                )
                .await?,
            ),
            #[cfg(feature = "postgres")]
            "postgres" | "postgresql" => Arc::new(
                crate::driver::PostgresDriver::connect(&config.dsn("postgres", 5432), logger)
                    .await?,
            ),
            #[cfg(not(feature = "mysql"))]
            "mysql" | "mariadb" => {
                return Err(Error::Configuration(String::from(
                    "mysql support is not enabled, build with the `mysql` feature",
                )))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" | "postgresql" => {
                return Err(Error::Configuration(String::from(
                    "postgres support is not enabled, build with the `postgres` feature",
                )))
            }
            other => {
                return Err(Error::Configuration(format!("unknown dialect \"{other}\"")))
            }
        };

        self.core
            .driver
            .set(driver)
            .map_err(|_| Error::Configuration(String::from("connected already")))
    }

    /// Registers a model definition and returns its handle.
    pub fn define(&self, def: ModelDef) -> Result<Model> {
        def.validate()?;
        let name = def.name.clone();
        let def = Arc::new(def);
        {
            let mut models = self.core.models.write().expect("model registry poisoned");
            if models.contains_key(&name) {
                return Err(Error::Definition(format!("duplicate model \"{name}\"")));
            }
            models.insert(name.clone(), Arc::clone(&def));
        }
        Ok(Model::new(def, Arc::clone(&self.core)))
    }

    /// Looks a registered model up by name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<Model> {
        self.core.model(name)
    }

    /// Returns the names of every registered model.
    #[must_use]
    pub fn models(&self) -> Vec<String> {
        let defs = self.core.models.read().expect("model registry poisoned");
        let mut names: Vec<String> = defs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the connected driver.
    pub fn driver(&self) -> Result<Arc<dyn Driver>> {
        self.core.driver()
    }

    /// Synchronizes every registered model's table.
    pub async fn sync(&self, options: SyncOptions) -> Result<()> {
        for name in self.models() {
            if let Some(model) = self.model(&name) {
                model.sync(options).await?;
            }
        }
        Ok(())
    }

    /// Runs raw SQL through the driver, honoring the transaction scope.
    pub async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult> {
        let driver = self.core.driver()?;
        let options = QueryOptions {
            connection: current_connection(),
        };
        driver.query(sql, values, &options).await
    }

    /// Runs the body on one pinned connection: BEGIN first, COMMIT on
    /// `Ok`, ROLLBACK and re-raise on `Err`.
    ///
    /// Spells built inside the body route through the pinned connection
    /// automatically; nested calls reuse the enclosing connection.
    pub async fn transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(id) = current_connection() {
            // Already inside a transaction scope; share its connection.
            return body(Transaction { id }).await;
        }

        let driver = self.core.driver()?;
        let id = driver.begin().await?;
        let outcome = CURRENT_CONNECTION
            .scope(Some(id), body(Transaction { id }))
            .await;
        match outcome {
            Ok(value) => {
                driver.commit(id).await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = driver.rollback(id).await {
                    tracing::warn!(%rollback_error, "rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Tears the driver down. The realm can be dropped afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(driver) = self.core.driver.get() {
            driver.close().await?;
        }
        Ok(())
    }
}

impl Model {
    /// Runs the body in a transaction on the owning realm's driver.
    pub async fn transaction<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let realm = Realm {
            core: Arc::clone(self.realm_core()),
        };
        realm.transaction(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_connect_fails() {
        let realm = Realm::new(Config::default());
        realm.establish().await.unwrap();
        let err = realm.establish().await.unwrap_err();
        assert!(err.to_string().contains("connected already"));
    }

    #[tokio::test]
    async fn test_unknown_dialect_fails() {
        let realm = Realm::new(Config {
            dialect: String::from("oracle"),
            ..Config::default()
        });
        let err = realm.establish().await.unwrap_err();
        assert!(err.to_string().contains("unknown dialect"));
    }

    #[tokio::test]
    async fn test_missing_driver_fails() {
        let realm = Realm::new(Config::default());
        let err = realm.driver().unwrap_err();
        assert!(err.to_string().contains("missing driver"));
    }

    #[tokio::test]
    async fn test_raw_query() {
        let realm = Realm::connect(Config::default()).await.unwrap();
        let result = realm.query("SELECT 42 AS answer", &[]).await.unwrap();
        assert_eq!(
            result.rows[0].get("answer"),
            Some(&grimoire_sql_core::Value::Int(42))
        );
    }
}
