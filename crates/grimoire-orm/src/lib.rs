//! # grimoire-orm
//!
//! The object-mapping runtime of grimoire: declarative model definitions,
//! the composable [`Spell`] query value, the [`Bone`] entity instance with
//! change tracking and lifecycle hooks, the [`Realm`] registry that binds
//! a driver to a set of models, and the [`Collection`] result container.
//!
//! ```ignore
//! use grimoire_orm::{AttributeDef, Config, DataType, ModelDef, Realm};
//! use serde_json::json;
//!
//! let realm = Realm::connect(Config::default()).await?;
//! let post = realm.define(
//!     ModelDef::new("Post")
//!         .table("articles")
//!         .attribute(AttributeDef::new("id", DataType::BigInt).primary_key().auto_increment())
//!         .attribute(AttributeDef::new("title", DataType::string()))
//!         .attribute(AttributeDef::new("created_at", DataType::datetime()))
//!         .attribute(AttributeDef::new("updated_at", DataType::datetime()))
//!         .attribute(AttributeDef::new("deleted_at", DataType::datetime())),
//! )?;
//! post.sync(Default::default()).await?;
//!
//! post.create(json!({"title": "New Post"})).await?;
//! let found = post.find(json!({"title": {"$like": "%Post%"}})).all().await?;
//! ```

pub mod associations;
pub mod bone;
pub mod collection;
pub mod condition;
pub mod driver;
pub mod error;
pub mod format;
pub mod hooks;
pub mod model;
pub mod realm;
pub mod spell;

pub use associations::{Association, AssociationKind, IncludeOptions};
pub use bone::{Associated, Bone};
pub use collection::Collection;
pub use condition::{Cond, CondArg, IntoCond, IntoCondArg};
pub use driver::{Driver, Logger, QueryOptions, QueryResult, Row, SqliteDriver, TracingLogger};
pub use error::{Error, Result};
pub use format::SqlFragment;
pub use hooks::{Hook, HookKind, HookRegistry};
pub use model::{AttributeDef, Model, ModelDef, SyncOptions, Values};
pub use realm::{Config, Realm, Transaction};
pub use spell::{
    Batch, BulkOptions, Command, SetValue, Spell, SpellOptions, SpellResult, UpdateOnDuplicate,
};

// The type system is part of the public surface: models are declared with
// these.
pub use grimoire_sql_core::{DataType, Raw, TextSize, ToValue, Value};
