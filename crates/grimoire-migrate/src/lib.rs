//! # grimoire-migrate
//!
//! The migration ledger and programmatic runner for grimoire: applied
//! migrations are tracked in the `leoric_meta` table, migration files are
//! named `YYYYMMDDHHMMSS-slug`, and the runner applies or rolls them back
//! in name order, each step inside a transaction together with its ledger
//! row. There is no CLI; embed the [`Migrator`] where you need it.

mod error;
mod ledger;
mod migration;

pub use error::{MigrateError, Result};
pub use ledger::{Ledger, LEDGER_TABLE};
pub use migration::{Migration, MigrationContext, MigrationFn, Migrator};
