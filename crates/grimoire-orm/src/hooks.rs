//! Lifecycle hooks.
//!
//! Hooks form a typed event table: a fixed enumeration of events, each
//! holding an insertion-ordered list of named handlers. Dispatch awaits
//! handlers sequentially in registration order; a handler error aborts the
//! surrounding mutation and propagates.

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

use crate::bone::Bone;
use crate::error::Result;
use crate::spell::Spell;

/// The hook events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeSave,
    AfterSave,
    BeforeRemove,
    AfterRemove,
    BeforeDestroy,
    AfterDestroy,
    BeforeUpsert,
    AfterUpsert,
    BeforeBulkCreate,
    AfterBulkCreate,
    BeforeBulkUpdate,
    AfterBulkUpdate,
    BeforeBulkDestroy,
    AfterBulkDestroy,
}

/// A handler over the instance being persisted.
pub type InstanceHook =
    Arc<dyn for<'a> Fn(&'a mut Bone) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// A handler over a bulk operation's Spell, free to mutate it in place.
pub type BulkHook =
    Arc<dyn for<'a> Fn(&'a mut Spell) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// A registered handler.
#[derive(Clone)]
pub enum Hook {
    /// Runs against the entity instance.
    Instance(InstanceHook),
    /// Runs against the bulk Spell.
    Bulk(BulkHook),
}

struct NamedHook {
    kind: HookKind,
    name: String,
    hook: Hook,
}

/// The per-model hook table.
///
/// Registration is expected at startup but stays safe at any point;
/// registering the same handler twice runs it twice.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<NamedHook>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under the given event.
    pub fn add(&self, kind: HookKind, name: impl Into<String>, hook: Hook) {
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .push(NamedHook {
                kind,
                name: name.into(),
                hook,
            });
    }

    /// Registers an instance handler from a plain async closure.
    pub fn add_instance<F>(&self, kind: HookKind, name: impl Into<String>, hook: F)
    where
        F: for<'a> Fn(&'a mut Bone) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.add(kind, name, Hook::Instance(Arc::new(hook)));
    }

    /// Registers a bulk handler from a plain async closure.
    pub fn add_bulk<F>(&self, kind: HookKind, name: impl Into<String>, hook: F)
    where
        F: for<'a> Fn(&'a mut Spell) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.add(kind, name, Hook::Bulk(Arc::new(hook)));
    }

    /// Removes every handler registered under `name` for the event.
    pub fn remove(&self, kind: HookKind, name: &str) {
        self.hooks
            .write()
            .expect("hook registry poisoned")
            .retain(|h| !(h.kind == kind && h.name == name));
    }

    /// Returns the handlers for an event, in registration order.
    #[must_use]
    pub fn handlers(&self, kind: HookKind) -> Vec<Hook> {
        self.hooks
            .read()
            .expect("hook registry poisoned")
            .iter()
            .filter(|h| h.kind == kind)
            .map(|h| h.hook.clone())
            .collect()
    }

    /// Dispatches the event against an instance, sequentially.
    pub async fn dispatch_instance(&self, kind: HookKind, bone: &mut Bone) -> Result<()> {
        for hook in self.handlers(kind) {
            if let Hook::Instance(f) = hook {
                f(bone).await?;
            }
        }
        Ok(())
    }

    /// Dispatches the event against a bulk Spell, sequentially.
    pub async fn dispatch_bulk(&self, kind: HookKind, spell: &mut Spell) -> Result<()> {
        for hook in self.handlers(kind) {
            if let Hook::Bulk(f) = hook {
                f(spell).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read().expect("hook registry poisoned");
        f.debug_struct("HookRegistry")
            .field("count", &hooks.len())
            .finish()
    }
}
