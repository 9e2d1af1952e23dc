//! The entity instance.
//!
//! A Bone keeps three parallel maps keyed by column name: `raw` (current
//! values), `raw_previous` (values at last persistence) and `raw_unset`
//! (columns a projection left out). Everything else — change tracking,
//! persistence, serialization — derives from those maps.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use grimoire_sql_core::types::cast;
use grimoire_sql_core::value::{ToValue, Value};
use grimoire_sql_core::Expr;

use crate::driver::Row;
use crate::error::{Error, Result};
use crate::hooks::HookKind;
use crate::model::{Model, Values};
use crate::spell::{Spell, SpellResult};

/// A loaded association.
#[derive(Debug, Clone)]
pub enum Associated {
    /// hasOne / belongsTo.
    One(Box<Bone>),
    /// hasMany, accumulated across joined rows.
    Many(Vec<Bone>),
}

/// An entity instance: one row's representation with lifecycle state.
#[derive(Debug, Clone)]
pub struct Bone {
    model: Model,
    raw: HashMap<String, Value>,
    raw_previous: HashMap<String, Value>,
    raw_unset: HashSet<String>,
    previous_changes: HashMap<String, (Value, Value)>,
    associated: Vec<(String, Associated)>,
}

impl Bone {
    /// Creates a new, unpersisted instance from attribute values.
    ///
    /// Values go through the normal accessor, so casts fire and unknown
    /// attributes fail.
    pub fn new(model: Model, values: Values) -> Result<Self> {
        let mut bone = Self {
            model,
            raw: HashMap::new(),
            raw_previous: HashMap::new(),
            raw_unset: HashSet::new(),
            previous_changes: HashMap::new(),
            associated: Vec::new(),
        };
        for (name, value) in values.0 {
            bone.set_attribute(&name, value)?;
        }
        Ok(bone)
    }

    /// Hydrates an instance from a database row, keyed by column name.
    ///
    /// Casts apply but setter side effects do not; `raw_previous` is
    /// seeded equal to `raw`, and absent columns are marked unset.
    pub fn instantiate(model: Model, row: &Row) -> Result<Self> {
        let mut raw = HashMap::new();
        let mut raw_unset = HashSet::new();
        for attribute in &model.def().attributes {
            match row.get(&attribute.column_name) {
                Some(value) => {
                    let value = cast(value.clone(), &attribute.data_type)?;
                    raw.insert(attribute.column_name.clone(), value);
                }
                None if attribute.is_virtual() => {}
                None => {
                    raw_unset.insert(attribute.column_name.clone());
                }
            }
        }
        Ok(Self {
            model,
            raw_previous: raw.clone(),
            raw,
            raw_unset,
            previous_changes: HashMap::new(),
            associated: Vec::new(),
        })
    }

    /// Returns the owning model handle.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn column_of(&self, name: &str) -> Result<(String, grimoire_sql_core::DataType)> {
        self.model
            .def()
            .find_attribute(name)
            .map(|a| (a.column_name.clone(), a.data_type.clone()))
            .ok_or_else(|| {
                Error::Logical(format!(
                    "no attribute \"{name}\" on model {}",
                    self.model.def().name
                ))
            })
    }

    /// Reads an attribute; unset and unknown attributes fail.
    pub fn attribute(&self, name: &str) -> Result<Value> {
        let (column, _) = self.column_of(name)?;
        if self.raw_unset.contains(&column) {
            return Err(Error::Logical(format!("unset attribute \"{name}\"")));
        }
        Ok(self.raw.get(&column).cloned().unwrap_or(Value::Null))
    }

    /// Writes an attribute through the cast codec; clears the unset flag.
    pub fn set_attribute(&mut self, name: &str, value: impl ToValue) -> Result<()> {
        let (column, data_type) = self.column_of(name)?;
        let value = cast(value.to_value(), &data_type)?;
        self.raw_unset.remove(&column);
        self.raw.insert(column, value);
        Ok(())
    }

    /// Alias of [`Bone::attribute`].
    pub fn get(&self, name: &str) -> Result<Value> {
        self.attribute(name)
    }

    /// Alias of [`Bone::set_attribute`].
    pub fn set(&mut self, name: &str, value: impl ToValue) -> Result<()> {
        self.set_attribute(name, value)
    }

    /// Reads the raw stored value without cast or unset checks.
    #[must_use]
    pub fn get_data_value(&self, name: &str) -> Option<&Value> {
        let column = self.model.def().column_of(name)?;
        self.raw.get(column)
    }

    /// Writes the raw stored value without the cast codec.
    pub fn set_data_value(&mut self, name: &str, value: impl ToValue) -> Result<()> {
        let (column, _) = self.column_of(name)?;
        self.raw_unset.remove(&column);
        self.raw.insert(column, value.to_value());
        Ok(())
    }

    /// Returns whether the model declares the attribute.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.model.def().find_attribute(name).is_some()
    }

    /// Returns the value the attribute had at last persistence.
    pub fn attribute_was(&self, name: &str) -> Result<Value> {
        let (column, _) = self.column_of(name)?;
        Ok(self
            .raw_previous
            .get(&column)
            .cloned()
            .unwrap_or(Value::Null))
    }

    // ---- change tracking -----------------------------------------------

    /// Returns whether any attribute differs from its last-persisted
    /// value.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Returns whether the named attribute differs from its
    /// last-persisted value.
    #[must_use]
    pub fn changed_attribute(&self, name: &str) -> bool {
        self.changes().contains_key(name)
    }

    /// Returns `{attribute: (previous, current)}` for every dirty
    /// attribute.
    #[must_use]
    pub fn changes(&self) -> HashMap<String, (Value, Value)> {
        let mut changes = HashMap::new();
        for attribute in &self.model.def().attributes {
            let column = &attribute.column_name;
            if self.raw_unset.contains(column) {
                continue;
            }
            let current = self.raw.get(column).cloned().unwrap_or(Value::Null);
            let previous = self.raw_previous.get(column).cloned().unwrap_or(Value::Null);
            if current != previous {
                changes.insert(attribute.name.clone(), (previous, current));
            }
        }
        changes
    }

    /// Returns what changed between the prior and most recent
    /// persistence.
    #[must_use]
    pub fn previous_changes(&self) -> &HashMap<String, (Value, Value)> {
        &self.previous_changes
    }

    /// Returns the attributes the most recent persistence wrote, or an
    /// empty list.
    #[must_use]
    pub fn previous_changed(&self) -> Vec<String> {
        let mut names: Vec<String> = self.previous_changes.keys().cloned().collect();
        names.sort();
        names
    }

    // ---- persistence state ---------------------------------------------

    /// Returns the primary key value, if set and non-null.
    #[must_use]
    pub fn primary_key_value(&self) -> Option<Value> {
        let column = self.model.def().primary_column();
        match self.raw.get(column) {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => None,
        }
    }

    pub(crate) fn set_primary_key(&mut self, value: Value) -> Result<()> {
        let name = self.model.def().primary_key.clone();
        self.set_attribute(&name, value)
    }

    /// Returns whether the instance was never persisted.
    #[must_use]
    pub fn is_new(&self) -> bool {
        let column = self.model.def().primary_column();
        !matches!(self.raw_previous.get(column), Some(value) if !value.is_null())
    }

    pub(crate) fn mark_persisted(&mut self) {
        let mut changes = HashMap::new();
        for attribute in &self.model.def().attributes {
            let column = &attribute.column_name;
            let current = self.raw.get(column).cloned().unwrap_or(Value::Null);
            let previous = self.raw_previous.get(column).cloned().unwrap_or(Value::Null);
            if current != previous {
                changes.insert(attribute.name.clone(), (previous, current));
            }
        }
        self.previous_changes = changes;
        self.raw_previous = self.raw.clone();
    }

    // ---- persistence ----------------------------------------------------

    /// Persists the instance: INSERT when new, UPDATE when loaded, UPSERT
    /// when constructed with an explicit primary key.
    pub async fn save(&mut self) -> Result<()> {
        if self.primary_key_value().is_none() {
            if self.is_new() {
                self.insert().await?;
                return Ok(());
            }
            return Err(Error::Integrity(format!(
                "primary key is missing on save of {}",
                self.model.def().name
            )));
        }
        if self.is_new() {
            self.upsert().await?;
        } else {
            let changes = self.changes();
            let values: Values = changes
                .into_iter()
                .map(|(name, (_, current))| (name, current))
                .collect();
            self.update(values).await?;
        }
        Ok(())
    }

    fn stamp_timestamps(&mut self, with_created: bool) -> Result<()> {
        let now = Utc::now();
        let def = self.model.def().clone();
        if with_created {
            if let Some(attribute) = def.created_at() {
                if self.raw.get(&attribute.column_name).is_none_or(Value::is_null) {
                    self.set_attribute("created_at", Value::DateTime(now))?;
                }
            }
        }
        if def.updated_at().is_some() {
            self.set_attribute("updated_at", Value::DateTime(now))?;
        }
        Ok(())
    }

    /// Collects the persistable attribute values, in declaration order.
    fn persistable_values(&self) -> Values {
        let mut values = Values::new();
        for attribute in &self.model.def().attributes {
            if attribute.is_virtual() || self.raw_unset.contains(&attribute.column_name) {
                continue;
            }
            if let Some(value) = self.raw.get(&attribute.column_name) {
                values = values.set(attribute.name.clone(), value.clone());
            }
        }
        values
    }

    /// Appends `pk = value` plus the sharding key, so instance mutations
    /// never need to restate it.
    fn identity_where(&self) -> Result<Expr> {
        let def = self.model.def();
        let pk = self
            .primary_key_value()
            .ok_or_else(|| {
                Error::Integrity(format!("primary key is missing on {}", def.name))
            })?;
        let mut cond = Expr::column(def.primary_key.clone()).eq(Expr::Literal(pk));
        if let Some(key) = &def.sharding_key {
            let value = self.attribute(key)?;
            if value.is_null() {
                return Err(Error::Integrity(format!(
                    "sharding key {key} is missing on {}",
                    def.name
                )));
            }
            cond = cond.and(Expr::column(key.clone()).eq(Expr::Literal(value)));
        }
        Ok(cond)
    }

    async fn insert(&mut self) -> Result<()> {
        let def = self.model.def().clone();
        def.hooks
            .dispatch_instance(HookKind::BeforeCreate, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::BeforeSave, self)
            .await?;
        self.stamp_timestamps(true)?;

        let mut spell = Spell::insert(self.model.clone(), self.persistable_values());
        spell.options.skip_hooks = true;
        if let SpellResult::Affected { insert_id, .. } = spell.run().await? {
            if self.primary_key_value().is_none() {
                if let Some(id) = insert_id {
                    self.set_primary_key(Value::Int(id))?;
                }
            }
        }
        self.mark_persisted();

        def.hooks
            .dispatch_instance(HookKind::AfterCreate, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::AfterSave, self)
            .await?;
        Ok(())
    }

    /// Persists the given values (or the pending changes when empty) and
    /// returns the affected row count.
    ///
    /// With nothing to persist this is a complete no-op: no statement
    /// runs and no hooks fire, so before/after always come as a pair.
    pub async fn update(&mut self, values: Values) -> Result<u64> {
        let def = self.model.def().clone();
        for (name, value) in values.0.clone() {
            self.set_attribute(&name, value)?;
        }
        if self.changes().is_empty() {
            return Ok(0);
        }

        def.hooks
            .dispatch_instance(HookKind::BeforeUpdate, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::BeforeSave, self)
            .await?;

        self.stamp_timestamps(false)?;
        let changes = self.changes();
        let sets: Values = changes
            .into_iter()
            .map(|(name, (_, current))| (name, current))
            .collect();

        let spell = Spell::new(self.model.clone(), crate::spell::Command::Select)
            .where_(self.identity_where()?)
            .update(sets)
            .silent(true)
            .hooks(false);
        let affected = spell.execute().await?;
        self.mark_persisted();

        def.hooks
            .dispatch_instance(HookKind::AfterUpdate, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::AfterSave, self)
            .await?;
        Ok(affected)
    }

    /// Inserts or updates by unique key in one statement.
    ///
    /// Returns the driver-reported affected rows: MySQL reports 2 when
    /// the update branch ran (and may report 0 when nothing changed);
    /// other dialects report 1.
    pub async fn upsert(&mut self) -> Result<u64> {
        let def = self.model.def().clone();
        def.hooks
            .dispatch_instance(HookKind::BeforeUpsert, self)
            .await?;
        self.stamp_timestamps(true)?;

        let mut spell = Spell::upsert_row(self.model.clone(), self.persistable_values());
        spell.options.skip_hooks = true;
        let mut affected = 0;
        if let SpellResult::Affected { rows, insert_id } = spell.run().await? {
            affected = rows;
            if self.primary_key_value().is_none() {
                if let Some(id) = insert_id {
                    self.set_primary_key(Value::Int(id))?;
                }
            }
        }
        self.mark_persisted();

        def.hooks
            .dispatch_instance(HookKind::AfterUpsert, self)
            .await?;
        Ok(affected)
    }

    /// Removes the row: soft-deletes when the model is paranoid, deletes
    /// physically otherwise or when `force` is set.
    pub async fn remove(&mut self, force: bool) -> Result<u64> {
        let def = self.model.def().clone();
        def.hooks
            .dispatch_instance(HookKind::BeforeRemove, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::BeforeDestroy, self)
            .await?;

        let spell = Spell::new(self.model.clone(), crate::spell::Command::Select)
            .where_(self.identity_where()?)
            .delete(force)
            .hooks(false);
        let affected = spell.execute().await?;

        if !force && def.is_paranoid() {
            self.set_attribute("deleted_at", Value::DateTime(Utc::now()))?;
            self.mark_persisted();
        }

        def.hooks
            .dispatch_instance(HookKind::AfterRemove, self)
            .await?;
        def.hooks
            .dispatch_instance(HookKind::AfterDestroy, self)
            .await?;
        Ok(affected)
    }

    /// Clears `deleted_at`; fails unless the model is paranoid.
    pub async fn restore(&mut self) -> Result<u64> {
        let def = self.model.def().clone();
        if !def.is_paranoid() {
            return Err(Error::Integrity(format!(
                "Model {} is not paranoid",
                def.name
            )));
        }
        let spell = Spell::new(self.model.clone(), crate::spell::Command::Select)
            .unscoped()
            .where_(self.identity_where()?)
            .update(Values::new().set("deleted_at", Value::Null))
            .hooks(false);
        let affected = spell.execute().await?;
        self.set_attribute("deleted_at", Value::Null)?;
        self.mark_persisted();
        Ok(affected)
    }

    /// Re-reads the row by primary key and replaces the instance state.
    pub async fn reload(&mut self) -> Result<()> {
        let fresh = Spell::new(self.model.clone(), crate::spell::Command::Select)
            .unparanoid()
            .where_(self.identity_where()?)
            .first()
            .await?;
        match fresh {
            Some(bone) => {
                self.raw = bone.raw;
                self.raw_previous = bone.raw_previous;
                self.raw_unset = bone.raw_unset;
                Ok(())
            }
            None => Err(Error::Driver {
                message: format!("row of {} is gone", self.model.def().name),
                sql: String::new(),
            }),
        }
    }

    // ---- serialization -------------------------------------------------

    pub(crate) fn attach(&mut self, alias: &str, child: Bone, collection: bool) {
        if collection {
            match self
                .associated
                .iter_mut()
                .find(|(name, _)| name == alias)
            {
                Some((_, Associated::Many(children))) => {
                    let child_pk = child.primary_key_value();
                    let duplicate = children
                        .iter()
                        .any(|existing| existing.primary_key_value() == child_pk);
                    if !duplicate {
                        children.push(child);
                    }
                }
                Some(_) => {}
                None => self
                    .associated
                    .push((String::from(alias), Associated::Many(vec![child]))),
            }
        } else if !self.associated.iter().any(|(name, _)| name == alias) {
            self.associated
                .push((String::from(alias), Associated::One(Box::new(child))));
        }
    }

    /// Returns the loaded association, if any.
    #[must_use]
    pub fn associated(&self, name: &str) -> Option<&Associated> {
        self.associated
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// Returns the raw row, keyed by column name.
    #[must_use]
    pub fn row(&self) -> Row {
        self.raw.clone()
    }

    /// Serializes to JSON, omitting null attributes; loaded associations
    /// serialize recursively.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.serialize(false)
    }

    /// Serializes to a plain object, including null attributes.
    #[must_use]
    pub fn to_object(&self) -> serde_json::Value {
        self.serialize(true)
    }

    fn serialize(&self, include_nulls: bool) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for attribute in &self.model.def().attributes {
            let column = &attribute.column_name;
            if self.raw_unset.contains(column) {
                continue;
            }
            let value = self.raw.get(column).cloned().unwrap_or(Value::Null);
            if value.is_null() && !include_nulls {
                continue;
            }
            map.insert(attribute.name.clone(), value.to_json());
        }
        for (name, associated) in &self.associated {
            let value = match associated {
                Associated::One(child) => child.serialize(include_nulls),
                Associated::Many(children) => serde_json::Value::Array(
                    children
                        .iter()
                        .map(|child| child.serialize(include_nulls))
                        .collect(),
                ),
            };
            map.insert(name.clone(), value);
        }
        serde_json::Value::Object(map)
    }
}
