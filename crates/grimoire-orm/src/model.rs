//! Model definitions and the class-level query surface.
//!
//! A [`ModelDef`] is the declarative entity descriptor: table, attributes,
//! timestamps, sharding key, associations, scopes and hooks. A [`Model`]
//! pairs a definition with the realm that owns the driver and exposes the
//! query builders and persistence primitives.

use std::collections::HashMap;
use std::sync::Arc;

use grimoire_sql_core::types::{uncast, DataType};
use grimoire_sql_core::value::{ToValue, Value};
use grimoire_sql_core::ColumnInfo;

use crate::associations::{Association, AssociationKind};
use crate::bone::Bone;
use crate::collection::Collection;
use crate::condition::IntoCond;
use crate::error::{Error, Result};
use crate::hooks::{HookKind, HookRegistry};
use crate::realm::RealmCore;
use crate::spell::{BulkOptions, Command, Spell, SpellResult};

/// Converts a name to snake_case.
#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Pluralizes an English table name the simple way.
#[must_use]
pub fn pluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if name.ends_with('s')
        || name.ends_with('x')
        || name.ends_with('z')
        || name.ends_with("ch")
        || name.ends_with("sh")
    {
        return format!("{name}es");
    }
    format!("{name}s")
}

/// A declared attribute.
#[derive(Debug, Clone)]
pub struct AttributeDef {
    /// The attribute name.
    pub name: String,
    /// The column name; snake_case of the attribute name unless overridden.
    pub column_name: String,
    /// The data type.
    pub data_type: DataType,
    /// Whether NULL is allowed.
    pub allow_null: bool,
    /// The default value, if any.
    pub default_value: Option<Value>,
    /// Whether the column carries a unique constraint.
    pub unique: bool,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether the column auto-increments.
    pub auto_increment: bool,
    /// The column comment, if any.
    pub comment: Option<String>,
}

impl AttributeDef {
    /// Creates an attribute of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name: String = name.into();
        let column_name = snake_case(&name);
        Self {
            name,
            column_name,
            data_type,
            allow_null: true,
            default_value: None,
            unique: false,
            primary_key: false,
            auto_increment: false,
            comment: None,
        }
    }

    /// Overrides the column name.
    #[must_use]
    pub fn column_name(mut self, column: impl Into<String>) -> Self {
        self.column_name = column.into();
        self
    }

    /// Sets whether NULL is allowed.
    #[must_use]
    pub const fn allow_null(mut self, allow: bool) -> Self {
        self.allow_null = allow;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl ToValue) -> Self {
        self.default_value = Some(value.to_value());
        self
    }

    /// Marks the column unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks this attribute as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.allow_null = false;
        self
    }

    /// Marks the column as auto-incrementing.
    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the column comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns whether the attribute is persisted at all.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.data_type.is_virtual()
    }
}

/// An ordered bag of attribute values, keyed by attribute name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values(pub Vec<(String, Value)>);

impl Values {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a value.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        let name: String = name.into();
        let value = value.to_value();
        if let Some(entry) = self.0.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.0.push((name, value));
        }
        self
    }

    /// Returns the value for a name, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns whether a name is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns whether the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Value> for Values {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Object(map) => Self(
                map.into_iter()
                    .map(|(name, value)| (name, Value::from_json(value)))
                    .collect(),
            ),
            _ => Self::default(),
        }
    }
}

impl FromIterator<(String, Value)> for Values {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A scope closure applied to a Spell at finalization.
pub type ScopeFn = Arc<dyn Fn(Spell) -> Spell + Send + Sync>;

/// The declarative entity descriptor.
pub struct ModelDef {
    /// The model name, e.g. `Post`.
    pub name: String,
    /// The table name; pluralized snake_case of the name unless overridden.
    pub table: String,
    /// Declared attributes, in declaration order.
    pub attributes: Vec<AttributeDef>,
    /// The primary key attribute name.
    pub primary_key: String,
    /// The sharding key attribute name, if any.
    pub sharding_key: Option<String>,
    /// Physical tables overriding table routing, if any.
    pub physic_tables: Vec<String>,
    /// Declared associations, in declaration order.
    pub associations: Vec<Association>,
    /// Named scopes.
    pub scopes: Vec<(String, ScopeFn)>,
    /// The hook table.
    pub hooks: HookRegistry,
    /// Unique key sets used as upsert conflict targets.
    pub unique_keys: Vec<Vec<String>>,
    errors: Vec<String>,
}

impl std::fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("attributes", &self.attributes.len())
            .field("associations", &self.associations.len())
            .finish()
    }
}

impl ModelDef {
    /// Creates a definition; the table name defaults to the pluralized
    /// snake_case model name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let table = pluralize(&snake_case(&name));
        Self {
            name,
            table,
            attributes: Vec::new(),
            primary_key: String::from("id"),
            sharding_key: None,
            physic_tables: Vec::new(),
            associations: Vec::new(),
            scopes: Vec::new(),
            hooks: HookRegistry::new(),
            unique_keys: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Overrides the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Declares an attribute; duplicate names are a definition error.
    #[must_use]
    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        if self.attributes.iter().any(|a| a.name == attribute.name) {
            self.errors
                .push(format!("duplicate attribute \"{}\"", attribute.name));
            return self;
        }
        if attribute.primary_key {
            self.primary_key = attribute.name.clone();
        }
        self.attributes.push(attribute);
        self
    }

    /// Overrides the primary key attribute name.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Declares the sharding key.
    #[must_use]
    pub fn sharding_key(mut self, name: impl Into<String>) -> Self {
        self.sharding_key = Some(name.into());
        self
    }

    /// Overrides table routing with explicit physical tables.
    #[must_use]
    pub fn physic_tables(mut self, tables: &[&str]) -> Self {
        self.physic_tables = tables.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Declares a unique key set used as an upsert conflict target.
    #[must_use]
    pub fn unique_key(mut self, columns: &[&str]) -> Self {
        self.unique_keys
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Renames a declared attribute; renaming onto an existing name is a
    /// definition error.
    #[must_use]
    pub fn rename_attribute(mut self, from: &str, to: impl Into<String>) -> Self {
        let to: String = to.into();
        if self.attributes.iter().any(|a| a.name == to) {
            self.errors
                .push(format!("unable to rename \"{from}\" to existing attribute \"{to}\""));
            return self;
        }
        match self.attributes.iter_mut().find(|a| a.name == from) {
            Some(attribute) => {
                attribute.name.clone_from(&to);
                if self.primary_key == from {
                    self.primary_key = to;
                }
            }
            None => self.errors.push(format!("no attribute \"{from}\" to rename")),
        }
        self
    }

    fn associate(mut self, association: Association) -> Self {
        if self.associations.iter().any(|a| a.name == association.name) {
            self.errors
                .push(format!("duplicate association \"{}\"", association.name));
            return self;
        }
        self.associations.push(association);
        self
    }

    /// Declares a one-to-one association holding our foreign key.
    #[must_use]
    pub fn has_one(self, name: &str, model: &str) -> Self {
        self.associate(Association::new(AssociationKind::HasOne, name, model))
    }

    /// Declares a one-to-many association.
    #[must_use]
    pub fn has_many(self, name: &str, model: &str) -> Self {
        self.associate(Association::new(AssociationKind::HasMany, name, model))
    }

    /// Declares a many-to-many association through a join model.
    #[must_use]
    pub fn has_many_through(self, name: &str, model: &str, through: &str) -> Self {
        self.associate(
            Association::new(AssociationKind::HasMany, name, model).through(through),
        )
    }

    /// Declares an inverse association; we hold the foreign key.
    #[must_use]
    pub fn belongs_to(self, name: &str, model: &str) -> Self {
        self.associate(Association::new(AssociationKind::BelongsTo, name, model))
    }

    /// Declares an association with full control over the descriptor.
    #[must_use]
    pub fn association(self, association: Association) -> Self {
        self.associate(association)
    }

    /// Registers a named scope.
    #[must_use]
    pub fn scope(
        mut self,
        name: impl Into<String>,
        scope: impl Fn(Spell) -> Spell + Send + Sync + 'static,
    ) -> Self {
        self.scopes.push((name.into(), Arc::new(scope)));
        self
    }

    /// Validates the accumulated definition.
    pub fn validate(&self) -> Result<()> {
        if let Some(message) = self.errors.first() {
            return Err(Error::Definition(message.clone()));
        }
        if !self.attributes.is_empty() && self.find_attribute(&self.primary_key).is_none() {
            return Err(Error::Definition(format!(
                "model {} has no primary key attribute \"{}\"",
                self.name, self.primary_key
            )));
        }
        if let Some(key) = &self.sharding_key {
            if self.find_attribute(key).is_none() {
                return Err(Error::Definition(format!(
                    "model {} has no sharding key attribute \"{key}\"",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Looks an attribute up by name.
    #[must_use]
    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks an attribute up by column name.
    #[must_use]
    pub fn attribute_by_column(&self, column: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.column_name == column)
    }

    /// Returns the column name for an attribute.
    #[must_use]
    pub fn column_of(&self, name: &str) -> Option<&str> {
        self.find_attribute(name).map(|a| a.column_name.as_str())
    }

    /// Returns the primary key column name.
    #[must_use]
    pub fn primary_column(&self) -> &str {
        self.column_of(&self.primary_key).unwrap_or("id")
    }

    /// Returns the `created_at` attribute, if declared.
    #[must_use]
    pub fn created_at(&self) -> Option<&AttributeDef> {
        self.find_attribute("created_at")
    }

    /// Returns the `updated_at` attribute, if declared.
    #[must_use]
    pub fn updated_at(&self) -> Option<&AttributeDef> {
        self.find_attribute("updated_at")
    }

    /// Returns the `deleted_at` attribute, if declared.
    #[must_use]
    pub fn deleted_at(&self) -> Option<&AttributeDef> {
        self.find_attribute("deleted_at")
    }

    /// Returns whether the model soft-deletes by default.
    #[must_use]
    pub fn is_paranoid(&self) -> bool {
        self.deleted_at().is_some()
    }

    /// Looks an association up by name.
    #[must_use]
    pub fn find_association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Encodes a value for binding against an attribute's column.
    pub fn uncast_value(&self, name: &str, value: Value) -> Result<Value> {
        match self.find_attribute(name) {
            Some(attribute) => Ok(uncast(value, &attribute.data_type)?),
            None => Ok(value),
        }
    }
}

/// A model handle: a definition bound to its realm.
#[derive(Clone)]
pub struct Model {
    def: Arc<ModelDef>,
    realm: Arc<RealmCore>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("def", &self.def).finish()
    }
}

impl Model {
    pub(crate) fn new(def: Arc<ModelDef>, realm: Arc<RealmCore>) -> Self {
        Self { def, realm }
    }

    /// Returns the model definition.
    #[must_use]
    pub fn def(&self) -> &Arc<ModelDef> {
        &self.def
    }

    pub(crate) fn realm_core(&self) -> &Arc<RealmCore> {
        &self.realm
    }

    /// Looks a sibling model up in the owning realm.
    #[must_use]
    pub fn sibling(&self, name: &str) -> Option<Model> {
        self.realm.model(name)
    }

    /// Returns a fresh SELECT Spell over this model.
    #[must_use]
    pub fn spell(&self) -> Spell {
        Spell::new(self.clone(), Command::Select)
    }

    /// Returns a Spell selecting all rows (soft-deleted excluded).
    #[must_use]
    pub fn all(&self) -> Spell {
        self.spell()
    }

    /// Returns a Spell with default scopes dropped.
    #[must_use]
    pub fn unscoped(&self) -> Spell {
        self.spell().unscoped()
    }

    /// Returns a Spell with only the soft-delete filter dropped.
    #[must_use]
    pub fn unparanoid(&self) -> Spell {
        self.spell().unparanoid()
    }

    /// Returns a Spell filtered by the given condition.
    #[must_use]
    pub fn find(&self, cond: impl IntoCond) -> Spell {
        self.spell().where_(cond)
    }

    /// Alias of [`Model::find`].
    #[must_use]
    pub fn where_(&self, cond: impl IntoCond) -> Spell {
        self.find(cond)
    }

    /// Returns a Spell with a projection applied.
    #[must_use]
    pub fn select(&self, columns: &str) -> Spell {
        self.spell().select(columns)
    }

    /// Returns a Spell ordered by the given specification.
    #[must_use]
    pub fn order(&self, order: &str) -> Spell {
        self.spell().order(order)
    }

    /// Returns a Spell grouped by the given expressions.
    #[must_use]
    pub fn group(&self, group: &str) -> Spell {
        self.spell().group(group)
    }

    /// Returns a Spell with a HAVING condition.
    #[must_use]
    pub fn having(&self, cond: impl IntoCond) -> Spell {
        self.spell().having(cond)
    }

    /// Returns a Spell joining the named association.
    #[must_use]
    pub fn with(&self, association: &str) -> Spell {
        self.spell().with(association)
    }

    /// Alias of [`Model::with`].
    #[must_use]
    pub fn include(&self, association: &str) -> Spell {
        self.spell().include(association)
    }

    /// Returns a Spell with an arbitrary LEFT JOIN.
    #[must_use]
    pub fn join(&self, alias: &str, model: &str, on: impl IntoCond) -> Spell {
        self.spell().join(alias, model, on)
    }

    /// Finds one row matching the condition.
    pub async fn find_one(&self, cond: impl IntoCond) -> Result<Option<Bone>> {
        self.find(cond).first().await
    }

    /// Finds a row by primary key.
    pub async fn find_by_pk(&self, pk: impl ToValue) -> Result<Option<Bone>> {
        let column = self.def.primary_key.clone();
        self.spell()
            .where_((format!("{column} = ?").as_str(), pk.to_value()))
            .first()
            .await
    }

    /// Returns the first row in primary key order.
    pub async fn first(&self) -> Result<Option<Bone>> {
        let pk = self.def.primary_key.clone();
        self.spell().order(&pk).first().await
    }

    /// Returns the last row in primary key order.
    pub async fn last(&self) -> Result<Option<Bone>> {
        let pk = self.def.primary_key.clone();
        self.spell().order(&format!("{pk} desc")).first().await
    }

    /// Counts rows, soft-deleted excluded.
    pub async fn count(&self) -> Result<i64> {
        match self.spell().count("*").scalar().await? {
            Value::Int(n) => Ok(n),
            other => Ok(other.to_json().as_i64().unwrap_or_default()),
        }
    }

    /// Sums an attribute over matching rows.
    pub async fn sum(&self, attribute: &str) -> Result<Value> {
        self.spell().sum(attribute).scalar().await
    }

    /// Averages an attribute over matching rows.
    pub async fn average(&self, attribute: &str) -> Result<Value> {
        self.spell().average(attribute).scalar().await
    }

    /// Returns the minimum of an attribute over matching rows.
    pub async fn minimum(&self, attribute: &str) -> Result<Value> {
        self.spell().minimum(attribute).scalar().await
    }

    /// Returns the maximum of an attribute over matching rows.
    pub async fn maximum(&self, attribute: &str) -> Result<Value> {
        self.spell().maximum(attribute).scalar().await
    }

    /// Creates a new instance without persisting it.
    pub fn new_bone(&self, values: impl Into<Values>) -> Result<Bone> {
        Bone::new(self.clone(), values.into())
    }

    /// Creates and persists a row, returning the hydrated instance.
    pub async fn create(&self, values: impl Into<Values>) -> Result<Bone> {
        let mut bone = Bone::new(self.clone(), values.into())?;
        bone.save().await?;
        Ok(bone)
    }

    /// Inserts many rows with a single multi-row INSERT.
    ///
    /// Keys that are not declared attributes are ignored. With
    /// `update_on_duplicate` the INSERT turns into an upsert over the
    /// listed attributes (or all non-key attributes).
    pub async fn bulk_create(
        &self,
        rows: Vec<Values>,
        options: BulkOptions,
    ) -> Result<Collection> {
        Spell::bulk_create(self.clone(), rows, options).await
    }

    /// Updates matching rows, returning the affected row count.
    pub async fn update(&self, cond: impl IntoCond, values: impl Into<Values>) -> Result<u64> {
        match self.find(cond).update(values.into()).run().await? {
            SpellResult::Affected { rows, .. } => Ok(rows),
            _ => Ok(0),
        }
    }

    /// Removes matching rows; soft-deletes unless `force` or the model is
    /// not paranoid.
    pub async fn remove(&self, cond: impl IntoCond, force: bool) -> Result<u64> {
        match self.find(cond).delete(force).run().await? {
            SpellResult::Affected { rows, .. } => Ok(rows),
            _ => Ok(0),
        }
    }

    /// Restores soft-deleted rows matching the condition.
    pub async fn restore(&self, cond: impl IntoCond) -> Result<u64> {
        if !self.def.is_paranoid() {
            return Err(Error::Integrity(format!(
                "Model {} is not paranoid",
                self.def.name
            )));
        }
        let spell = self
            .unscoped()
            .where_(cond)
            .where_("deleted_at is not null")
            .update(Values::new().set("deleted_at", Value::Null));
        match spell.run().await? {
            SpellResult::Affected { rows, .. } => Ok(rows),
            _ => Ok(0),
        }
    }

    /// Registers a lifecycle hook on the model.
    pub fn add_hook(
        &self,
        kind: HookKind,
        name: impl Into<String>,
        hook: crate::hooks::Hook,
    ) {
        self.def.hooks.add(kind, name, hook);
    }

    /// Removes hooks registered under `name` for the event.
    pub fn remove_hook(&self, kind: HookKind, name: &str) {
        self.def.hooks.remove(kind, name);
    }

    /// Describes the table as the database reports it.
    pub async fn describe(&self) -> Result<Vec<ColumnInfo>> {
        let driver = self.realm.driver()?;
        let mut info = driver
            .query_schema_info(std::slice::from_ref(&self.def.table))
            .await?;
        Ok(info.remove(&self.def.table).unwrap_or_default())
    }

    /// Drops the table.
    pub async fn drop_table(&self) -> Result<()> {
        let driver = self.realm.driver()?;
        driver.drop_table(&self.def.table).await
    }

    /// Truncates the table.
    pub async fn truncate(&self) -> Result<()> {
        let driver = self.realm.driver()?;
        driver.truncate_table(&self.def.table).await
    }

    /// Synchronizes the table with the declared attributes.
    ///
    /// Missing tables are created; missing columns added; changed columns
    /// altered. Columns are only dropped under `alter`; `force` recreates
    /// the table from scratch.
    pub async fn sync(&self, options: SyncOptions) -> Result<()> {
        let driver = self.realm.driver()?;
        let table = &self.def.table;
        let columns: Vec<&AttributeDef> = self
            .def
            .attributes
            .iter()
            .filter(|a| !a.is_virtual())
            .collect();

        let mut info = driver
            .query_schema_info(std::slice::from_ref(table))
            .await?;
        let existing = info.remove(table).unwrap_or_default();

        if existing.is_empty() {
            return driver.create_table(table, &columns).await;
        }
        if options.force {
            driver.drop_table(table).await?;
            return driver.create_table(table, &columns).await;
        }

        let dialect_types: HashMap<&str, String> = columns
            .iter()
            .map(|a| {
                (
                    a.column_name.as_str(),
                    driver.dialect().column_type(&a.data_type).to_ascii_uppercase(),
                )
            })
            .collect();

        for attribute in &columns {
            match existing
                .iter()
                .find(|c| c.column_name == attribute.column_name)
            {
                None => driver.add_column(table, attribute).await?,
                Some(column) => {
                    let declared = &dialect_types[attribute.column_name.as_str()];
                    let reported = column.column_type.to_ascii_uppercase();
                    if !reported.starts_with(declared.split('(').next().unwrap_or_default())
                        || column.allow_null != attribute.allow_null
                    {
                        driver.change_column(table, attribute).await?;
                    }
                }
            }
        }

        if options.alter {
            for column in &existing {
                if !columns
                    .iter()
                    .any(|a| a.column_name == column.column_name)
                {
                    driver.remove_column(table, &column.column_name).await?;
                }
            }
        }
        Ok(())
    }
}

/// Options for [`Model::sync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Drop and recreate the table.
    pub force: bool,
    /// Allow dropping columns absent from the definition.
    pub alter: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("Post"), "post");
        assert_eq!(snake_case("isPrivate"), "is_private");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn test_table_derivation() {
        let def = ModelDef::new("BlogPost");
        assert_eq!(def.table, "blog_posts");
    }

    #[test]
    fn test_duplicate_attribute_fails_validation() {
        let def = ModelDef::new("Post")
            .attribute(AttributeDef::new("id", DataType::BigInt).primary_key())
            .attribute(AttributeDef::new("title", DataType::string()))
            .attribute(AttributeDef::new("title", DataType::string()));
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn test_rename_attribute_collision_fails() {
        let def = ModelDef::new("Post")
            .attribute(AttributeDef::new("id", DataType::BigInt).primary_key())
            .attribute(AttributeDef::new("title", DataType::string()))
            .attribute(AttributeDef::new("subject", DataType::string()))
            .rename_attribute("subject", "title");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_duplicate_association_fails() {
        let def = ModelDef::new("Post")
            .attribute(AttributeDef::new("id", DataType::BigInt).primary_key())
            .has_many("comments", "Comment")
            .has_many("comments", "Comment");
        let err = def.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate association"));
    }

    #[test]
    fn test_paranoid_detection() {
        let plain = ModelDef::new("Tag")
            .attribute(AttributeDef::new("id", DataType::BigInt).primary_key());
        assert!(!plain.is_paranoid());

        let paranoid = ModelDef::new("Post")
            .attribute(AttributeDef::new("id", DataType::BigInt).primary_key())
            .attribute(
                AttributeDef::new("deleted_at", DataType::datetime()).column_name("gmt_deleted"),
            );
        assert!(paranoid.is_paranoid());
        assert_eq!(paranoid.column_of("deleted_at"), Some("gmt_deleted"));
    }

    #[test]
    fn test_values_from_json() {
        let values: Values = serde_json::json!({"title": "New Post", "word_count": 5}).into();
        assert_eq!(values.get("title"), Some(&Value::Text(String::from("New Post"))));
        assert_eq!(values.get("word_count"), Some(&Value::Int(5)));
    }
}
