//! The Spell: a composable, awaitable query value.
//!
//! A Spell is built by chaining; nothing touches the database until a
//! terminal async call (or `.await`, via `IntoFuture`). Builder errors are
//! deferred: the first failure is recorded and surfaced when the Spell is
//! finalized, so chains stay fluent.

use std::collections::HashSet;
use std::future::IntoFuture;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use grimoire_sql_core::types::uncast;
use grimoire_sql_core::value::Value;
use grimoire_sql_core::{Direction, Expr};

use crate::associations::{Association, IncludeOptions, IncludeSpec};
use crate::bone::Bone;
use crate::collection::Collection;
use crate::condition::{parse_cond, parse_object_cond, IntoCond};
use crate::driver::{QueryOptions, Row};
use crate::error::{Error, Result};
use crate::format::{self, Mode, SqlFragment};
use crate::hooks::HookKind;
use crate::model::{Model, ModelDef, Values};
use crate::realm::{current_connection, Transaction};

/// The statement kind a Spell compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Select,
    Insert,
    Update,
    Delete,
    Upsert,
}

/// A value assigned by SET: either a plain value or an expression
/// (`price = price + 1`).
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// A plain value.
    Value(Value),
    /// A computed expression.
    Expr(Expr),
}

/// Which bulk hook family a class-level mutation dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BulkScope {
    Create,
    Update,
    Destroy,
}

/// Execution options carried by a Spell.
#[derive(Debug, Clone, Default)]
pub struct SpellOptions {
    /// Suppress the automatic `updated_at` assignment.
    pub silent: bool,
    /// Skip hook dispatch entirely.
    pub skip_hooks: bool,
    /// Expand bulk mutations into per-row hooks and mutations.
    pub individual_hooks: bool,
    /// Extra columns to RETURN on dialects that support it.
    pub returning: Option<Vec<String>>,
    /// Upsert conflict target override (attribute names).
    pub unique_keys: Option<Vec<String>>,
    /// Attributes to update on duplicate key; empty means "all".
    pub update_on_duplicate: Option<Vec<String>>,
    /// Pinned connection (transaction) id.
    pub connection: Option<u64>,
}

/// `updateOnDuplicate` for bulk inserts.
#[derive(Debug, Clone)]
pub enum UpdateOnDuplicate {
    /// Update every inserted attribute (except keys and `created_at`).
    All,
    /// Update just the listed attributes.
    Attributes(Vec<String>),
}

/// Options for [`Model::bulk_create`].
#[derive(Debug, Clone, Default)]
pub struct BulkOptions {
    /// Turn the INSERT into an upsert.
    pub update_on_duplicate: Option<UpdateOnDuplicate>,
    /// Upsert conflict target override (attribute names).
    pub unique_keys: Option<Vec<String>>,
    /// Expand into per-row creates with instance hooks.
    pub individual_hooks: bool,
    /// Skip hook dispatch.
    pub skip_hooks: bool,
}

/// A manual LEFT JOIN added with `join`.
#[derive(Debug, Clone)]
pub(crate) struct ManualJoin {
    pub alias: String,
    pub model: String,
    pub on: Expr,
}

/// A join resolved at finalization, ready for formatting and hydration.
#[derive(Clone)]
pub(crate) struct ResolvedJoin {
    pub alias: String,
    pub def: Arc<ModelDef>,
    pub on: Expr,
    /// Whether hydration accumulates children into an array.
    pub collection: bool,
    /// Whether hydration attaches this branch at all (association joins).
    pub hydrated: bool,
    /// Columns selected on this branch; all non-virtual when empty.
    pub columns: Vec<String>,
    /// Branch ordering, appended to the statement's ORDER BY.
    pub orders: Vec<(Expr, Direction)>,
}

impl std::fmt::Debug for ResolvedJoin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedJoin")
            .field("alias", &self.alias)
            .field("model", &self.def.name)
            .finish()
    }
}

/// What awaiting a Spell yields.
#[derive(Debug)]
pub enum SpellResult {
    /// Hydrated entity instances.
    Bones(Collection),
    /// Plain rows (grouped/aggregated selects).
    Rows(Vec<Row>),
    /// A mutation report.
    Affected {
        /// Affected row count.
        rows: u64,
        /// The generated id, when the dialect reports one.
        insert_id: Option<i64>,
    },
}

/// The composable query value object.
#[derive(Debug, Clone)]
pub struct Spell {
    pub(crate) model: Model,
    pub(crate) command: Command,
    pub(crate) columns: Vec<Expr>,
    pub(crate) wheres: Vec<Expr>,
    pub(crate) havings: Vec<Expr>,
    pub(crate) groups: Vec<Expr>,
    pub(crate) orders: Vec<(Expr, Direction)>,
    pub(crate) includes: Vec<IncludeSpec>,
    pub(crate) manual_joins: Vec<ManualJoin>,
    pub(crate) joins: Vec<ResolvedJoin>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) sets: Vec<(String, SetValue)>,
    pub(crate) rows: Vec<Values>,
    pub(crate) subqueries: Vec<Spell>,
    pub(crate) is_subquery: bool,
    pub(crate) unscoped: bool,
    pub(crate) unparanoid: bool,
    pub(crate) force_delete: bool,
    pub(crate) plain: bool,
    pub(crate) stamped_at: Option<DateTime<Utc>>,
    pub(crate) hook_scope: Option<BulkScope>,
    pub(crate) options: SpellOptions,
    pub(crate) err: Option<Error>,
}

impl Spell {
    /// Creates a fresh Spell over a model.
    #[must_use]
    pub fn new(model: Model, command: Command) -> Self {
        Self {
            model,
            command,
            columns: Vec::new(),
            wheres: Vec::new(),
            havings: Vec::new(),
            groups: Vec::new(),
            orders: Vec::new(),
            includes: Vec::new(),
            manual_joins: Vec::new(),
            joins: Vec::new(),
            limit: None,
            offset: None,
            sets: Vec::new(),
            rows: Vec::new(),
            subqueries: Vec::new(),
            is_subquery: false,
            unscoped: false,
            unparanoid: false,
            force_delete: false,
            plain: false,
            stamped_at: None,
            hook_scope: None,
            options: SpellOptions::default(),
            err: None,
        }
    }

    /// Returns the model the Spell targets.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn fail(mut self, error: Error) -> Self {
        if self.err.is_none() {
            self.err = Some(error);
        }
        self
    }

    // ---- filters -------------------------------------------------------

    /// Adds a WHERE condition, AND-ed with the existing ones.
    #[must_use]
    pub fn where_(mut self, cond: impl IntoCond) -> Self {
        match parse_cond(cond.into_cond(), &mut self.subqueries) {
            Ok(expr) => {
                self.wheres.push(expr);
                self
            }
            Err(error) => self.fail(error),
        }
    }

    /// OR-combines a condition with the whole preceding WHERE,
    /// parenthesized.
    #[must_use]
    pub fn or_where(mut self, cond: impl IntoCond) -> Self {
        match parse_cond(cond.into_cond(), &mut self.subqueries) {
            Ok(expr) => {
                let existing = self.wheres.drain(..).reduce(Expr::and);
                match existing {
                    Some(existing) => self.wheres.push(existing.or(expr)),
                    None => self.wheres.push(expr),
                }
                self
            }
            Err(error) => self.fail(error),
        }
    }

    /// Adds a HAVING condition.
    #[must_use]
    pub fn having(mut self, cond: impl IntoCond) -> Self {
        match parse_cond(cond.into_cond(), &mut self.subqueries) {
            Ok(expr) => {
                self.havings.push(expr);
                self
            }
            Err(error) => self.fail(error),
        }
    }

    /// OR-combines a condition with the whole preceding HAVING.
    #[must_use]
    pub fn or_having(mut self, cond: impl IntoCond) -> Self {
        match parse_cond(cond.into_cond(), &mut self.subqueries) {
            Ok(expr) => {
                let existing = self.havings.drain(..).reduce(Expr::and);
                match existing {
                    Some(existing) => self.havings.push(existing.or(expr)),
                    None => self.havings.push(expr),
                }
                self
            }
            Err(error) => self.fail(error),
        }
    }

    // ---- projection ----------------------------------------------------

    /// Sets the select list from a comma-separated specification,
    /// e.g. `"id, title"` or `"MONTH(created_at) AS month"`.
    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        match grimoire_sql_core::parser::parse_select_list(columns) {
            Ok(items) => {
                self.columns.extend(items);
                self
            }
            Err(error) => self.fail(error.into()),
        }
    }

    /// Selects the attributes the predicate admits.
    #[must_use]
    pub fn select_filter(mut self, predicate: impl Fn(&str) -> bool) -> Self {
        for attribute in &self.model.def().attributes {
            if !attribute.is_virtual() && predicate(&attribute.name) {
                self.columns.push(Expr::column(attribute.name.clone()));
            }
        }
        self
    }

    /// Adds a raw fragment to the select list.
    #[must_use]
    pub fn select_raw(mut self, raw: grimoire_sql_core::Raw) -> Self {
        self.columns.push(Expr::Raw(raw.0));
        self
    }

    // ---- joins ---------------------------------------------------------

    /// Joins a named association (eager load).
    #[must_use]
    pub fn with(self, association: &str) -> Self {
        self.with_options(association, IncludeOptions::default())
    }

    /// Joins a named association with per-branch options.
    #[must_use]
    pub fn with_options(mut self, association: &str, options: IncludeOptions) -> Self {
        self.includes.push(IncludeSpec {
            name: String::from(association),
            options,
        });
        self
    }

    /// Alias of [`Spell::with`].
    #[must_use]
    pub fn include(self, association: &str) -> Self {
        self.with(association)
    }

    /// Adds an arbitrary LEFT JOIN against another model.
    #[must_use]
    pub fn join(mut self, alias: &str, model: &str, on: impl IntoCond) -> Self {
        match parse_cond(on.into_cond(), &mut self.subqueries) {
            Ok(expr) => {
                self.manual_joins.push(ManualJoin {
                    alias: String::from(alias),
                    model: String::from(model),
                    on: expr,
                });
                self
            }
            Err(error) => self.fail(error),
        }
    }

    // ---- aggregation ---------------------------------------------------

    /// Adds grouping expressions; grouped columns join the select list so
    /// they come back in the result rows.
    #[must_use]
    pub fn group(mut self, group: &str) -> Self {
        match grimoire_sql_core::parser::parse_select_list(group) {
            Ok(items) => {
                for item in items {
                    match &item {
                        Expr::Alias { alias, .. } => {
                            self.groups.push(Expr::column(alias.clone()));
                        }
                        other => self.groups.push(other.clone()),
                    }
                    self.columns.push(item);
                }
                self
            }
            Err(error) => self.fail(error.into()),
        }
    }

    fn aggregate(mut self, function: &str, expr: &str) -> Self {
        let arg = if expr == "*" {
            Expr::Wildcard { qualifier: None }
        } else {
            match grimoire_sql_core::parser::parse_expr(expr) {
                Ok(parsed) => parsed,
                Err(error) => return self.fail(error.into()),
            }
        };
        let alias = function.to_ascii_lowercase();
        self.columns
            .push(Expr::function(function, vec![arg]).alias(alias));
        self
    }

    /// Counts rows (or the given expression).
    #[must_use]
    pub fn count(self, expr: &str) -> Self {
        self.aggregate("COUNT", expr)
    }

    /// Sums an expression.
    #[must_use]
    pub fn sum(self, expr: &str) -> Self {
        self.aggregate("SUM", expr)
    }

    /// Averages an expression.
    #[must_use]
    pub fn average(self, expr: &str) -> Self {
        self.aggregate("AVG", expr)
    }

    /// Takes the minimum of an expression.
    #[must_use]
    pub fn minimum(self, expr: &str) -> Self {
        self.aggregate("MIN", expr)
    }

    /// Takes the maximum of an expression.
    #[must_use]
    pub fn maximum(self, expr: &str) -> Self {
        self.aggregate("MAX", expr)
    }

    // ---- order / pagination -------------------------------------------

    /// Orders by a specification like `"created_at desc, id"`.
    #[must_use]
    pub fn order(mut self, order: &str) -> Self {
        match grimoire_sql_core::parser::parse_order_list(order) {
            Ok(items) => {
                self.orders.extend(items);
                self
            }
            Err(error) => self.fail(error.into()),
        }
    }

    /// Orders by an expression and direction.
    #[must_use]
    pub fn order_by(mut self, expr: Expr, direction: Direction) -> Self {
        self.orders.push((expr, direction));
        self
    }

    /// Limits the number of rows; negative limits fail.
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        match u64::try_from(limit) {
            Ok(limit) => {
                self.limit = Some(limit);
                self
            }
            Err(_) => self.fail(Error::Query(format!("invalid limit {limit}"))),
        }
    }

    /// Skips the first `offset` rows; negative offsets fail.
    #[must_use]
    pub fn offset(mut self, offset: i64) -> Self {
        match u64::try_from(offset) {
            Ok(offset) => {
                self.offset = Some(offset);
                self
            }
            Err(_) => self.fail(Error::Query(format!("invalid offset {offset}"))),
        }
    }

    // ---- scope control -------------------------------------------------

    /// Drops default scopes, including the soft-delete filter.
    #[must_use]
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Drops only the soft-delete filter.
    #[must_use]
    pub fn unparanoid(mut self) -> Self {
        self.unparanoid = true;
        self
    }

    /// Applies a named scope registered on the model.
    #[must_use]
    pub fn scoped(self, name: &str) -> Self {
        let scope = self
            .model
            .def()
            .scopes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f.clone());
        match scope {
            Some(scope) => scope(self),
            None => {
                let error = Error::Query(format!("unable to find scope \"{name}\""));
                self.fail(error)
            }
        }
    }

    // ---- options -------------------------------------------------------

    /// Suppresses the automatic `updated_at` assignment.
    #[must_use]
    pub fn silent(mut self, silent: bool) -> Self {
        self.options.silent = silent;
        self
    }

    /// Enables or disables hook dispatch.
    #[must_use]
    pub fn hooks(mut self, enabled: bool) -> Self {
        self.options.skip_hooks = !enabled;
        self
    }

    /// Expands bulk mutations into per-row hooks and mutations.
    #[must_use]
    pub fn individual_hooks(mut self, enabled: bool) -> Self {
        self.options.individual_hooks = enabled;
        self
    }

    /// Requests extra RETURNING columns where supported.
    #[must_use]
    pub fn returning(mut self, attributes: &[&str]) -> Self {
        self.options.returning = Some(attributes.iter().map(|a| (*a).to_string()).collect());
        self
    }

    /// Overrides the upsert conflict target.
    #[must_use]
    pub fn unique_keys(mut self, attributes: &[&str]) -> Self {
        self.options.unique_keys =
            Some(attributes.iter().map(|a| (*a).to_string()).collect());
        self
    }

    /// Routes the Spell through a transaction's pinned connection.
    #[must_use]
    pub fn transaction(mut self, transaction: &Transaction) -> Self {
        self.options.connection = Some(transaction.id());
        self
    }

    // ---- mutation builders ---------------------------------------------

    /// Turns the Spell into an UPDATE of the given values.
    #[must_use]
    pub fn update(mut self, values: Values) -> Self {
        self.command = Command::Update;
        self.hook_scope = Some(BulkScope::Update);
        self.stamp();
        for (name, value) in values.0 {
            self.sets.push((name, SetValue::Value(value)));
        }
        self
    }

    /// Turns the Spell into `attribute = attribute + by`.
    #[must_use]
    pub fn increment(self, attribute: &str, by: i64) -> Self {
        self.arithmetic_update(attribute, by, grimoire_sql_core::BinaryOp::Add)
    }

    /// Turns the Spell into `attribute = attribute - by`.
    #[must_use]
    pub fn decrement(self, attribute: &str, by: i64) -> Self {
        self.arithmetic_update(attribute, by, grimoire_sql_core::BinaryOp::Sub)
    }

    fn arithmetic_update(
        mut self,
        attribute: &str,
        by: i64,
        op: grimoire_sql_core::BinaryOp,
    ) -> Self {
        self.command = Command::Update;
        self.hook_scope = Some(BulkScope::Update);
        self.stamp();
        let expr = Expr::column(attribute).binary(op, Expr::Literal(Value::Int(by)));
        self.sets.push((String::from(attribute), SetValue::Expr(expr)));
        self
    }

    /// Turns the Spell into a DELETE; `force` skips soft deletion.
    #[must_use]
    pub fn delete(mut self, force: bool) -> Self {
        self.command = Command::Delete;
        self.hook_scope = Some(BulkScope::Destroy);
        self.force_delete = force;
        self.stamp();
        self
    }

    fn stamp(&mut self) {
        if self.stamped_at.is_none() {
            self.stamped_at = Some(Utc::now());
        }
    }

    pub(crate) fn insert(model: Model, row: Values) -> Self {
        let mut spell = Self::new(model, Command::Insert);
        spell.rows.push(row);
        spell.stamp();
        spell
    }

    pub(crate) fn upsert_row(model: Model, row: Values) -> Self {
        let mut spell = Self::new(model, Command::Upsert);
        spell.rows.push(row);
        spell.stamp();
        spell
    }

    /// Runs a bulk INSERT for [`Model::bulk_create`].
    pub(crate) async fn bulk_create(
        model: Model,
        rows: Vec<Values>,
        options: BulkOptions,
    ) -> Result<Collection> {
        if options.individual_hooks {
            let mut collection = Collection::new();
            for row in rows {
                let declared: Values = row
                    .0
                    .into_iter()
                    .filter(|(name, _)| model.def().find_attribute(name).is_some())
                    .collect();
                collection.push(model.create(declared).await?);
            }
            return Ok(collection);
        }

        let mut spell = Self::new(model.clone(), Command::Insert);
        spell.rows = rows;
        spell.stamp();
        spell.hook_scope = Some(BulkScope::Create);
        spell.options.skip_hooks = options.skip_hooks;
        spell.options.unique_keys = options.unique_keys;
        spell.options.update_on_duplicate = match options.update_on_duplicate {
            Some(UpdateOnDuplicate::All) => Some(Vec::new()),
            Some(UpdateOnDuplicate::Attributes(attributes)) => Some(attributes),
            None => None,
        };

        let rows_snapshot = spell.rows.clone();
        let result = spell.run().await?;
        let mut collection = Collection::new();
        let insert_id = match result {
            SpellResult::Affected { insert_id, .. } => insert_id,
            _ => None,
        };
        let single = rows_snapshot.len() == 1;
        for row in rows_snapshot {
            // Undeclared keys are ignored, not rejected, on bulk inserts.
            let declared: Values = row
                .0
                .into_iter()
                .filter(|(name, _)| model.def().find_attribute(name).is_some())
                .collect();
            let mut bone = Bone::new(model.clone(), declared)?;
            if single {
                if let Some(id) = insert_id {
                    if bone.primary_key_value().is_none() {
                        bone.set_primary_key(Value::Int(id))?;
                    }
                }
            }
            bone.mark_persisted();
            collection.push(bone);
        }
        Ok(collection)
    }

    // ---- formatting ----------------------------------------------------

    /// Formats the Spell into SQL with bound values, using the realm's
    /// dialect.
    pub fn to_sql(&self) -> Result<SqlFragment> {
        let driver = self.model.realm_core().driver()?;
        self.to_sql_as(driver.dialect())
    }

    /// Formats the Spell against an explicit dialect.
    pub fn to_sql_as(&self, dialect: &dyn grimoire_sql_core::Dialect) -> Result<SqlFragment> {
        let finalized = self.finalize()?;
        format::format(&finalized, dialect, Mode::Parameterized)
    }

    /// Formats the Spell into a single SQL string with inline literals.
    ///
    /// Deterministic and idempotent: repeated calls yield the same string.
    pub fn to_sql_string(&self) -> Result<String> {
        let driver = self.model.realm_core().driver()?;
        self.to_sql_string_as(driver.dialect())
    }

    /// Formats an inline SQL string against an explicit dialect.
    pub fn to_sql_string_as(&self, dialect: &dyn grimoire_sql_core::Dialect) -> Result<String> {
        let finalized = self.finalize()?;
        Ok(format::format(&finalized, dialect, Mode::Inline)?.sql)
    }

    // ---- finalization --------------------------------------------------

    /// Applies scopes, resolves includes and attribute names, enforces
    /// sharding, and returns the frozen shape the formatter consumes.
    pub(crate) fn finalize(&self) -> Result<Self> {
        if let Some(error) = &self.err {
            return Err(error.clone());
        }
        let mut spell = self.clone();
        let def = Arc::clone(spell.model.def());

        // Soft delete turns into an UPDATE setting `deleted_at`.
        if spell.command == Command::Delete && !spell.force_delete {
            if def.is_paranoid() {
                spell.command = Command::Update;
                spell.options.silent = true;
                spell.sets = vec![(
                    String::from("deleted_at"),
                    SetValue::Value(Value::DateTime(spell.stamped_at.unwrap_or_else(Utc::now))),
                )];
            } else {
                tracing::warn!(
                    table = def.table,
                    "soft delete requested without a deleted_at column, deleting physically"
                );
            }
        }

        spell.resolve_joins(&def)?;
        spell.apply_paranoid_scope(&def);
        spell.apply_timestamps(&def);
        spell.filter_rows_and_sets(&def)?;
        spell.enforce_sharding_key(&def)?;
        spell.resolve_names(&def)?;

        spell.subqueries = spell
            .subqueries
            .iter()
            .map(|subquery| {
                let mut finalized = subquery.finalize()?;
                finalized.is_subquery = true;
                Ok(finalized)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(spell)
    }

    fn resolve_joins(&mut self, def: &Arc<ModelDef>) -> Result<()> {
        let includes = std::mem::take(&mut self.includes);
        for include in includes {
            let association = def.find_association(&include.name).cloned().ok_or_else(|| {
                Error::Query(format!(
                    "unable to find association \"{}\" on model {}",
                    include.name, def.name
                ))
            })?;
            self.resolve_association(def, &association, include.options)?;
        }

        let manual = std::mem::take(&mut self.manual_joins);
        for join in manual {
            if def.find_association(&join.alias).is_some() {
                return Err(Error::Query(format!(
                    "invalid join target \"{}\": alias bound by an association",
                    join.alias
                )));
            }
            let target = self.model.sibling(&join.model).ok_or_else(|| {
                Error::Query(format!("unable to find model \"{}\" to join", join.model))
            })?;
            self.joins.push(ResolvedJoin {
                alias: join.alias,
                def: Arc::clone(target.def()),
                on: join.on,
                collection: false,
                hydrated: false,
                columns: Vec::new(),
                orders: Vec::new(),
            });
        }
        Ok(())
    }

    fn resolve_association(
        &mut self,
        def: &Arc<ModelDef>,
        association: &Association,
        options: IncludeOptions,
    ) -> Result<()> {
        use crate::associations::AssociationKind;

        let target = self.model.sibling(&association.model).ok_or_else(|| {
            Error::Query(format!(
                "unable to find association \"{}\": model \"{}\" is not registered",
                association.name, association.model
            ))
        })?;
        let target_def = Arc::clone(target.def());

        if let Some(through) = &association.through {
            return self.resolve_through(def, association, through, &target_def, options);
        }

        let root = &def.table;
        let mut on = match association.kind {
            AssociationKind::HasOne | AssociationKind::HasMany => {
                let foreign = association
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", crate::model::snake_case(&def.name)));
                Expr::qualified_column(root.clone(), def.primary_column())
                    .eq(Expr::qualified_column(association.name.clone(), foreign))
            }
            AssociationKind::BelongsTo => {
                let foreign = association.foreign_key.clone().unwrap_or_else(|| {
                    format!("{}_id", crate::model::snake_case(&target_def.name))
                });
                Expr::qualified_column(root.clone(), foreign).eq(Expr::qualified_column(
                    association.name.clone(),
                    target_def.primary_column(),
                ))
            }
        };

        for static_where in [&association.where_, &options.where_].into_iter().flatten() {
            let extra = parse_object_cond(static_where)?;
            on = on.and(qualify_unqualified(extra, &association.name));
        }

        let mut orders = Vec::new();
        for spec in [&association.order_by, &options.order].into_iter().flatten() {
            let parsed = grimoire_sql_core::parser::parse_order_list(spec)?;
            orders.extend(
                parsed
                    .into_iter()
                    .map(|(expr, dir)| (qualify_unqualified(expr, &association.name), dir)),
            );
        }

        let columns = options
            .select
            .clone()
            .or_else(|| {
                if association.select.is_empty() {
                    None
                } else {
                    Some(association.select.clone())
                }
            })
            .unwrap_or_default();

        self.joins.push(ResolvedJoin {
            alias: association.name.clone(),
            def: target_def,
            on,
            collection: association.is_collection(),
            hydrated: true,
            columns,
            orders,
        });
        Ok(())
    }

    /// Expands a hasMany-through into two joins: the join model first,
    /// then the far side keyed off it.
    fn resolve_through(
        &mut self,
        def: &Arc<ModelDef>,
        association: &Association,
        through: &str,
        target_def: &Arc<ModelDef>,
        options: IncludeOptions,
    ) -> Result<()> {
        let join_model = self.model.sibling(through).ok_or_else(|| {
            Error::Query(format!(
                "unable to find association \"{}\": through model \"{through}\" is not registered",
                association.name
            ))
        })?;
        let join_def = Arc::clone(join_model.def());
        let root = &def.table;
        let through_alias = format!("{}_{through}", association.name);

        let near_fk = association
            .foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", crate::model::snake_case(&def.name)));
        let mut near_on = Expr::qualified_column(root.clone(), def.primary_column())
            .eq(Expr::qualified_column(through_alias.clone(), near_fk));
        if let Some(static_where) = &association.where_ {
            let extra = parse_object_cond(static_where)?;
            near_on = near_on.and(qualify_unqualified(extra, &through_alias));
        }

        let far_fk = format!("{}_id", crate::model::snake_case(&target_def.name));
        let far_on = Expr::qualified_column(through_alias.clone(), far_fk).eq(
            Expr::qualified_column(association.name.clone(), target_def.primary_column()),
        );

        self.joins.push(ResolvedJoin {
            alias: through_alias,
            def: join_def,
            on: near_on,
            collection: false,
            hydrated: false,
            columns: Vec::new(),
            orders: Vec::new(),
        });
        self.joins.push(ResolvedJoin {
            alias: association.name.clone(),
            def: Arc::clone(target_def),
            on: far_on,
            collection: true,
            hydrated: true,
            columns: options.select.unwrap_or_default(),
            orders: Vec::new(),
        });
        Ok(())
    }

    fn apply_paranoid_scope(&mut self, def: &ModelDef) {
        let scoped_command = matches!(
            self.command,
            Command::Select | Command::Update | Command::Delete
        );
        if scoped_command
            && def.is_paranoid()
            && !self.unscoped
            && !self.unparanoid
            && !(self.command == Command::Delete && self.force_delete)
        {
            self.wheres.push(Expr::column("deleted_at").is_null());
        }
    }

    fn apply_timestamps(&mut self, def: &ModelDef) {
        let now = Value::DateTime(self.stamped_at.unwrap_or_else(Utc::now));
        match self.command {
            Command::Insert | Command::Upsert => {
                for name in ["created_at", "updated_at"] {
                    if def.find_attribute(name).is_none() {
                        continue;
                    }
                    for row in &mut self.rows {
                        if !row.contains(name) {
                            *row = std::mem::take(row).set(name, now.clone());
                        }
                    }
                }
            }
            Command::Update => {
                if def.updated_at().is_some()
                    && !self.options.silent
                    && !self.sets.iter().any(|(name, _)| name == "updated_at")
                {
                    self.sets
                        .push((String::from("updated_at"), SetValue::Value(now)));
                }
            }
            _ => {}
        }
    }

    /// Drops undeclared or virtual keys from insert rows and update sets,
    /// and encodes plain values against their column types.
    fn filter_rows_and_sets(&mut self, def: &ModelDef) -> Result<()> {
        for row in &mut self.rows {
            let entries = std::mem::take(&mut row.0);
            for (name, value) in entries {
                let Some(attribute) = def.find_attribute(&name) else {
                    continue;
                };
                if attribute.is_virtual() {
                    continue;
                }
                let value = def.uncast_value(&name, value)?;
                row.0.push((name, value));
            }
        }

        let sets = std::mem::take(&mut self.sets);
        for (name, set_value) in sets {
            let Some(attribute) = def.find_attribute(&name) else {
                continue;
            };
            if attribute.is_virtual() {
                continue;
            }
            let set_value = match set_value {
                SetValue::Value(value) => SetValue::Value(def.uncast_value(&name, value)?),
                expr => expr,
            };
            self.sets.push((name, set_value));
        }
        Ok(())
    }

    fn enforce_sharding_key(&mut self, def: &ModelDef) -> Result<()> {
        let Some(key) = def.sharding_key.clone() else {
            return Ok(());
        };

        match self.command {
            Command::Insert | Command::Upsert => {
                for row in &self.rows {
                    match row.get(&key) {
                        Some(value) if !value.is_null() => {}
                        _ => {
                            return Err(Error::Integrity(format!(
                                "sharding key {key} cannot be missing or null on insert into {}",
                                def.table
                            )))
                        }
                    }
                }
            }
            Command::Select | Command::Update | Command::Delete => {
                if self.sets.iter().any(|(name, value)| {
                    name == &key && matches!(value, SetValue::Value(Value::Null))
                }) {
                    return Err(Error::Integrity(format!(
                        "sharding key {key} cannot be set to null"
                    )));
                }
                let constrained = self
                    .wheres
                    .iter()
                    .any(|expr| constrains_key(expr, &key));
                if !constrained {
                    return Err(Error::Integrity(format!(
                        "sharding key {key} is required in the where clause of {}",
                        def.table
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_names(&mut self, def: &Arc<ModelDef>) -> Result<()> {
        let mut aliases: HashSet<String> = HashSet::new();
        for column in &self.columns {
            if let Expr::Alias { alias, .. } = column {
                aliases.insert(alias.clone());
            }
        }

        let joins_snapshot = self.joins.clone();
        let ctx = ResolveCtx {
            def,
            root_qualifier: if joins_snapshot.is_empty() {
                None
            } else {
                Some(def.table.clone())
            },
            joins: &joins_snapshot,
            aliases,
        };

        for expr in &mut self.columns {
            *expr = resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, false)?;
        }
        for expr in &mut self.wheres {
            *expr = resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, false)?;
        }
        for expr in &mut self.havings {
            *expr = resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, false)?;
        }
        for expr in &mut self.groups {
            *expr = resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, false)?;
        }
        for (expr, _) in &mut self.orders {
            *expr = resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, false)?;
        }
        let mut resolved_joins = joins_snapshot.clone();
        for join in &mut resolved_joins {
            join.on =
                resolve_expr(std::mem::replace(&mut join.on, Expr::Raw(String::new())), &ctx, true)?;
            for (expr, _) in &mut join.orders {
                *expr =
                    resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, true)?;
            }
        }
        self.joins = resolved_joins;

        for (_, set_value) in &mut self.sets {
            if let SetValue::Expr(expr) = set_value {
                *expr =
                    resolve_expr(std::mem::replace(expr, Expr::Raw(String::new())), &ctx, true)?;
            }
        }
        Ok(())
    }

    // ---- execution -----------------------------------------------------

    /// Executes the Spell and returns the raw outcome.
    pub async fn run(mut self) -> Result<SpellResult> {
        if let Some(error) = self.err.take() {
            return Err(error);
        }

        let hooks_enabled = !self.options.skip_hooks;
        let scope = self.hook_scope;

        if hooks_enabled {
            if let Some(scope) = scope {
                let def = Arc::clone(self.model.def());
                let (before, _) = bulk_hook_kinds(scope);
                def.hooks.dispatch_bulk(before, &mut self).await?;
            }
        }

        if self.options.individual_hooks
            && matches!(scope, Some(BulkScope::Update | BulkScope::Destroy))
        {
            return self.run_individually().await;
        }

        let driver = self.model.realm_core().driver()?;
        let finalized = self.finalize()?;
        let fragment = format::format(&finalized, driver.dialect(), Mode::Parameterized)?;
        let connection = self.options.connection.or_else(current_connection);
        let result = driver
            .query(&fragment.sql, &fragment.values, &QueryOptions { connection })
            .await?;

        let outcome = match finalized.command {
            Command::Select => {
                if finalized.is_plain() {
                    SpellResult::Rows(result.rows)
                } else {
                    SpellResult::Bones(hydrate(&self.model, &finalized, result.rows)?)
                }
            }
            _ => {
                let insert_id = result.insert_id.or_else(|| {
                    result.rows.first().and_then(|row| {
                        match row.get(finalized.model.def().primary_column()) {
                            Some(Value::Int(id)) => Some(*id),
                            _ => None,
                        }
                    })
                });
                SpellResult::Affected {
                    rows: result.affected_rows,
                    insert_id,
                }
            }
        };

        if hooks_enabled {
            if let Some(scope) = scope {
                let def = Arc::clone(self.model.def());
                let (_, after) = bulk_hook_kinds(scope);
                def.hooks.dispatch_bulk(after, &mut self).await?;
            }
        }

        Ok(outcome)
    }

    /// Expands a bulk mutation into per-row SELECT + hooks + mutation.
    async fn run_individually(self) -> Result<SpellResult> {
        let def = Arc::clone(self.model.def());
        let scope = self.hook_scope;
        let mut select = self.clone();
        select.command = Command::Select;
        select.sets.clear();
        select.columns.clear();
        select.hook_scope = None;
        select.options.individual_hooks = false;
        select.options.skip_hooks = true;

        // Boxed to break the run -> run_individually -> run type cycle.
        let bones = match Box::pin(select.run()).await? {
            SpellResult::Bones(bones) => bones,
            _ => Collection::new(),
        };

        let (before, after) = match scope {
            Some(BulkScope::Destroy) => (HookKind::BeforeRemove, HookKind::AfterRemove),
            _ => (HookKind::BeforeUpdate, HookKind::AfterUpdate),
        };

        let mut total = 0;
        for mut bone in bones {
            def.hooks.dispatch_instance(before, &mut bone).await?;
            if scope == Some(BulkScope::Destroy) {
                def.hooks
                    .dispatch_instance(HookKind::BeforeDestroy, &mut bone)
                    .await?;
            }

            let pk = bone.primary_key_value().unwrap_or(Value::Null);
            let mut row_spell = self.clone();
            row_spell.wheres = vec![Expr::column(def.primary_key.clone())
                .eq(Expr::Literal(pk))];
            row_spell.hook_scope = None;
            row_spell.options.individual_hooks = false;
            row_spell.options.skip_hooks = true;
            row_spell.unparanoid = true;
            if let SpellResult::Affected { rows, .. } = Box::pin(row_spell.run()).await? {
                total += rows;
            }

            def.hooks.dispatch_instance(after, &mut bone).await?;
            if scope == Some(BulkScope::Destroy) {
                def.hooks
                    .dispatch_instance(HookKind::AfterDestroy, &mut bone)
                    .await?;
            }
        }
        Ok(SpellResult::Affected {
            rows: total,
            insert_id: None,
        })
    }

    /// Returns whether the select yields plain rows instead of entities.
    pub(crate) fn is_plain(&self) -> bool {
        if self.plain || !self.groups.is_empty() {
            return true;
        }
        self.columns.iter().any(|column| {
            let inner = match column {
                Expr::Alias { expr, .. } => expr,
                other => other,
            };
            matches!(
                inner,
                Expr::Function { name, .. }
                    if matches!(
                        name.to_ascii_uppercase().as_str(),
                        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX"
                    )
            )
        })
    }

    /// Fetches all matching entities.
    pub async fn all(self) -> Result<Collection> {
        match self.run().await? {
            SpellResult::Bones(bones) => Ok(bones),
            SpellResult::Rows(_) => Err(Error::Query(String::from(
                "grouped or aggregated select yields plain rows, use rows() instead",
            ))),
            SpellResult::Affected { .. } => Err(Error::Query(String::from(
                "mutation spells yield affected rows, use execute() instead",
            ))),
        }
    }

    /// Fetches plain rows (grouped/aggregated selects).
    pub async fn rows(mut self) -> Result<Vec<Row>> {
        self.plain = true;
        match self.run().await? {
            SpellResult::Rows(rows) => Ok(rows),
            SpellResult::Bones(bones) => {
                Ok(bones.iter().map(Bone::row).collect())
            }
            SpellResult::Affected { .. } => Err(Error::Query(String::from(
                "mutation spells yield affected rows, use execute() instead",
            ))),
        }
    }

    /// Fetches the first matching entity.
    pub async fn first(self) -> Result<Option<Bone>> {
        let mut bones = self.limit(1).all().await?;
        Ok(if bones.is_empty() {
            None
        } else {
            Some(bones.swap_remove(0))
        })
    }

    /// Fetches the entity at the given offset.
    pub async fn get(self, index: i64) -> Result<Option<Bone>> {
        self.offset(index).first().await
    }

    /// Executes a mutation and returns the affected row count.
    pub async fn execute(self) -> Result<u64> {
        match self.run().await? {
            SpellResult::Affected { rows, .. } => Ok(rows),
            _ => Err(Error::Query(String::from(
                "select spells yield rows, await them or call all()",
            ))),
        }
    }

    /// Executes an aggregate select and returns the single value.
    pub async fn scalar(mut self) -> Result<Value> {
        self.plain = true;
        let rows = self.rows().await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(Value::Null);
        };
        Ok(row.into_values().next().unwrap_or(Value::Null))
    }

    /// Returns an iterator fetching windows of at most `size` rows in
    /// primary key order.
    #[must_use]
    pub fn batch(self, size: i64) -> Batch {
        let pk = self.model.def().primary_key.clone();
        match u64::try_from(size) {
            Ok(size) if size > 0 => Batch {
                spell: self.order_by(Expr::column(pk), Direction::Asc),
                size,
                offset: 0,
                done: false,
                err: None,
            },
            _ => Batch {
                spell: self,
                size: 0,
                offset: 0,
                done: false,
                err: Some(Error::Query(format!("invalid batch limit {size}"))),
            },
        }
    }
}

impl IntoFuture for Spell {
    type Output = Result<SpellResult>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

/// Lazily fetches primary-key-ordered windows of a select Spell.
#[derive(Debug)]
pub struct Batch {
    spell: Spell,
    size: u64,
    offset: u64,
    done: bool,
    err: Option<Error>,
}

impl Batch {
    /// Fetches the next window; `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<Collection>> {
        if let Some(error) = self.err.take() {
            self.done = true;
            return Err(error);
        }
        if self.done {
            return Ok(None);
        }
        let window = self
            .spell
            .clone()
            .limit(self.size as i64)
            .offset(self.offset as i64)
            .all()
            .await?;
        if (window.len() as u64) < self.size {
            self.done = true;
        }
        self.offset += self.size;
        if window.is_empty() {
            Ok(None)
        } else {
            Ok(Some(window))
        }
    }
}

fn bulk_hook_kinds(scope: BulkScope) -> (HookKind, HookKind) {
    match scope {
        BulkScope::Create => (HookKind::BeforeBulkCreate, HookKind::AfterBulkCreate),
        BulkScope::Update => (HookKind::BeforeBulkUpdate, HookKind::AfterBulkUpdate),
        BulkScope::Destroy => (HookKind::BeforeBulkDestroy, HookKind::AfterBulkDestroy),
    }
}

/// Returns whether the expression constrains `key` to a non-null value
/// everywhere it can match.
fn constrains_key(expr: &Expr, key: &str) -> bool {
    use grimoire_sql_core::BinaryOp;

    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => constrains_key(left, key) || constrains_key(right, key),
        Expr::Binary {
            left,
            op: BinaryOp::Or,
            right,
        } => constrains_key(left, key) && constrains_key(right, key),
        Expr::Binary {
            left,
            op: BinaryOp::Eq,
            right,
        } => {
            matches!(&**left, Expr::Column { name, .. } if name == key)
                && matches!(&**right, Expr::Literal(value) if !value.is_null())
        }
        Expr::In {
            expr,
            list,
            negated: false,
        } => {
            matches!(&**expr, Expr::Column { name, .. } if name == key)
                && !list.is_empty()
                && list
                    .iter()
                    .all(|item| matches!(item, Expr::Literal(value) if !value.is_null()))
        }
        _ => false,
    }
}

/// Qualifies bare column references with a join alias.
fn qualify_unqualified(expr: Expr, alias: &str) -> Expr {
    match expr {
        Expr::Column {
            qualifier: None,
            name,
        } => Expr::qualified_column(alias, name),
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(qualify_unqualified(*operand, alias)),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(qualify_unqualified(*left, alias)),
            op,
            right: Box::new(qualify_unqualified(*right, alias)),
        },
        Expr::Function {
            name,
            args,
            distinct,
        } => Expr::Function {
            name,
            args: args
                .into_iter()
                .map(|arg| qualify_unqualified(arg, alias))
                .collect(),
            distinct,
        },
        Expr::In {
            expr,
            list,
            negated,
        } => Expr::In {
            expr: Box::new(qualify_unqualified(*expr, alias)),
            list: list
                .into_iter()
                .map(|item| qualify_unqualified(item, alias))
                .collect(),
            negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: Box::new(qualify_unqualified(*expr, alias)),
            low: Box::new(qualify_unqualified(*low, alias)),
            high: Box::new(qualify_unqualified(*high, alias)),
            negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(qualify_unqualified(*expr, alias)),
            negated,
        },
        other => other,
    }
}

/// Name resolution context.
struct ResolveCtx<'a> {
    def: &'a Arc<ModelDef>,
    root_qualifier: Option<String>,
    joins: &'a [ResolvedJoin],
    aliases: HashSet<String>,
}

/// Maps attribute names to column names, validating unknown references.
///
/// Function arguments and join conditions are lenient: anything unknown is
/// left as written, since raw SQL names are legitimate there.
fn resolve_expr(expr: Expr, ctx: &ResolveCtx<'_>, lenient: bool) -> Result<Expr> {
    match expr {
        Expr::Column {
            qualifier: None,
            name,
        } => {
            if ctx.aliases.contains(&name) {
                return Ok(Expr::column(name));
            }
            match ctx.def.column_of(&name) {
                Some(column) => Ok(Expr::Column {
                    qualifier: ctx.root_qualifier.clone(),
                    name: String::from(column),
                }),
                None if lenient => Ok(Expr::column(name)),
                None => Err(Error::Definition(format!(
                    "no attribute \"{name}\" on model {}",
                    ctx.def.name
                ))),
            }
        }
        Expr::Column {
            qualifier: Some(qualifier),
            name,
        } => {
            if qualifier == ctx.def.table || qualifier == ctx.def.name {
                let column = ctx.def.column_of(&name).unwrap_or(name.as_str()).to_string();
                return Ok(Expr::Column {
                    qualifier: Some(ctx.def.table.clone()),
                    name: column,
                });
            }
            if let Some(join) = ctx.joins.iter().find(|j| j.alias == qualifier) {
                let column = join.def.column_of(&name).unwrap_or(name.as_str()).to_string();
                return Ok(Expr::Column {
                    qualifier: Some(qualifier),
                    name: column,
                });
            }
            Ok(Expr::Column {
                qualifier: Some(qualifier),
                name,
            })
        }
        Expr::Unary { op, operand } => Ok(Expr::Unary {
            op,
            operand: Box::new(resolve_expr(*operand, ctx, lenient)?),
        }),
        Expr::Binary { left, op, right } => {
            let left = resolve_expr(*left, ctx, lenient)?;
            let right = coerce_literal(&left, resolve_expr(*right, ctx, lenient)?, ctx)?;
            let left = coerce_literal(&right, left, ctx)?;
            Ok(Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })
        }
        Expr::Function {
            name,
            args,
            distinct,
        } => Ok(Expr::Function {
            name,
            args: args
                .into_iter()
                .map(|arg| resolve_expr(arg, ctx, true))
                .collect::<Result<Vec<_>>>()?,
            distinct,
        }),
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let expr = resolve_expr(*expr, ctx, lenient)?;
            let list = list
                .into_iter()
                .map(|item| coerce_literal(&expr, resolve_expr(item, ctx, lenient)?, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::In {
                expr: Box::new(expr),
                list,
                negated,
            })
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let expr = resolve_expr(*expr, ctx, lenient)?;
            let low = coerce_literal(&expr, resolve_expr(*low, ctx, lenient)?, ctx)?;
            let high = coerce_literal(&expr, resolve_expr(*high, ctx, lenient)?, ctx)?;
            Ok(Expr::Between {
                expr: Box::new(expr),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            })
        }
        Expr::IsNull { expr, negated } => Ok(Expr::IsNull {
            expr: Box::new(resolve_expr(*expr, ctx, lenient)?),
            negated,
        }),
        Expr::Alias { expr, alias } => Ok(Expr::Alias {
            expr: Box::new(resolve_expr(*expr, ctx, lenient)?),
            alias,
        }),
        other => Ok(other),
    }
}

/// Encodes a comparison literal against the column type on the other
/// side, so conditions are type-aware (dates, booleans, JSON).
fn coerce_literal(target: &Expr, operand: Expr, ctx: &ResolveCtx<'_>) -> Result<Expr> {
    let Expr::Literal(value) = operand else {
        return Ok(operand);
    };
    let Expr::Column { qualifier, name } = target else {
        return Ok(Expr::Literal(value));
    };
    let attribute = match qualifier {
        None => ctx.def.attribute_by_column(name),
        Some(q) if *q == ctx.def.table => ctx.def.attribute_by_column(name),
        Some(q) => ctx
            .joins
            .iter()
            .find(|join| join.alias == *q)
            .and_then(|join| join.def.attribute_by_column(name)),
    };
    match attribute {
        Some(attribute) => Ok(Expr::Literal(uncast(value, &attribute.data_type)?)),
        None => Ok(Expr::Literal(value)),
    }
}

/// Hydrates result rows into entities, grouping joined rows by parent
/// primary key and accumulating collection-association children.
fn hydrate(model: &Model, spell: &Spell, rows: Vec<Row>) -> Result<Collection> {
    let def = model.def();

    if spell.joins.is_empty() {
        let mut collection = Collection::new();
        for row in rows {
            collection.push(Bone::instantiate(model.clone(), &row)?);
        }
        return Ok(collection);
    }

    let root = &def.table;
    let mut collection = Collection::new();
    let mut index_of: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let pk_column = def.primary_column();

    for row in rows {
        let mut branches: std::collections::HashMap<&str, Row> = std::collections::HashMap::new();
        for (key, value) in &row {
            let Some((prefix, column)) = key.split_once(':') else {
                continue;
            };
            branches
                .entry(prefix)
                .or_default()
                .insert(String::from(column), value.clone());
        }

        let root_row = branches.remove(root.as_str()).unwrap_or_default();
        let pk_value = root_row.get(pk_column).cloned().unwrap_or(Value::Null);
        let pk_key = format!("{pk_value:?}");

        let parent_index = match index_of.get(&pk_key) {
            Some(index) => *index,
            None => {
                let bone = Bone::instantiate(model.clone(), &root_row)?;
                collection.push(bone);
                index_of.insert(pk_key, collection.len() - 1);
                collection.len() - 1
            }
        };

        for join in spell.joins.iter().filter(|j| j.hydrated) {
            let Some(child_row) = branches.remove(join.alias.as_str()) else {
                continue;
            };
            let child_pk = join.def.primary_column();
            if child_row.get(child_pk).is_none_or(Value::is_null) {
                continue;
            }
            let child_model = Model::new(Arc::clone(&join.def), Arc::clone(model.realm_core()));
            let child = Bone::instantiate(child_model, &child_row)?;
            collection[parent_index].attach(&join.alias, child, join.collection);
        }
    }

    Ok(collection)
}
