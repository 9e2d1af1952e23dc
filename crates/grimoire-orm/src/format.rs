//! Formats finalized Spells into dialect-specific SQL.
//!
//! Two modes share one writer: `Parameterized` collects bind values and
//! emits placeholders in the dialect's style, `Inline` renders literals in
//! place (the `to_sql_string` surface). Formatting is pure; repeated calls
//! over the same finalized Spell yield the same output.

use grimoire_sql_core::dialect::{Dialect, UpsertStyle};
use grimoire_sql_core::value::Value;
use grimoire_sql_core::{BinaryOp, Direction, Expr, UnaryOp};

use crate::error::{Error, Result};
use crate::model::ModelDef;
use crate::spell::{Command, SetValue, Spell};

/// Formatted SQL plus its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    /// The SQL text.
    pub sql: String,
    /// Values bound to the placeholders, in order.
    pub values: Vec<Value>,
}

/// Output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Emit placeholders and collect bind values.
    Parameterized,
    /// Render literals inline.
    Inline,
}

/// Formats a finalized Spell.
pub(crate) fn format(spell: &Spell, dialect: &dyn Dialect, mode: Mode) -> Result<SqlFragment> {
    let mut formatter = Formatter {
        dialect,
        mode,
        params: Vec::new(),
    };
    let mut sql = String::new();
    match spell.command {
        Command::Select => formatter.select(&mut sql, spell)?,
        Command::Update => formatter.update(&mut sql, spell)?,
        Command::Delete => formatter.delete(&mut sql, spell)?,
        Command::Insert | Command::Upsert => formatter.insert(&mut sql, spell)?,
    }
    Ok(SqlFragment {
        sql,
        values: formatter.params,
    })
}

struct Formatter<'a> {
    dialect: &'a dyn Dialect,
    mode: Mode,
    params: Vec<Value>,
}

impl Formatter<'_> {
    fn value(&mut self, out: &mut String, value: &Value, precision: Option<u8>) {
        match value {
            Value::Raw(sql) => out.push_str(sql),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.value(out, item, precision);
                }
            }
            _ => match self.mode {
                Mode::Inline => out.push_str(&self.dialect.format_value(value, precision)),
                Mode::Parameterized => {
                    // Datetimes bind as formatted text so every driver
                    // stores the same literal.
                    let bound = match value {
                        Value::DateTime(dt) => {
                            Value::Text(self.dialect.format_datetime(dt, precision))
                        }
                        other => other.clone(),
                    };
                    self.params.push(bound);
                    out.push_str(&self.dialect.placeholder(self.params.len()));
                }
            },
        }
    }

    fn column(out: &mut String, qualifier: Option<&str>, name: &str) {
        if let Some(qualifier) = qualifier {
            out.push_str(qualifier);
            out.push('.');
        }
        out.push_str(name);
    }

    /// Writes an operand, parenthesizing when it binds looser than its
    /// parent.
    fn operand(
        &mut self,
        out: &mut String,
        expr: &Expr,
        parent: u8,
        spell: &Spell,
    ) -> Result<()> {
        let needs_parens = match expr {
            Expr::Binary { op, .. } => op.precedence() < parent,
            _ => false,
        };
        if needs_parens {
            out.push('(');
            self.expr(out, expr, spell)?;
            out.push(')');
        } else {
            self.expr(out, expr, spell)?;
        }
        Ok(())
    }

    fn expr(&mut self, out: &mut String, expr: &Expr, spell: &Spell) -> Result<()> {
        match expr {
            Expr::Literal(value) => {
                self.value(out, value, None);
                Ok(())
            }
            Expr::Column { qualifier, name } => {
                Self::column(out, qualifier.as_deref(), name);
                Ok(())
            }
            Expr::Wildcard { qualifier } => {
                if let Some(qualifier) = qualifier {
                    out.push_str(qualifier);
                    out.push('.');
                }
                out.push('*');
                Ok(())
            }
            Expr::Placeholder(_) => Err(Error::Query(String::from(
                "unbound placeholder in condition",
            ))),
            Expr::Unary { op, operand } => {
                match op {
                    UnaryOp::Not => {
                        out.push_str("NOT ");
                        if operand.is_logical() {
                            out.push('(');
                            self.expr(out, operand, spell)?;
                            out.push(')');
                        } else {
                            self.expr(out, operand, spell)?;
                        }
                    }
                    UnaryOp::Neg | UnaryOp::BitNot => {
                        out.push_str(op.as_str());
                        self.operand(out, operand, u8::MAX, spell)?;
                    }
                }
                Ok(())
            }
            Expr::Binary { left, op, right } => {
                let precedence = op.precedence();
                self.operand(out, left, precedence, spell)?;
                out.push(' ');
                out.push_str(op.as_str());
                out.push(' ');
                // Right side gets a stricter bound so same-precedence
                // chains stay left-associative.
                let datetime_hint = self.datetime_hint(spell, left);
                match (&**right, datetime_hint) {
                    (Expr::Literal(value), Some(precision)) => {
                        self.value(out, value, Some(precision));
                    }
                    _ => self.operand(out, right, precedence + 1, spell)?,
                }
                Ok(())
            }
            Expr::Function {
                name,
                args,
                distinct,
            } => {
                out.push_str(name);
                out.push('(');
                if *distinct {
                    out.push_str("DISTINCT ");
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.expr(out, arg, spell)?;
                }
                out.push(')');
                Ok(())
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                self.operand(out, expr, 5, spell)?;
                out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match item {
                        Expr::Subquery(index) => self.subquery(out, *index, spell, false)?,
                        other => self.expr(out, other, spell)?,
                    }
                }
                out.push(')');
                Ok(())
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                self.operand(out, expr, 5, spell)?;
                out.push_str(if *negated {
                    " NOT BETWEEN "
                } else {
                    " BETWEEN "
                });
                self.operand(out, low, 5, spell)?;
                out.push_str(" AND ");
                self.operand(out, high, 5, spell)?;
                Ok(())
            }
            Expr::IsNull { expr, negated } => {
                self.operand(out, expr, 5, spell)?;
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
            Expr::Alias { expr, alias } => {
                self.expr(out, expr, spell)?;
                out.push_str(" AS ");
                out.push_str(alias);
                Ok(())
            }
            Expr::Raw(sql) => {
                out.push_str(sql);
                Ok(())
            }
            Expr::Subquery(index) => self.subquery(out, *index, spell, true),
        }
    }

    fn subquery(
        &mut self,
        out: &mut String,
        index: usize,
        spell: &Spell,
        parens: bool,
    ) -> Result<()> {
        let subquery = spell.subqueries.get(index).ok_or_else(|| {
            Error::Query(format!("unknown subquery reference #{index}"))
        })?;
        if parens {
            out.push('(');
        }
        self.select(out, subquery)?;
        if parens {
            out.push(')');
        }
        Ok(())
    }

    /// Returns the datetime precision of the column on the other side of
    /// a comparison, so datetime literals render with it.
    fn datetime_hint(&self, spell: &Spell, expr: &Expr) -> Option<u8> {
        let Expr::Column { qualifier, name } = expr else {
            return None;
        };
        let def = spell.model().def();
        let attribute = match qualifier {
            None => def.attribute_by_column(name),
            Some(q) if *q == def.table => def.attribute_by_column(name),
            Some(q) => spell
                .joins
                .iter()
                .find(|join| join.alias == *q)
                .and_then(|join| join.def.attribute_by_column(name)),
        };
        attribute.and_then(|a| a.data_type.datetime_precision())
    }

    // ---- clauses -------------------------------------------------------

    fn where_clause(
        &mut self,
        out: &mut String,
        keyword: &str,
        conds: &[Expr],
        spell: &Spell,
    ) -> Result<()> {
        if conds.is_empty() {
            return Ok(());
        }
        out.push(' ');
        out.push_str(keyword);
        out.push(' ');
        for (i, cond) in conds.iter().enumerate() {
            if i > 0 {
                out.push_str(" AND ");
            }
            // A logical combination is parenthesized before being AND-ed
            // with the rest, scope filters included.
            if conds.len() > 1 && cond.is_logical() {
                out.push('(');
                self.expr(out, cond, spell)?;
                out.push(')');
            } else {
                self.expr(out, cond, spell)?;
            }
        }
        Ok(())
    }

    fn order_clause(
        &mut self,
        out: &mut String,
        orders: &[(Expr, Direction)],
        spell: &Spell,
    ) -> Result<()> {
        if orders.is_empty() {
            return Ok(());
        }
        out.push_str(" ORDER BY ");
        for (i, (expr, direction)) in orders.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr(out, expr, spell)?;
            out.push(' ');
            out.push_str(direction.as_str());
        }
        Ok(())
    }

    fn limit_clause(out: &mut String, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }
    }

    // ---- SELECT --------------------------------------------------------

    fn select(&mut self, out: &mut String, spell: &Spell) -> Result<()> {
        let def = spell.model().def();
        let aliased = !spell.joins.is_empty();

        out.push_str("SELECT ");
        if aliased {
            self.aliased_select_list(out, spell)?;
        } else if spell.columns.is_empty() {
            out.push('*');
        } else {
            for (i, column) in spell.columns.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.expr(out, column, spell)?;
            }
        }

        out.push_str(" FROM ");
        let paginate_root = aliased
            && (spell.limit.is_some() || spell.offset.is_some())
            && !references_join_alias(spell);
        if paginate_root {
            // LIMIT must count parent rows, so the root select nests.
            out.push('(');
            out.push_str("SELECT * FROM ");
            out.push_str(&def.table);
            self.where_clause(out, "WHERE", &spell.wheres, spell)?;
            self.order_clause(out, &spell.orders, spell)?;
            Self::limit_clause(out, spell.limit, spell.offset);
            out.push_str(") AS ");
            out.push_str(&def.table);
        } else {
            out.push_str(&def.table);
        }

        for join in &spell.joins {
            out.push_str(" LEFT JOIN ");
            out.push_str(&join.def.table);
            out.push_str(" AS ");
            out.push_str(&join.alias);
            out.push_str(" ON ");
            self.expr(out, &join.on, spell)?;
        }

        if !paginate_root {
            self.where_clause(out, "WHERE", &spell.wheres, spell)?;
        }

        if !spell.groups.is_empty() {
            out.push_str(" GROUP BY ");
            for (i, group) in spell.groups.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                self.expr(out, group, spell)?;
            }
        }
        self.where_clause(out, "HAVING", &spell.havings, spell)?;

        let mut orders = if paginate_root {
            Vec::new()
        } else {
            spell.orders.clone()
        };
        for join in &spell.joins {
            orders.extend(join.orders.iter().cloned());
        }
        self.order_clause(out, &orders, spell)?;

        if !paginate_root {
            Self::limit_clause(out, spell.limit, spell.offset);
        }
        Ok(())
    }

    /// Select list for joined queries: every column aliased
    /// `"{qualifier}:{column}"` so hydration can split the row.
    fn aliased_select_list(&mut self, out: &mut String, spell: &Spell) -> Result<()> {
        let def = spell.model().def();
        let mut first = true;

        if spell.columns.is_empty() {
            for attribute in def.attributes.iter().filter(|a| !a.is_virtual()) {
                self.aliased_column(out, &def.table, &attribute.column_name, &mut first);
            }
        } else {
            for column in &spell.columns {
                match column {
                    Expr::Column {
                        qualifier: Some(qualifier),
                        name,
                    } => {
                        let qualifier = qualifier.clone();
                        let name = name.clone();
                        self.aliased_column(out, &qualifier, &name, &mut first);
                    }
                    other => {
                        if !first {
                            out.push_str(", ");
                        }
                        first = false;
                        self.expr(out, other, spell)?;
                    }
                }
            }
        }

        for join in &spell.joins {
            let columns: Vec<String> = if join.columns.is_empty() {
                join.def
                    .attributes
                    .iter()
                    .filter(|a| !a.is_virtual())
                    .map(|a| a.column_name.clone())
                    .collect()
            } else {
                join.columns
                    .iter()
                    .map(|name| {
                        join.def
                            .column_of(name)
                            .map_or_else(|| name.clone(), String::from)
                    })
                    .collect()
            };
            for column in columns {
                self.aliased_column(out, &join.alias, &column, &mut first);
            }
        }
        Ok(())
    }

    fn aliased_column(&mut self, out: &mut String, qualifier: &str, column: &str, first: &mut bool) {
        if !*first {
            out.push_str(", ");
        }
        *first = false;
        Self::column(out, Some(qualifier), column);
        out.push_str(" AS ");
        out.push_str(&self.dialect.quote(&format!("{qualifier}:{column}")));
    }

    // ---- UPDATE / DELETE ----------------------------------------------

    fn set_clause(&mut self, out: &mut String, spell: &Spell, def: &ModelDef) -> Result<()> {
        out.push_str(" SET ");
        let mut first = true;
        for (name, set_value) in &spell.sets {
            let Some(attribute) = def.find_attribute(name) else {
                continue;
            };
            if !first {
                out.push_str(", ");
            }
            first = false;
            out.push_str(&attribute.column_name);
            out.push_str(" = ");
            match set_value {
                SetValue::Value(value) => {
                    self.value(out, value, attribute.data_type.datetime_precision());
                }
                SetValue::Expr(expr) => self.expr(out, expr, spell)?,
            }
        }
        Ok(())
    }

    fn update(&mut self, out: &mut String, spell: &Spell) -> Result<()> {
        let def = spell.model().def().clone();
        out.push_str("UPDATE ");
        out.push_str(&def.table);
        self.set_clause(out, spell, &def)?;
        self.paginated_mutation_tail(out, spell, &def)
    }

    fn delete(&mut self, out: &mut String, spell: &Spell) -> Result<()> {
        let def = spell.model().def().clone();
        out.push_str("DELETE FROM ");
        out.push_str(&def.table);
        self.paginated_mutation_tail(out, spell, &def)
    }

    /// WHERE clause of a mutation, with the `pk IN (SELECT pk ...)`
    /// rewrite on dialects without native UPDATE ... LIMIT.
    fn paginated_mutation_tail(
        &mut self,
        out: &mut String,
        spell: &Spell,
        def: &ModelDef,
    ) -> Result<()> {
        let paginated = spell.limit.is_some() || !spell.orders.is_empty();
        if !paginated {
            return self.where_clause(out, "WHERE", &spell.wheres, spell);
        }
        if self.dialect.supports_update_limit() {
            self.where_clause(out, "WHERE", &spell.wheres, spell)?;
            self.order_clause(out, &spell.orders, spell)?;
            Self::limit_clause(out, spell.limit, None);
            return Ok(());
        }

        let pk = def.primary_column();
        out.push_str(" WHERE ");
        out.push_str(pk);
        out.push_str(" IN (SELECT ");
        out.push_str(pk);
        out.push_str(" FROM ");
        out.push_str(&def.table);
        self.where_clause(out, "WHERE", &spell.wheres, spell)?;
        self.order_clause(out, &spell.orders, spell)?;
        Self::limit_clause(out, spell.limit, spell.offset);
        out.push(')');
        Ok(())
    }

    // ---- INSERT / UPSERT ----------------------------------------------

    fn insert(&mut self, out: &mut String, spell: &Spell) -> Result<()> {
        let def = spell.model().def().clone();

        // Insert columns: the union of supplied attributes, in
        // declaration order.
        let attributes: Vec<&crate::model::AttributeDef> = def
            .attributes
            .iter()
            .filter(|a| !a.is_virtual() && spell.rows.iter().any(|row| row.contains(&a.name)))
            .collect();
        if attributes.is_empty() {
            return Err(Error::Query(format!(
                "cannot insert into {} with no values",
                def.table
            )));
        }

        out.push_str("INSERT INTO ");
        out.push_str(&def.table);
        out.push_str(" (");
        for (i, attribute) in attributes.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&attribute.column_name);
        }
        out.push_str(") VALUES ");

        for (i, row) in spell.rows.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push('(');
            for (j, attribute) in attributes.iter().enumerate() {
                if j > 0 {
                    out.push_str(", ");
                }
                let value = row
                    .get(&attribute.name)
                    .cloned()
                    .or_else(|| attribute.default_value.clone())
                    .unwrap_or(Value::Null);
                self.value(out, &value, attribute.data_type.datetime_precision());
            }
            out.push(')');
        }

        let upserting =
            spell.command == Command::Upsert || spell.options.update_on_duplicate.is_some();
        if upserting {
            self.upsert_clause(out, spell, &def, &attributes)?;
        }

        if self.dialect.supports_returning() {
            let pk_auto = def
                .find_attribute(&def.primary_key)
                .is_some_and(|a| a.auto_increment);
            let mut returning: Vec<String> = Vec::new();
            if pk_auto {
                returning.push(String::from(def.primary_column()));
            }
            if let Some(extra) = &spell.options.returning {
                for name in extra {
                    let column = def.column_of(name).unwrap_or(name.as_str()).to_string();
                    if !returning.contains(&column) {
                        returning.push(column);
                    }
                }
            }
            if !returning.is_empty() {
                out.push_str(" RETURNING ");
                for (i, column) in returning.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.dialect.quote(column));
                }
            }
        }
        Ok(())
    }

    fn upsert_clause(
        &mut self,
        out: &mut String,
        spell: &Spell,
        def: &ModelDef,
        attributes: &[&crate::model::AttributeDef],
    ) -> Result<()> {
        // The update branch never overwrites created_at.
        let update_names: Vec<&str> = match &spell.options.update_on_duplicate {
            Some(names) if !names.is_empty() => names.iter().map(String::as_str).collect(),
            Some(_) => attributes
                .iter()
                .map(|a| a.name.as_str())
                .filter(|name| *name != "created_at" && *name != def.primary_key)
                .collect(),
            None => attributes
                .iter()
                .map(|a| a.name.as_str())
                .filter(|name| *name != "created_at")
                .collect(),
        };

        match self.dialect.upsert_style() {
            UpsertStyle::OnDuplicateKey => {
                out.push_str(" ON DUPLICATE KEY UPDATE ");
                let mut first = true;
                let pk_attribute = def.find_attribute(&def.primary_key);
                if pk_attribute.is_some_and(|a| a.auto_increment) {
                    let pk = def.primary_column();
                    out.push_str(&format!("{pk} = LAST_INSERT_ID({pk})"));
                    first = false;
                }
                for name in update_names {
                    let Some(column) = def.column_of(name) else {
                        continue;
                    };
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    out.push_str(&format!("{column} = VALUES({column})"));
                }
            }
            UpsertStyle::OnConflict => {
                let conflict: Vec<String> = spell
                    .options
                    .unique_keys
                    .clone()
                    .or_else(|| def.unique_keys.first().cloned())
                    .unwrap_or_else(|| vec![def.primary_key.clone()])
                    .iter()
                    .map(|name| def.column_of(name).unwrap_or(name.as_str()).to_string())
                    .collect();
                out.push_str(" ON CONFLICT (");
                for (i, column) in conflict.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.dialect.quote(column));
                }
                out.push_str(") DO UPDATE SET ");
                let mut first = true;
                for name in update_names {
                    let Some(column) = def.column_of(name) else {
                        continue;
                    };
                    if conflict.iter().any(|c| c == column) {
                        continue;
                    }
                    if !first {
                        out.push_str(", ");
                    }
                    first = false;
                    out.push_str(&format!("{column} = EXCLUDED.{column}"));
                }
            }
        }
        Ok(())
    }
}

/// Returns whether the top-level WHERE or ORDER touches a joined alias.
fn references_join_alias(spell: &Spell) -> bool {
    let refs = |expr: &Expr| {
        let mut found = false;
        expr.walk(&mut |node| {
            if let Expr::Column {
                qualifier: Some(qualifier),
                ..
            } = node
            {
                if spell.joins.iter().any(|join| join.alias == *qualifier) {
                    found = true;
                }
            }
        });
        found
    };
    spell.wheres.iter().any(refs) || spell.orders.iter().any(|(expr, _)| refs(expr))
}
