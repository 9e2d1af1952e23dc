//! Condition parsing and placeholder binding.
//!
//! Conditions arrive in two surface forms: the SQL mini-language with `?`
//! placeholders (`"title like ? or author_id = ?"`) and the `$op` object
//! form (`json!({"title": {"$like": "%Post%"}})`). Both compile into the
//! same [`Expr`] tree here; column names stay as attribute names until the
//! owning Spell resolves them at finalization.

use chrono::{DateTime, Utc};
use grimoire_sql_core::parser::parse_expr;
use grimoire_sql_core::value::{Raw, ToValue, Value};
use grimoire_sql_core::{BinaryOp, Expr};

use crate::error::{Error, Result};
use crate::spell::Spell;

/// An argument bound to a `?` placeholder.
pub enum CondArg {
    /// A plain value; lists expand into IN lists.
    Value(Value),
    /// A sub-Spell, compiled as a correlated subquery.
    Subquery(Box<Spell>),
}

impl std::fmt::Debug for CondArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Subquery(_) => f.write_str("Subquery(..)"),
        }
    }
}

/// Conversion into a placeholder argument.
pub trait IntoCondArg {
    /// Performs the conversion.
    fn into_cond_arg(self) -> CondArg;
}

impl IntoCondArg for Spell {
    fn into_cond_arg(self) -> CondArg {
        CondArg::Subquery(Box::new(self))
    }
}

macro_rules! impl_into_cond_arg {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl IntoCondArg for $ty {
                fn into_cond_arg(self) -> CondArg {
                    CondArg::Value(self.to_value())
                }
            }
        )+
    };
}

impl_into_cond_arg!(
    Value,
    Raw,
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    String,
    &str,
    DateTime<Utc>,
);

impl<T: ToValue> IntoCondArg for Vec<T> {
    fn into_cond_arg(self) -> CondArg {
        CondArg::Value(Value::List(
            self.into_iter().map(ToValue::to_value).collect(),
        ))
    }
}

impl<T: ToValue> IntoCondArg for Option<T> {
    fn into_cond_arg(self) -> CondArg {
        CondArg::Value(self.to_value())
    }
}

/// A user-facing condition in any accepted form.
#[derive(Debug)]
pub enum Cond {
    /// A mini-language string plus its placeholder arguments.
    Sql(String, Vec<CondArg>),
    /// An object condition with `$op` leaves.
    Object(serde_json::Value),
    /// An already-built expression tree.
    Expr(Expr),
}

/// Conversion into a [`Cond`].
pub trait IntoCond {
    /// Performs the conversion.
    fn into_cond(self) -> Cond;
}

impl IntoCond for Cond {
    fn into_cond(self) -> Cond {
        self
    }
}

impl IntoCond for &str {
    fn into_cond(self) -> Cond {
        Cond::Sql(String::from(self), Vec::new())
    }
}

impl IntoCond for String {
    fn into_cond(self) -> Cond {
        Cond::Sql(self, Vec::new())
    }
}

impl IntoCond for serde_json::Value {
    fn into_cond(self) -> Cond {
        Cond::Object(self)
    }
}

impl IntoCond for Expr {
    fn into_cond(self) -> Cond {
        Cond::Expr(self)
    }
}

macro_rules! impl_into_cond_tuple {
    ($($name:ident),+) => {
        #[allow(non_snake_case)]
        impl<$($name: IntoCondArg),+> IntoCond for (&str, $($name),+) {
            fn into_cond(self) -> Cond {
                let (sql, $($name),+) = self;
                Cond::Sql(String::from(sql), vec![$($name.into_cond_arg()),+])
            }
        }
    };
}

impl_into_cond_tuple!(A);
impl_into_cond_tuple!(A, B);
impl_into_cond_tuple!(A, B, C);
impl_into_cond_tuple!(A, B, C, D);
impl_into_cond_tuple!(A, B, C, D, E);

/// Compiles a condition into an expression tree.
///
/// Sub-Spell arguments are appended to `subqueries` and referenced by
/// index from the tree.
pub(crate) fn parse_cond(cond: Cond, subqueries: &mut Vec<Spell>) -> Result<Expr> {
    match cond {
        Cond::Expr(expr) => Ok(expr),
        Cond::Sql(sql, args) => parse_sql_cond(&sql, args, subqueries),
        Cond::Object(json) => parse_object_cond(&json),
    }
}

fn parse_sql_cond(sql: &str, args: Vec<CondArg>, subqueries: &mut Vec<Spell>) -> Result<Expr> {
    let expr = parse_expr(sql)?;
    let mut placeholders = 0;
    expr.walk(&mut |node| {
        if matches!(node, Expr::Placeholder(_)) {
            placeholders += 1;
        }
    });
    if placeholders != args.len() {
        return Err(Error::Query(format!(
            "parameter count mismatch in \"{sql}\": {placeholders} placeholders, {} arguments",
            args.len()
        )));
    }

    let mut slots: Vec<Option<Expr>> = Vec::with_capacity(args.len());
    for arg in args {
        slots.push(Some(match arg {
            CondArg::Value(value) => Expr::Literal(value),
            CondArg::Subquery(spell) => {
                subqueries.push(*spell);
                Expr::Subquery(subqueries.len() - 1)
            }
        }));
    }

    Ok(normalize(bind(expr, &mut slots)))
}

/// Substitutes placeholder nodes with their bound arguments.
fn bind(expr: Expr, slots: &mut [Option<Expr>]) -> Expr {
    match expr {
        Expr::Placeholder(position) => slots
            .get_mut(position)
            .and_then(Option::take)
            .unwrap_or(Expr::Literal(Value::Null)),
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(bind(*operand, slots)),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(bind(*left, slots)),
            op,
            right: Box::new(bind(*right, slots)),
        },
        Expr::Function {
            name,
            args,
            distinct,
        } => Expr::Function {
            name,
            args: args.into_iter().map(|a| bind(a, slots)).collect(),
            distinct,
        },
        Expr::In {
            expr,
            list,
            negated,
        } => Expr::In {
            expr: Box::new(bind(*expr, slots)),
            list: list.into_iter().map(|e| bind(e, slots)).collect(),
            negated,
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: Box::new(bind(*expr, slots)),
            low: Box::new(bind(*low, slots)),
            high: Box::new(bind(*high, slots)),
            negated,
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(bind(*expr, slots)),
            negated,
        },
        Expr::Alias { expr, alias } => Expr::Alias {
            expr: Box::new(bind(*expr, slots)),
            alias,
        },
        other => other,
    }
}

/// Rewrites bound comparisons into their canonical nodes: `= NULL` into
/// IS NULL, `= [list]` into IN, and IN over a bound list into its items.
fn normalize(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { left, op, right } => {
            let left = normalize(*left);
            let right = normalize(*right);
            match (&op, &right) {
                (BinaryOp::Eq, Expr::Literal(Value::Null)) => Expr::IsNull {
                    expr: Box::new(left),
                    negated: false,
                },
                (BinaryOp::NotEq, Expr::Literal(Value::Null)) => Expr::IsNull {
                    expr: Box::new(left),
                    negated: true,
                },
                (BinaryOp::Eq | BinaryOp::NotEq, Expr::Literal(Value::List(_))) => {
                    let Expr::Literal(Value::List(items)) = right else {
                        unreachable!()
                    };
                    Expr::In {
                        expr: Box::new(left),
                        list: in_list_items(items),
                        negated: op == BinaryOp::NotEq,
                    }
                }
                _ => Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            }
        }
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let expr = Box::new(normalize(*expr));
            // `IN ?` bound to a list or a subquery.
            let list = if list.len() == 1 {
                match list.into_iter().next() {
                    Some(Expr::Literal(Value::List(items))) => in_list_items(items),
                    Some(other) => vec![normalize(other)],
                    None => Vec::new(),
                }
            } else {
                list.into_iter().map(normalize).collect()
            };
            Expr::In {
                expr,
                list,
                negated,
            }
        }
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(normalize(*operand)),
        },
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Expr::Between {
            expr: Box::new(normalize(*expr)),
            low: Box::new(normalize(*low)),
            high: Box::new(normalize(*high)),
            negated,
        },
        other => other,
    }
}

/// An empty IN list compiles to `IN (NULL)`, a guaranteed-empty match.
fn in_list_items(items: Vec<Value>) -> Vec<Expr> {
    if items.is_empty() {
        vec![Expr::Literal(Value::Null)]
    } else {
        items.into_iter().map(Expr::Literal).collect()
    }
}

/// Compiles an object condition into an expression tree.
pub(crate) fn parse_object_cond(json: &serde_json::Value) -> Result<Expr> {
    let serde_json::Value::Object(map) = json else {
        return Err(Error::Query(format!(
            "unexpected condition {json}, expected an object"
        )));
    };

    let mut conds = Vec::new();
    for (key, value) in map {
        conds.push(object_entry(key, value)?);
    }
    and_join(conds).ok_or_else(|| Error::Query(String::from("unexpected empty condition object")))
}

fn and_join(conds: Vec<Expr>) -> Option<Expr> {
    conds.into_iter().reduce(Expr::and)
}

fn object_entry(key: &str, value: &serde_json::Value) -> Result<Expr> {
    match key {
        "$and" | "$or" => logical_list(key, value),
        "$not" => Ok(parse_object_cond(value)?.not()),
        _ => {
            let column = column_expr(key);
            column_predicate(&column, value)
        }
    }
}

fn logical_list(op: &str, value: &serde_json::Value) -> Result<Expr> {
    let items = match value {
        serde_json::Value::Array(items) if !items.is_empty() => items.clone(),
        serde_json::Value::Object(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| {
                serde_json::Value::Object(serde_json::Map::from_iter([(k.clone(), v.clone())]))
            })
            .collect(),
        _ => {
            return Err(Error::Query(format!(
                "unexpected logical operator value {value} for {op}"
            )))
        }
    };

    let mut conds = Vec::new();
    for item in &items {
        conds.push(parse_object_cond(item)?);
    }
    let joined = if op == "$or" {
        conds.into_iter().reduce(Expr::or)
    } else {
        and_join(conds)
    };
    joined.ok_or_else(|| Error::Query(format!("unexpected logical operator value for {op}")))
}

fn column_expr(key: &str) -> Expr {
    match key.split_once('.') {
        Some((qualifier, name)) => Expr::qualified_column(qualifier, name),
        None => Expr::column(key),
    }
}

/// Compiles the predicate(s) a column key maps to.
fn column_predicate(column: &Expr, value: &serde_json::Value) -> Result<Expr> {
    match value {
        serde_json::Value::Null => Ok(column.clone().is_null()),
        serde_json::Value::Array(items) => Ok(Expr::In {
            expr: Box::new(column.clone()),
            list: in_list_items(items.iter().cloned().map(Value::from_json).collect()),
            negated: false,
        }),
        serde_json::Value::Object(map) => {
            let mut conds = Vec::new();
            for (op, operand) in map {
                conds.push(operator_predicate(column, op, operand)?);
            }
            and_join(conds).ok_or_else(|| {
                Error::Query(format!("unexpected empty operator object for {column:?}"))
            })
        }
        scalar => Ok(column
            .clone()
            .eq(Expr::Literal(Value::from_json(scalar.clone())))),
    }
}

fn operator_predicate(
    column: &Expr,
    op: &str,
    operand: &serde_json::Value,
) -> Result<Expr> {
    let scalar = || Expr::Literal(Value::from_json(operand.clone()));
    let list = || -> Result<Vec<Expr>> {
        match operand {
            serde_json::Value::Array(items) => Ok(in_list_items(
                items.iter().cloned().map(Value::from_json).collect(),
            )),
            other => Err(Error::Query(format!(
                "unexpected operand {other} for {op}, expected an array"
            ))),
        }
    };
    let pair = || -> Result<(Expr, Expr)> {
        match operand {
            serde_json::Value::Array(items) if items.len() == 2 => Ok((
                Expr::Literal(Value::from_json(items[0].clone())),
                Expr::Literal(Value::from_json(items[1].clone())),
            )),
            other => Err(Error::Query(format!(
                "unexpected operand {other} for {op}, expected [low, high]"
            ))),
        }
    };

    match op {
        "$eq" => Ok(if operand.is_null() {
            column.clone().is_null()
        } else {
            column.clone().eq(scalar())
        }),
        "$ne" => Ok(if operand.is_null() {
            column.clone().is_not_null()
        } else {
            column.clone().not_eq(scalar())
        }),
        "$gt" => Ok(column.clone().gt(scalar())),
        "$gte" => Ok(column.clone().gt_eq(scalar())),
        "$lt" => Ok(column.clone().lt(scalar())),
        "$lte" => Ok(column.clone().lt_eq(scalar())),
        "$in" => Ok(Expr::In {
            expr: Box::new(column.clone()),
            list: list()?,
            negated: false,
        }),
        "$nin" | "$notIn" => Ok(Expr::In {
            expr: Box::new(column.clone()),
            list: list()?,
            negated: true,
        }),
        "$between" => {
            let (low, high) = pair()?;
            Ok(column.clone().between(low, high))
        }
        "$notBetween" => {
            let (low, high) = pair()?;
            Ok(column.clone().not_between(low, high))
        }
        "$like" => Ok(column.clone().like(scalar())),
        "$notLike" => Ok(column.clone().binary(BinaryOp::NotLike, scalar())),
        "$or" | "$and" => {
            let items = match operand {
                serde_json::Value::Array(items) if !items.is_empty() => items,
                other => {
                    return Err(Error::Query(format!(
                        "unexpected logical operator value {other} for {op}"
                    )))
                }
            };
            let mut conds = Vec::new();
            for item in items {
                conds.push(column_predicate(column, item)?);
            }
            let joined = if op == "$or" {
                conds.into_iter().reduce(Expr::or)
            } else {
                and_join(conds)
            };
            joined.ok_or_else(|| {
                Error::Query(format!("unexpected logical operator value for {op}"))
            })
        }
        "$not" => Ok(column_predicate(column, operand)?.not()),
        unknown => Err(Error::Query(format!("unexpected operator \"{unknown}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(json: serde_json::Value) -> Expr {
        parse_object_cond(&json).unwrap()
    }

    #[test]
    fn test_scalar_is_equality() {
        assert_eq!(
            object(json!({"title": "New Post"})),
            Expr::column("title").eq(Expr::Literal(Value::Text(String::from("New Post"))))
        );
    }

    #[test]
    fn test_null_is_is_null() {
        assert_eq!(object(json!({"deleted_at": null})), Expr::column("deleted_at").is_null());
    }

    #[test]
    fn test_array_is_in() {
        assert_eq!(
            object(json!({"id": [1, 2]})),
            Expr::column("id").in_list(vec![
                Expr::Literal(Value::Int(1)),
                Expr::Literal(Value::Int(2)),
            ])
        );
    }

    #[test]
    fn test_empty_in_compiles_to_in_null() {
        assert_eq!(
            object(json!({"id": {"$in": []}})),
            Expr::column("id").in_list(vec![Expr::Literal(Value::Null)])
        );
    }

    #[test]
    fn test_operator_object_joined_by_and() {
        let expr = object(json!({"word_count": {"$gte": 10, "$lt": 100}}));
        assert_eq!(
            expr,
            Expr::column("word_count")
                .gt_eq(Expr::Literal(Value::Int(10)))
                .and(Expr::column("word_count").lt(Expr::Literal(Value::Int(100))))
        );
    }

    #[test]
    fn test_top_level_or() {
        let expr = object(json!({"$or": [{"title": "Leah"}, {"title": "Diablo"}]}));
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::Or,
                ..
            }
        ));
    }

    #[test]
    fn test_or_with_empty_value_fails() {
        let err = parse_object_cond(&json!({"$or": []})).unwrap_err();
        assert!(err
            .to_string()
            .contains("unexpected logical operator value"));
    }

    #[test]
    fn test_unknown_operator_fails() {
        let err = parse_object_cond(&json!({"title": {"$fuzzy": 1}})).unwrap_err();
        assert!(err.to_string().contains("unexpected operator"));
    }

    #[test]
    fn test_nested_not() {
        let expr = object(json!({"$not": {"title": "Leah"}}));
        assert!(matches!(expr, Expr::Unary { .. }));
    }

    #[test]
    fn test_sql_cond_binding() {
        let mut subqueries = Vec::new();
        let expr = parse_sql_cond(
            "title like ? and word_count > ?",
            vec!["%Post%".into_cond_arg(), 10.into_cond_arg()],
            &mut subqueries,
        )
        .unwrap();
        assert_eq!(
            expr,
            Expr::column("title")
                .like(Expr::Literal(Value::Text(String::from("%Post%"))))
                .and(Expr::column("word_count").gt(Expr::Literal(Value::Int(10))))
        );
    }

    #[test]
    fn test_sql_cond_list_binding_becomes_in() {
        let mut subqueries = Vec::new();
        let expr = parse_sql_cond(
            "id in ?",
            vec![vec![1_i64, 2, 3].into_cond_arg()],
            &mut subqueries,
        )
        .unwrap();
        match expr {
            Expr::In { list, .. } => assert_eq!(list.len(), 3),
            other => panic!("expected IN, got {other:?}"),
        }
    }

    #[test]
    fn test_sql_cond_eq_null_becomes_is_null() {
        let mut subqueries = Vec::new();
        let expr = parse_sql_cond(
            "deleted_at = ?",
            vec![None::<i64>.into_cond_arg()],
            &mut subqueries,
        )
        .unwrap();
        assert_eq!(expr, Expr::column("deleted_at").is_null());
    }

    #[test]
    fn test_sql_cond_eq_list_becomes_in() {
        let mut subqueries = Vec::new();
        let expr = parse_sql_cond(
            "id = ?",
            vec![vec![4_i64, 5].into_cond_arg()],
            &mut subqueries,
        )
        .unwrap();
        assert!(matches!(expr, Expr::In { negated: false, .. }));
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let mut subqueries = Vec::new();
        let err =
            parse_sql_cond("id = ?", Vec::new(), &mut subqueries).unwrap_err();
        assert!(err.to_string().contains("parameter count mismatch"));
    }
}
