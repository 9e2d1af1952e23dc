//! Association descriptors.
//!
//! Associations are registered on the model definition and expanded into
//! LEFT JOINs when a query pulls them in with `with`/`include`. Hydration
//! of the joined rows lives in `spell`.

/// The association kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// One related row on the other side, holding our foreign key.
    HasOne,
    /// Many related rows on the other side, holding our foreign key.
    HasMany,
    /// We hold the foreign key of the related row.
    BelongsTo,
}

/// A declared association.
#[derive(Debug, Clone)]
pub struct Association {
    /// The association (and join alias) name.
    pub name: String,
    /// The kind.
    pub kind: AssociationKind,
    /// The target model name.
    pub model: String,
    /// The foreign key column; derived from the owning side when omitted.
    pub foreign_key: Option<String>,
    /// For many-to-many: the join model mediating the relation.
    pub through: Option<String>,
    /// A static predicate on the target, in object-condition form.
    pub where_: Option<serde_json::Value>,
    /// Default ordering for hydrated children.
    pub order_by: Option<String>,
    /// Columns to select on the target; all when empty.
    pub select: Vec<String>,
}

impl Association {
    /// Creates a new association descriptor.
    #[must_use]
    pub fn new(kind: AssociationKind, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
            foreign_key: None,
            through: None,
            where_: None,
            order_by: None,
            select: Vec::new(),
        }
    }

    /// Sets an explicit foreign key.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Routes the relation through a join model.
    #[must_use]
    pub fn through(mut self, model: impl Into<String>) -> Self {
        self.through = Some(model.into());
        self
    }

    /// Adds a static predicate on the target.
    #[must_use]
    pub fn where_(mut self, cond: serde_json::Value) -> Self {
        self.where_ = Some(cond);
        self
    }

    /// Sets the default ordering for hydrated children.
    #[must_use]
    pub fn order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    /// Restricts the selected columns on the target.
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Returns whether hydration accumulates children into an array.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self.kind, AssociationKind::HasMany)
    }
}

/// Branch options for a single `with`/`include` in a query.
#[derive(Debug, Clone, Default)]
pub struct IncludeOptions {
    /// Columns to select on this branch.
    pub select: Option<Vec<String>>,
    /// Extra predicate on this branch, in object-condition form.
    pub where_: Option<serde_json::Value>,
    /// Ordering for this branch.
    pub order: Option<String>,
}

/// A pending `with`/`include`, resolved into joins at finalization.
#[derive(Debug, Clone)]
pub struct IncludeSpec {
    /// The association name.
    pub name: String,
    /// Per-branch options.
    pub options: IncludeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let assoc = Association::new(AssociationKind::HasMany, "comments", "Comment")
            .foreign_key("article_id")
            .order_by("id desc");
        assert_eq!(assoc.name, "comments");
        assert_eq!(assoc.foreign_key.as_deref(), Some("article_id"));
        assert!(assoc.is_collection());
    }
}
