//! Aggregation and grouping.
//!
//! An aggregation selects a mix of group-key fields and aggregate
//! expressions over a root entity (optionally joined and filtered), groups by
//! zero or more fields, and returns one [`AggregateRow`] per group. Ungrouped
//! aggregation returns exactly one row, even over zero source rows.
//!
//! Capability rules mirror the select builder: `sum`/`avg` need the `Sum`
//! capability, `max`/`min` need `Order`, group-by keys need `Compare`, and a
//! plain field selection must also be a group-by key.

use crate::error::QueryError;
use crate::metadata::{Capability, EntityDef, Field};
use crate::query::order::OrderTerm;
use crate::query::predicate::Predicate;
use crate::query::select::{
    check_capability, check_joins, check_predicate, check_scoped, scope_of, Join,
};
use crate::store::Store;
use crate::value::Value;

/// A scalar aggregate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    /// Row count within the group (`COUNT(*)`)
    Count,
    /// Sum of a numeric field; null source values are skipped
    Sum(Field),
    /// Arithmetic mean of a numeric field, computed as a decimal
    Avg(Field),
    /// Largest non-null value of an orderable field
    Max(Field),
    /// Smallest non-null value of an orderable field
    Min(Field),
}

/// One projected column of an aggregation: a group-key field or an
/// aggregate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    Agg(AggExpr),
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

impl From<AggExpr> for Selection {
    fn from(expr: AggExpr) -> Self {
        Selection::Agg(expr)
    }
}

/// The validated, store-facing shape of an aggregation.
#[derive(Debug, Clone)]
pub struct AggregatePlan {
    pub root: EntityDef,
    pub joins: Vec<Join>,
    pub predicate: Option<Predicate>,
    pub selections: Vec<Selection>,
    pub group_by: Vec<Field>,
    pub order: Vec<OrderTerm>,
}

/// One row of computed aggregates, with values in selection order.
///
/// Ungrouped `count` over zero rows is `Int(0)`, `sum` is a numeric zero,
/// and `avg`/`max`/`min` are `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    values: Vec<Value>,
}

impl AggregateRow {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// The value at the given selection position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl From<AggregateRow> for Vec<Value> {
    fn from(row: AggregateRow) -> Self {
        row.values
    }
}

/// Builder for aggregation queries.
///
/// # Example
///
/// ```
/// use quarry::{AggExpr, Aggregate, EntityDef, FieldDef, FieldKind, MemoryStore};
///
/// let member = EntityDef::new(
///     "member",
///     vec![FieldDef::new("age", FieldKind::Int)],
/// );
/// let store = MemoryStore::new();
///
/// let rows = Aggregate::over(&member)
///     .select(AggExpr::Count)
///     .select(AggExpr::Sum(member.field("age")?))
///     .build()?
///     .fetch(&store)?;
/// // Ungrouped aggregation always yields one row.
/// assert_eq!(rows.len(), 1);
/// # Ok::<(), quarry::QueryError>(())
/// ```
pub struct Aggregate {
    root: EntityDef,
    joins: Vec<Join>,
    fragments: Vec<Option<Predicate>>,
    selections: Vec<Selection>,
    group_by: Vec<Field>,
    order: Vec<OrderTerm>,
}

impl Aggregate {
    /// Start an aggregation over the given root entity.
    pub fn over(root: &EntityDef) -> Self {
        Self {
            root: root.clone(),
            joins: Vec::new(),
            fragments: Vec::new(),
            selections: Vec::new(),
            group_by: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Project a group-key field or an aggregate expression. Output columns
    /// keep selection order.
    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selections.push(selection.into());
        self
    }

    /// Inner-join a related entity under an alias, as in
    /// [`crate::Select::join`]. Required when aggregating over fields
    /// reachable only through a relation; the join key determines group
    /// membership.
    pub fn join(mut self, target: &EntityDef, alias: &str, on_local: Field, on_foreign: Field) -> Self {
        self.joins.push(Join {
            target: target.clone(),
            alias: alias.to_string(),
            on_local,
            on_foreign,
        });
        self
    }

    /// Add a predicate fragment over the source rows; fragments are ANDed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.fragments.push(Some(predicate));
        self
    }

    /// Add an optional fragment. `None` means "no constraint".
    pub fn filter_opt(mut self, predicate: Option<Predicate>) -> Self {
        self.fragments.push(predicate);
        self
    }

    /// Group by a field. One output row per distinct combination of group-by
    /// values among matching source rows.
    pub fn group_by(mut self, field: Field) -> Self {
        self.group_by.push(field);
        self
    }

    /// Layer an explicit ordering over the grouped rows. The term's field
    /// must be one of the group-by keys; without any ordering, groups come
    /// back in the store's natural grouping order.
    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.order.push(term);
        self
    }

    /// Validate and freeze into an immutable [`AggregateQuery`].
    ///
    /// # Errors
    ///
    /// `QueryError::FieldMismatch` for out-of-scope fields, for a plain
    /// field selection that is not a group-by key, and for an order term
    /// whose field is not a group-by key; `QueryError::Capability` when an
    /// aggregate is applied to a field lacking the required capability.
    pub fn build(self) -> Result<AggregateQuery, QueryError> {
        let scope = scope_of(&self.root, &self.joins);
        check_joins(&self.root, &self.joins)?;

        let predicate = Predicate::all(self.fragments);
        if let Some(pred) = &predicate {
            check_predicate(pred, &scope)?;
        }

        for field in &self.group_by {
            check_scoped(field, &scope)?;
            check_capability(field, Capability::Compare, "group by")?;
        }

        for selection in &self.selections {
            match selection {
                Selection::Field(field) => {
                    check_scoped(field, &scope)?;
                    if !self.group_by.contains(field) {
                        return Err(QueryError::FieldMismatch {
                            field: format!("{}.{}", field.source(), field.name()),
                            scope: "group-by keys".to_string(),
                        });
                    }
                }
                Selection::Agg(AggExpr::Count) => {}
                Selection::Agg(AggExpr::Sum(field)) => {
                    check_scoped(field, &scope)?;
                    check_capability(field, Capability::Sum, "sum")?;
                }
                Selection::Agg(AggExpr::Avg(field)) => {
                    check_scoped(field, &scope)?;
                    check_capability(field, Capability::Sum, "avg")?;
                }
                Selection::Agg(AggExpr::Max(field)) => {
                    check_scoped(field, &scope)?;
                    check_capability(field, Capability::Order, "max")?;
                }
                Selection::Agg(AggExpr::Min(field)) => {
                    check_scoped(field, &scope)?;
                    check_capability(field, Capability::Order, "min")?;
                }
            }
        }

        for term in &self.order {
            check_scoped(term.field(), &scope)?;
            check_capability(term.field(), Capability::Order, "order by")?;
            // Grouped output only carries the group keys, so ordering by
            // anything else has no column to sort on.
            if !self.group_by.contains(term.field()) {
                return Err(QueryError::FieldMismatch {
                    field: format!("{}.{}", term.field().source(), term.field().name()),
                    scope: "group-by keys".to_string(),
                });
            }
        }

        Ok(AggregateQuery {
            plan: AggregatePlan {
                root: self.root,
                joins: self.joins,
                predicate,
                selections: self.selections,
                group_by: self.group_by,
                order: self.order,
            },
        })
    }
}

/// An immutable, executable aggregation query.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    plan: AggregatePlan,
}

impl AggregateQuery {
    /// The validated plan handed to store implementations.
    pub fn plan(&self) -> &AggregatePlan {
        &self.plan
    }

    /// Execute against the store, returning one row per group.
    ///
    /// # Errors
    ///
    /// Store failures propagate unchanged as `QueryError::Execution`.
    pub fn fetch<S: Store + ?Sized>(&self, store: &S) -> Result<Vec<AggregateRow>, QueryError> {
        let rows = store.aggregate(&self.plan)?;
        log::debug!(
            "aggregate over `{}` returned {} group(s)",
            self.plan.root.table(),
            rows.len()
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldDef, FieldKind};

    fn member() -> EntityDef {
        EntityDef::new(
            "member",
            vec![
                FieldDef::new("id", FieldKind::Int),
                FieldDef::new("username", FieldKind::Text).nullable(),
                FieldDef::new("age", FieldKind::Int),
                FieldDef::new("team_id", FieldKind::Int),
            ],
        )
    }

    fn team() -> EntityDef {
        EntityDef::new(
            "team",
            vec![
                FieldDef::new("id", FieldKind::Int),
                FieldDef::new("name", FieldKind::Text),
            ],
        )
    }

    #[test]
    fn sum_on_text_is_a_capability_error() {
        let m = member();
        let err = Aggregate::over(&m)
            .select(AggExpr::Sum(m.field("username").unwrap()))
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::Capability { .. }));
    }

    #[test]
    fn max_needs_order_not_sum() {
        let m = member();
        // Text is orderable, so max over username builds fine.
        let ok = Aggregate::over(&m)
            .select(AggExpr::Max(m.field("username").unwrap()))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn plain_field_selection_must_be_grouped() {
        let m = member();
        let err = Aggregate::over(&m)
            .select(m.field("username").unwrap())
            .select(AggExpr::Count)
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::FieldMismatch { .. }));

        let ok = Aggregate::over(&m)
            .select(m.field("username").unwrap())
            .select(AggExpr::Count)
            .group_by(m.field("username").unwrap())
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn order_term_must_be_a_group_by_key() {
        let m = member();
        let err = Aggregate::over(&m)
            .select(m.field("username").unwrap())
            .select(AggExpr::Count)
            .group_by(m.field("username").unwrap())
            .order_by(m.field("age").unwrap().desc())
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::FieldMismatch { .. }));

        let ok = Aggregate::over(&m)
            .select(m.field("username").unwrap())
            .select(AggExpr::Count)
            .group_by(m.field("username").unwrap())
            .order_by(m.field("username").unwrap().desc())
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn grouping_by_an_unjoined_relation_is_a_mismatch() {
        let m = member();
        let t = team();
        let err = Aggregate::over(&m)
            .select(AggExpr::Avg(m.field("age").unwrap()))
            .group_by(t.field("name").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::FieldMismatch { .. }));

        let ok = Aggregate::over(&m)
            .join(&t, "team", m.field("team_id").unwrap(), t.field("id").unwrap())
            .select(t.field("name").unwrap())
            .select(AggExpr::Avg(m.field("age").unwrap()))
            .group_by(t.field("name").unwrap())
            .build();
        assert!(ok.is_ok());
    }
}
