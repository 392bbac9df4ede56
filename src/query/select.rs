//! Select query builder.
//!
//! `Select::from(&entity)` starts a builder; `build()` validates every field
//! reference against the query's join scope and the fields' capability sets,
//! then freezes the result into an immutable [`Query`]. The builder performs
//! no I/O, so all build-time errors happen before the store is ever touched.

use crate::error::QueryError;
use crate::metadata::{Capability, EntityDef, Field};
use crate::query::order::OrderTerm;
use crate::query::predicate::Predicate;
use std::collections::HashSet;

/// A join bringing a related entity's fields into the query's scope
/// under an alias.
#[derive(Debug, Clone)]
pub struct Join {
    pub target: EntityDef,
    pub alias: String,
    /// Join key on the already-scoped side
    pub on_local: Field,
    /// Join key on the joined entity, qualified by the alias
    pub on_foreign: Field,
}

/// A contiguous slice of the ordered result sequence.
///
/// `limit: None` means the window runs from `offset` to the end of the
/// result sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: Option<u64>,
}

/// The validated, store-facing shape of a select query.
///
/// Store implementations translate this into their native execution plan;
/// the query layer never hands a store an unvalidated field reference.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub root: EntityDef,
    pub joins: Vec<Join>,
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderTerm>,
    pub page: Option<PageWindow>,
}

impl SelectPlan {
    /// The same plan without ordering and pagination, the shape of the
    /// paired count read.
    pub(crate) fn for_count(&self) -> SelectPlan {
        SelectPlan {
            root: self.root.clone(),
            joins: self.joins.clone(),
            predicate: self.predicate.clone(),
            order: Vec::new(),
            page: None,
        }
    }
}

/// Builder for select queries.
///
/// # Example
///
/// ```
/// use quarry::{EntityDef, FieldDef, FieldKind, Select};
///
/// let member = EntityDef::new(
///     "member",
///     vec![
///         FieldDef::new("username", FieldKind::Text).nullable(),
///         FieldDef::new("age", FieldKind::Int),
///     ],
/// );
///
/// let query = Select::from(&member)
///     .filter(member.field("age")?.eq(100))
///     .order_by(member.field("age")?.desc())
///     .order_by(member.field("username")?.asc().nulls_last())
///     .offset(0)
///     .limit(10)
///     .build()?;
/// # Ok::<(), quarry::QueryError>(())
/// ```
pub struct Select {
    root: EntityDef,
    joins: Vec<Join>,
    fragments: Vec<Option<Predicate>>,
    order: Vec<OrderTerm>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl Select {
    /// Start a query over the given root entity.
    pub fn from(root: &EntityDef) -> Self {
        Self {
            root: root.clone(),
            joins: Vec::new(),
            fragments: Vec::new(),
            order: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Inner-join a related entity under an alias.
    ///
    /// `on_local` is the join key on the already-scoped side; `on_foreign`
    /// must be a field of `target` qualified by `alias` (resolve it with
    /// [`EntityDef::field_as`], or [`EntityDef::field`] when the alias is
    /// the table name). Fields of the joined entity become referenceable in
    /// predicates, ordering, and grouping for this query only.
    pub fn join(mut self, target: &EntityDef, alias: &str, on_local: Field, on_foreign: Field) -> Self {
        self.joins.push(Join {
            target: target.clone(),
            alias: alias.to_string(),
            on_local,
            on_foreign,
        });
        self
    }

    /// Add a predicate fragment; fragments are ANDed together.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.fragments.push(Some(predicate));
        self
    }

    /// Add an optional fragment. `None` means "no constraint" and is
    /// skipped, not an error.
    pub fn filter_opt(mut self, predicate: Option<Predicate>) -> Self {
        self.fragments.push(predicate);
        self
    }

    /// Add a batch of optional fragments, ANDed together with any
    /// previously added filters.
    pub fn filter_all<I>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = Option<Predicate>>,
    {
        self.fragments.extend(fragments);
        self
    }

    /// Append an ordering term; earlier terms break ties for later ones.
    pub fn order_by(mut self, term: OrderTerm) -> Self {
        self.order.push(term);
        self
    }

    /// Number of rows to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Maximum number of rows to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validate and freeze into an immutable [`Query`].
    ///
    /// # Errors
    ///
    /// `QueryError::FieldMismatch` when a referenced field is outside the
    /// join scope; `QueryError::Capability` when a predicate or ordering
    /// term uses a field lacking the required capability.
    pub fn build(self) -> Result<Query, QueryError> {
        let scope = scope_of(&self.root, &self.joins);
        check_joins(&self.root, &self.joins)?;

        let predicate = Predicate::all(self.fragments);
        if let Some(pred) = &predicate {
            check_predicate(pred, &scope)?;
        }
        for term in &self.order {
            check_scoped(term.field(), &scope)?;
            check_capability(term.field(), Capability::Order, "order by")?;
        }

        let page = match (self.offset, self.limit) {
            (None, None) => None,
            (offset, limit) => Some(PageWindow {
                offset: offset.unwrap_or(0),
                limit,
            }),
        };

        Ok(Query {
            plan: SelectPlan {
                root: self.root,
                joins: self.joins,
                predicate,
                order: self.order,
                page,
            },
        })
    }
}

/// An immutable, executable query.
///
/// Built once, executed any number of times; execution never mutates the
/// query, so it is safely shared and reused across threads. Fetch methods
/// live in [`crate::query::execution`].
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) plan: SelectPlan,
}

impl Query {
    /// The validated plan handed to store implementations.
    pub fn plan(&self) -> &SelectPlan {
        &self.plan
    }
}

pub(crate) fn scope_of<'a>(root: &'a EntityDef, joins: &'a [Join]) -> HashSet<&'a str> {
    let mut scope: HashSet<&str> = HashSet::new();
    scope.insert(root.table());
    for join in joins {
        scope.insert(join.alias.as_str());
    }
    scope
}

pub(crate) fn check_scoped(field: &Field, scope: &HashSet<&str>) -> Result<(), QueryError> {
    if scope.contains(field.source()) {
        Ok(())
    } else {
        Err(QueryError::FieldMismatch {
            field: format!("{}.{}", field.source(), field.name()),
            scope: {
                let mut names: Vec<&str> = scope.iter().copied().collect();
                names.sort_unstable();
                names.join(", ")
            },
        })
    }
}

pub(crate) fn check_capability(
    field: &Field,
    cap: Capability,
    operation: &'static str,
) -> Result<(), QueryError> {
    if field.caps().contains(cap) {
        Ok(())
    } else {
        Err(QueryError::Capability {
            field: format!("{}.{}", field.source(), field.name()),
            operation,
            required: cap,
        })
    }
}

pub(crate) fn check_predicate(
    pred: &Predicate,
    scope: &HashSet<&str>,
) -> Result<(), QueryError> {
    let mut result = Ok(());
    pred.for_each_field(&mut |field| {
        if result.is_ok() {
            result = check_scoped(field, scope)
                .and_then(|()| check_capability(field, Capability::Compare, "equals"));
        }
    });
    result
}

/// Join keys are validated incrementally: each local key must be in scope
/// before the join, each foreign key must be qualified by the join's alias.
pub(crate) fn check_joins(root: &EntityDef, joins: &[Join]) -> Result<(), QueryError> {
    let mut scope: HashSet<&str> = HashSet::new();
    scope.insert(root.table());
    for join in joins {
        check_scoped(&join.on_local, &scope)?;
        scope.insert(join.alias.as_str());
        if join.on_foreign.source() != join.alias {
            return Err(QueryError::FieldMismatch {
                field: format!("{}.{}", join.on_foreign.source(), join.on_foreign.name()),
                scope: join.alias.clone(),
            });
        }
        check_capability(&join.on_local, Capability::Compare, "join on")?;
        check_capability(&join.on_foreign, Capability::Compare, "join on")?;
    }
    Ok(())
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
    fn builds_a_plain_query() {
        let m = member();
        let query = Select::from(&m)
            .filter(m.field("username").unwrap().eq("member1"))
            .build()
            .unwrap();
        assert!(query.plan().predicate.is_some());
        assert!(query.plan().page.is_none());
    }

    #[test]
    fn foreign_field_without_join_is_a_mismatch() {
        let m = member();
        let t = team();
        let err = Select::from(&m)
            .filter(t.field("name").unwrap().eq("teamA"))
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::FieldMismatch { .. }));
    }

    #[test]
    fn joined_fields_come_into_scope() {
        let m = member();
        let t = team();
        let query = Select::from(&m)
            .join(
                &t,
                "team",
                m.field("team_id").unwrap(),
                t.field("id").unwrap(),
            )
            .filter(t.field("name").unwrap().eq("teamA"))
            .build();
        assert!(query.is_ok());
    }

    #[test]
    fn join_alias_scopes_the_foreign_key() {
        let m = member();
        let t = team();
        // on_foreign resolved under the table name but joined under "t2"
        let err = Select::from(&m)
            .join(&t, "t2", m.field("team_id").unwrap(), t.field("id").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::FieldMismatch { .. }));

        let ok = Select::from(&m)
            .join(
                &t,
                "t2",
                m.field("team_id").unwrap(),
                t.field_as("t2", "id").unwrap(),
            )
            .filter(t.field_as("t2", "name").unwrap().eq("teamA"))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn partial_window_fills_in_defaults() {
        let m = member();
        let query = Select::from(&m).limit(2).build().unwrap();
        let page = query.plan().page.unwrap();
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, Some(2));

        // Offset-only windows carry no limit sentinel.
        let query = Select::from(&m).offset(1).build().unwrap();
        let page = query.plan().page.unwrap();
        assert_eq!(page.offset, 1);
        assert_eq!(page.limit, None);
    }

    #[test]
    fn filter_opt_none_is_no_constraint() {
        let m = member();
        let query = Select::from(&m)
            .filter_opt(None)
            .filter_opt(Some(m.field("age").unwrap().eq(10)))
            .build()
            .unwrap();
        assert_eq!(
            query.plan().predicate,
            Some(m.field("age").unwrap().eq(10))
        );
    }

    #[test]
    fn query_is_cloneable_and_reusable() {
        let m = member();
        let query = Select::from(&m).build().unwrap();
        let copy = query.clone();
        assert_eq!(copy.plan().root.table(), "member");
    }
}
