//! Ordering terms: `(field, direction, null placement)` triples.
//!
//! A query's ordering is a sequence of terms compared lexicographically,
//! with earlier terms breaking ties for later ones. Null placement is per-term and
//! explicit; `Default` defers to the store's native rule, which for both
//! bundled stores is the PostgreSQL one (nulls sort as largest: last under
//! `Asc`, first under `Desc`).

use crate::metadata::Field;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Where rows with a null sort key go, independent of direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPlacement {
    /// Null rows before all non-null rows
    First,
    /// Null rows after all non-null rows
    Last,
    /// The store's native null ordering (store-dependent)
    Default,
}

/// One term of an ordering specification.
///
/// ```
/// # use quarry::{EntityDef, FieldDef, FieldKind};
/// # let member = EntityDef::new("member", vec![
/// #     FieldDef::new("username", FieldKind::Text).nullable(),
/// #     FieldDef::new("age", FieldKind::Int),
/// # ]);
/// let by_age = member.field("age")?.desc();
/// let by_name = member.field("username")?.asc().nulls_last();
/// # Ok::<(), quarry::QueryError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    field: Field,
    direction: Direction,
    nulls: NullPlacement,
}

impl OrderTerm {
    pub(crate) fn new(field: Field, direction: Direction, nulls: NullPlacement) -> Self {
        Self {
            field,
            direction,
            nulls,
        }
    }

    /// Place null rows after all non-null rows, regardless of direction.
    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullPlacement::Last;
        self
    }

    /// Place null rows before all non-null rows, regardless of direction.
    pub fn nulls_first(mut self) -> Self {
        self.nulls = NullPlacement::First;
        self
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn nulls(&self) -> NullPlacement {
        self.nulls
    }
}
