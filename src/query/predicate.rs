//! Predicate algebra: composable boolean expressions over entity fields.
//!
//! One canonical tagged tree backs both construction styles: the explicit
//! `Equals(..).and(Equals(..))` chain and the builder's variadic fragment
//! list, which folds with conjunction and skips absent fragments. The two
//! styles produce identical trees, so they are equivalent by construction.
//!
//! Predicates are pure data: no I/O, no interior mutability. Evaluation is
//! the store's job.

use crate::metadata::Field;
use crate::value::Value;

/// A boolean expression tree over field references and literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals value. With `Value::Null` this is an is-null test.
    Eq(Field, Value),
    /// Conjunction of two sub-predicates.
    And(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Conjoin with another predicate.
    ///
    /// ```
    /// # use quarry::{EntityDef, FieldDef, FieldKind};
    /// # let member = EntityDef::new("member", vec![
    /// #     FieldDef::new("username", FieldKind::Text).nullable(),
    /// #     FieldDef::new("age", FieldKind::Int),
    /// # ]);
    /// let pred = member.field("username")?.eq("member1")
    ///     .and(member.field("age")?.eq(10));
    /// # Ok::<(), quarry::QueryError>(())
    /// ```
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// Fold fragments with conjunction, treating `None` as "no constraint".
    ///
    /// Returns `None` when every fragment is absent: an unconstrained
    /// query, not an error.
    pub fn all<I>(fragments: I) -> Option<Predicate>
    where
        I: IntoIterator<Item = Option<Predicate>>,
    {
        fragments
            .into_iter()
            .flatten()
            .reduce(|acc, next| acc.and(next))
    }

    /// Visit every field reference in the tree (builder validation).
    pub(crate) fn for_each_field(&self, visit: &mut impl FnMut(&Field)) {
        match self {
            Predicate::Eq(field, _) => visit(field),
            Predicate::And(a, b) => {
                a.for_each_field(visit);
                b.for_each_field(visit);
            }
        }
    }
}
