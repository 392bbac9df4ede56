//! Entity metadata: the static description of queryable types.
//!
//! An [`EntityDef`] names a table and its fields; each [`FieldDef`] carries a
//! kind, nullability, and the capability set determined at registration time.
//! Queries never reference fields by bare name; they hold a [`Field`]
//! reference resolved through the entity definition, so the builder can
//! validate scope and capabilities before any I/O happens.

use crate::error::QueryError;
use crate::query::order::{Direction, NullPlacement, OrderTerm};
use crate::query::predicate::Predicate;
use crate::value::Value;
use std::sync::Arc;

/// What an operation may require of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Usable in equality predicates
    Compare,
    /// Usable in ordering terms and `max`/`min`
    Order,
    /// Usable in `sum`/`avg` (numeric)
    Sum,
}

/// The fixed capability set attached to a field at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    compare: bool,
    order: bool,
    sum: bool,
}

impl CapabilitySet {
    pub fn contains(&self, cap: Capability) -> bool {
        match cap {
            Capability::Compare => self.compare,
            Capability::Order => self.order,
            Capability::Sum => self.sum,
        }
    }
}

/// Storage kind of a field. `Int` maps to `BIGINT` and `Decimal` to
/// `NUMERIC` on the Postgres store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Decimal,
    Text,
    Bool,
    Uuid,
    Timestamp,
    Json,
}

impl FieldKind {
    /// Default capability set per kind: numeric kinds get everything,
    /// text and timestamps are comparable and orderable, the rest are
    /// comparable only.
    fn default_caps(self) -> CapabilitySet {
        match self {
            FieldKind::Int | FieldKind::Decimal => CapabilitySet {
                compare: true,
                order: true,
                sum: true,
            },
            FieldKind::Text | FieldKind::Timestamp => CapabilitySet {
                compare: true,
                order: true,
                sum: false,
            },
            FieldKind::Bool | FieldKind::Uuid | FieldKind::Json => CapabilitySet {
                compare: true,
                order: false,
                sum: false,
            },
        }
    }
}

/// A field declaration inside an [`EntityDef`].
#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    nullable: bool,
    caps: CapabilitySet,
}

impl FieldDef {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: false,
            caps: kind.default_caps(),
        }
    }

    /// Mark the field as nullable (absent values read as `Null`).
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

#[derive(Debug)]
struct EntityInner {
    table: String,
    fields: Vec<FieldDef>,
}

/// Static description of a queryable type.
///
/// Cheap to clone (`Arc` inner); definitions are typically registered once
/// as statics and shared across queries.
///
/// # Example
///
/// ```
/// use quarry::{EntityDef, FieldDef, FieldKind};
///
/// let member = EntityDef::new(
///     "member",
///     vec![
///         FieldDef::new("id", FieldKind::Int),
///         FieldDef::new("username", FieldKind::Text).nullable(),
///         FieldDef::new("age", FieldKind::Int),
///         FieldDef::new("team_id", FieldKind::Int),
///     ],
/// );
/// let age = member.field("age").unwrap();
/// assert_eq!(age.name(), "age");
/// ```
#[derive(Debug, Clone)]
pub struct EntityDef {
    inner: Arc<EntityInner>,
}

impl EntityDef {
    pub fn new(table: &str, fields: Vec<FieldDef>) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                table: table.to_string(),
                fields,
            }),
        }
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.inner.fields
    }

    /// Resolve a field reference, qualified by this entity's table name.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::FieldMismatch` for an unknown field name.
    pub fn field(&self, name: &str) -> Result<Field, QueryError> {
        self.field_as(self.table(), name)
    }

    /// Resolve a field reference under a join alias.
    ///
    /// Used when the entity participates in a query under an alias other
    /// than its table name; the returned reference is only valid in queries
    /// that join this entity under that alias.
    pub fn field_as(&self, alias: &str, name: &str) -> Result<Field, QueryError> {
        let def = self
            .inner
            .fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| QueryError::FieldMismatch {
                field: name.to_string(),
                scope: self.inner.table.clone(),
            })?;
        Ok(Field {
            source: alias.to_string(),
            name: def.name.clone(),
            kind: def.kind,
            nullable: def.nullable,
            caps: def.caps,
        })
    }
}

/// A handle to one entity's attribute, tagged with its capability set.
///
/// Predicates and order terms are built from these; the query builder
/// validates every reference against the query's join scope at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    source: String,
    name: String,
    kind: FieldKind,
    nullable: bool,
    caps: CapabilitySet,
}

impl Field {
    /// The scope qualifier: the root table name or a join alias.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn caps(&self) -> CapabilitySet {
        self.caps
    }

    /// Equality predicate over this field.
    ///
    /// `Value::Null` turns into an is-null test rather than `= NULL`.
    /// Capability and scope checks happen when the query is built.
    pub fn eq(&self, value: impl Into<Value>) -> Predicate {
        Predicate::Eq(self.clone(), value.into())
    }

    /// Ascending order term with the store's default null placement.
    pub fn asc(&self) -> OrderTerm {
        OrderTerm::new(self.clone(), Direction::Asc, NullPlacement::Default)
    }

    /// Descending order term with the store's default null placement.
    pub fn desc(&self) -> OrderTerm {
        OrderTerm::new(self.clone(), Direction::Desc, NullPlacement::Default)
    }
}
