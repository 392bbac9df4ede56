//! # Quarry
//!
//! Typed query construction and execution over a relational store.
//!
//! Callers build predicates, orderings, pagination windows, and aggregations
//! against entity-shaped data without hand-writing SQL, then execute the
//! resulting immutable [`Query`] in one of four fetch modes. The store behind
//! the query is a [`Store`] collaborator; the crate ships an in-process
//! [`MemoryStore`] and a PostgreSQL store over `may_postgres`.
//!
//! See [README on GitHub](https://github.com/microscaler/quarry) for full
//! architecture.

pub mod config;
pub mod error;
pub mod metadata;
pub mod query;
pub mod store;
pub mod value;

#[cfg(feature = "tracing")]
pub(crate) mod trace;

#[doc(hidden)]
pub mod tests_cfg;

pub use config::StoreConfig;
pub use error::QueryError;
pub use metadata::{Capability, CapabilitySet, EntityDef, Field, FieldDef, FieldKind};
pub use query::aggregate::{AggExpr, Aggregate, AggregateQuery, AggregateRow, Selection};
pub use query::execution::ResultPage;
pub use query::order::{Direction, NullPlacement, OrderTerm};
pub use query::predicate::Predicate;
pub use query::select::{PageWindow, Query, Select};
pub use store::memory::MemoryStore;
pub use store::postgres::PostgresStore;
pub use store::{ReadScope, Store, StoreError};
pub use value::{Record, Value};
