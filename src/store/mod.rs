//! The store collaborator boundary.
//!
//! A [`Store`] owns the data and knows how to run a validated plan; the query
//! layer never sees SQL or table storage directly. Two implementations ship
//! with the crate:
//! - [`memory::MemoryStore`]: in-process tables, used by tests and local
//!   development
//! - [`postgres::PostgresStore`]: PostgreSQL over `may_postgres`, rendering
//!   plans with `sea-query`
//!
//! `persist`/`flush`/`clear` are the write-path primitives used by test and
//! setup code; the query layer itself only ever reads.

use crate::query::aggregate::{AggregatePlan, AggregateRow};
use crate::query::select::SelectPlan;
use crate::value::Record;
use may_postgres::Error as PostgresError;
use std::fmt;

pub mod memory;
pub mod postgres;

/// Store error type, opaque to the query layer.
///
/// The query layer wraps these as `QueryError::Execution` and propagates them
/// unchanged; no retry, no partial results.
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// Query execution error
    Query(String),
    /// Row decoding error
    Decode(String),
    /// Other store errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Postgres(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            StoreError::Query(s) => {
                write!(f, "Query error: {s}")
            }
            StoreError::Decode(s) => {
                write!(f, "Decode error: {s}")
            }
            StoreError::Other(s) => {
                write!(f, "Store error: {s}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        StoreError::Postgres(err)
    }
}

/// A relational store that can run validated query plans.
///
/// `persist` stages a row; `flush` makes staged rows visible to queries;
/// `clear` discards staged rows that were never flushed. The read methods
/// translate the plan into the store's native execution and are the only
/// capability the query layer depends on.
pub trait Store {
    /// Stage a row for the given table. Not visible to queries until
    /// `flush` is called.
    fn persist(&self, table: &str, record: Record) -> Result<(), StoreError>;

    /// Apply all staged rows.
    fn flush(&self) -> Result<(), StoreError>;

    /// Discard staged rows that have not been flushed.
    fn clear(&self) -> Result<(), StoreError>;

    /// Run a select plan and return the matching rows, ordered and paginated
    /// per the plan.
    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError>;

    /// Count the rows matching the plan's predicate. Callers strip ordering
    /// and pagination from the plan first (see `SelectPlan::for_count`).
    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError>;

    /// Run an aggregation plan and return one row per group (or a single row
    /// when ungrouped).
    fn aggregate(&self, plan: &AggregatePlan) -> Result<Vec<AggregateRow>, StoreError>;

    /// Open a scoped read transaction so that multiple reads observe the same
    /// snapshot. The scope releases its transaction when dropped, on every
    /// exit path.
    fn begin_read(&self) -> Result<Box<dyn ReadScope + '_>, StoreError>;
}

/// A scoped read transaction handed out by [`Store::begin_read`].
///
/// Reads through the scope observe one consistent snapshot. Dropping the
/// scope releases the underlying transaction.
pub trait ReadScope {
    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError>;
    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError>;
}
