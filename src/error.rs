//! Error taxonomy for the query layer.
//!
//! Build-time errors (`FieldMismatch`, `Capability`) prevent a `Query` from
//! being constructed at all; execution-time errors (`NonUniqueResult`,
//! `Execution`) surface from a fetch call. Store failures propagate unchanged
//! inside `Execution`; the query layer never retries and never returns a
//! truncated result set.

use crate::metadata::Capability;
use crate::store::StoreError;
use std::fmt;

/// Error type for query construction and execution
#[derive(Debug)]
pub enum QueryError {
    /// A referenced field does not belong to the query's scope
    /// (wrong root type, or a related type that was never joined).
    /// Raised at build time, never at execution time.
    FieldMismatch {
        field: String,
        scope: String,
    },
    /// `fetch_one` matched more than one row. Raised at execution time;
    /// never silently resolved by picking an arbitrary row.
    NonUniqueResult {
        count: usize,
    },
    /// An operator was applied to a field lacking the required capability
    /// (e.g. `sum` on a non-numeric field). Raised at build time.
    Capability {
        field: String,
        operation: &'static str,
        required: Capability,
    },
    /// Opaque failure surfaced by the store collaborator.
    Execution(StoreError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::FieldMismatch { field, scope } => {
                write!(f, "Field mismatch: `{field}` is not in scope ({scope})")
            }
            QueryError::NonUniqueResult { count } => {
                write!(f, "Non-unique result: expected at most one row, got {count}")
            }
            QueryError::Capability {
                field,
                operation,
                required,
            } => {
                write!(
                    f,
                    "Capability error: `{operation}` on `{field}` requires the {required:?} capability"
                )
            }
            QueryError::Execution(e) => {
                write!(f, "Execution error: {e}")
            }
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        QueryError::Execution(err)
    }
}
