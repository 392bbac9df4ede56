//! Fetch modes for a built [`Query`].
//!
//! Four terminal modes, chosen per execution call:
//! - [`Query::fetch_one`]: at most one row, `NonUniqueResult` on more
//! - [`Query::fetch_first`]: first row per the query's ordering
//! - [`Query::fetch_all`]: the full ordered sequence
//! - [`Query::fetch_page`]: a page of rows plus the pagination-free total,
//!   read inside one scoped read transaction
//!
//! All modes are read-only blocking calls into the store. A `Query` is
//! immutable, so the same object can be executed any number of times and
//! yields identical results against unchanged data.

use crate::error::QueryError;
use crate::query::select::Query;
use crate::store::Store;
use crate::value::Record;

/// A page of results paired with the pagination-free total count.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    /// The rows of this page, in query order.
    pub records: Vec<Record>,
    /// Count of all rows matching the predicate, ignoring pagination.
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl Query {
    /// Fetch the single matching row.
    ///
    /// Returns `None` when nothing matches. The plan executes as built, so
    /// the uniqueness check observes the true match set rather than a
    /// truncated one.
    ///
    /// # Errors
    ///
    /// `QueryError::NonUniqueResult` when more than one row matches;
    /// `QueryError::Execution` on store failure.
    pub fn fetch_one<S: Store + ?Sized>(&self, store: &S) -> Result<Option<Record>, QueryError> {
        let mut rows = store.select(&self.plan)?;
        log::debug!("fetch_one over `{}` matched {} row(s)", self.plan.root.table(), rows.len());
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            count => Err(QueryError::NonUniqueResult { count }),
        }
    }

    /// Fetch the first matching row per the query's ordering, or `None`.
    ///
    /// Never errors on multiplicity; without an ordering the choice of row
    /// is store-dependent.
    pub fn fetch_first<S: Store + ?Sized>(&self, store: &S) -> Result<Option<Record>, QueryError> {
        let rows = store.select(&self.plan)?;
        Ok(rows.into_iter().next())
    }

    /// Fetch the full ordered sequence of matching rows, respecting the
    /// pagination window if one was set. Empty when nothing matches.
    pub fn fetch_all<S: Store + ?Sized>(&self, store: &S) -> Result<Vec<Record>, QueryError> {
        let rows = store.select(&self.plan)?;
        log::debug!("fetch_all over `{}` returned {} row(s)", self.plan.root.table(), rows.len());
        Ok(rows)
    }

    /// Fetch a [`ResultPage`]: the bounded page of rows and the
    /// pagination-free count of all rows matching the same predicate.
    ///
    /// The two reads run inside one scoped read transaction obtained from
    /// the store, so page and total agree in the absence of concurrent
    /// writers. The scope is released when it drops, on every exit path.
    pub fn fetch_page<S: Store + ?Sized>(&self, store: &S) -> Result<ResultPage, QueryError> {
        let scope = store.begin_read()?;
        let records = scope.select(&self.plan)?;
        let total = scope.count(&self.plan.for_count())?;
        drop(scope);

        // Without a window (or a limit) the page runs to the end, so the
        // reported limit falls back to the total.
        let (offset, limit) = match self.plan.page {
            Some(window) => (window.offset, window.limit.unwrap_or(total)),
            None => (0, total),
        };
        log::debug!(
            "fetch_page over `{}`: {} of {} row(s) at offset {}",
            self.plan.root.table(),
            records.len(),
            total,
            offset
        );
        Ok(ResultPage {
            records,
            total,
            offset,
            limit,
        })
    }
}
