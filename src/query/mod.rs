//! Query construction and execution.
//!
//! The module splits along the lifecycle of a query:
//! - **Predicate**: the boolean expression tree (`predicate`)
//! - **Order**: ordering terms with explicit null placement (`order`)
//! - **Select**: the builder that validates and freezes a [`Query`] (`select`)
//! - **Execution**: the four fetch modes on a built query (`execution`)
//! - **Aggregate**: grouped and ungrouped scalar aggregation (`aggregate`)
//!
//! Build-time validation happens entirely in the builders; execution hands a
//! validated plan to a [`crate::store::Store`] and shapes the rows it gets
//! back.
//!
//! # Examples
//!
//! ```
//! use quarry::{EntityDef, FieldDef, FieldKind, MemoryStore, Select};
//!
//! let member = EntityDef::new(
//!     "member",
//!     vec![
//!         FieldDef::new("username", FieldKind::Text).nullable(),
//!         FieldDef::new("age", FieldKind::Int),
//!     ],
//! );
//! let store = MemoryStore::new();
//!
//! let rows = Select::from(&member)
//!     .filter(member.field("age")?.eq(10))
//!     .order_by(member.field("username")?.asc())
//!     .build()?
//!     .fetch_all(&store)?;
//! assert!(rows.is_empty());
//! # Ok::<(), quarry::QueryError>(())
//! ```

// Predicate algebra
pub mod predicate;
#[doc(inline)]
pub use predicate::Predicate;

// Ordering terms
pub mod order;
#[doc(inline)]
pub use order::{Direction, NullPlacement, OrderTerm};

// SELECT query builder
pub mod select;
#[doc(inline)]
pub use select::{Join, PageWindow, Query, Select, SelectPlan};

// Fetch modes
pub mod execution;
#[doc(inline)]
pub use execution::ResultPage;

// Aggregation and grouping
pub mod aggregate;
#[doc(inline)]
pub use aggregate::{AggExpr, Aggregate, AggregatePlan, AggregateQuery, AggregateRow, Selection};
