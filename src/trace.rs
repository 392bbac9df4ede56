//! Tracing spans around store execution (feature `tracing`).

use tracing::{info_span, Span};

pub(crate) fn select_span(table: &str) -> Span {
    info_span!("quarry.select", table)
}

pub(crate) fn count_span(table: &str) -> Span {
    info_span!("quarry.count", table)
}

pub(crate) fn aggregate_span(table: &str) -> Span {
    info_span!("quarry.aggregate", table)
}
