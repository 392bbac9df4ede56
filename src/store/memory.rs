//! In-process store used by tests and local development.
//!
//! Tables are plain row vectors behind a `Mutex`. Joins are nested loops,
//! sorting is a stable sort over insertion order (which is what makes equal
//! rows keep a stable relative order across runs), and grouping goes through
//! a `BTreeMap` so groups come back in ascending group-key order.
//!
//! Queries see only flushed rows; `persist` stages, `flush` applies, `clear`
//! discards staged rows.

use crate::metadata::{Field, FieldKind};
use crate::query::aggregate::{AggExpr, AggregatePlan, AggregateRow, Selection};
use crate::query::order::{Direction, NullPlacement, OrderTerm};
use crate::query::predicate::Predicate;
use crate::query::select::{Join, SelectPlan};
use crate::store::{ReadScope, Store, StoreError};
use crate::value::{Record, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    staged: Vec<(String, Record)>,
}

/// An in-memory [`Store`].
///
/// # Example
///
/// ```
/// use quarry::{MemoryStore, Record, Store};
///
/// let store = MemoryStore::new();
/// store.persist("member", Record::new().with("username", "member1").with("age", 10))?;
/// store.flush()?;
/// # Ok::<(), quarry::StoreError>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Other("store mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn persist(&self, table: &str, record: Record) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables.staged.push((table.to_string(), record));
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let staged = std::mem::take(&mut tables.staged);
        for (table, record) in staged {
            tables.rows.entry(table).or_default().push(record);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        tables.staged.clear();
        Ok(())
    }

    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
        let tables = self.lock()?;
        select_rows(&tables, plan)
    }

    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError> {
        let tables = self.lock()?;
        count_rows(&tables, plan)
    }

    fn aggregate(&self, plan: &AggregatePlan) -> Result<Vec<AggregateRow>, StoreError> {
        let tables = self.lock()?;
        aggregate_rows(&tables, plan)
    }

    fn begin_read(&self) -> Result<Box<dyn ReadScope + '_>, StoreError> {
        // Holding the table lock for the scope's lifetime is this store's
        // snapshot: reads through the scope cannot interleave with writes.
        Ok(Box::new(MemoryReadScope {
            tables: self.lock()?,
        }))
    }
}

struct MemoryReadScope<'a> {
    tables: MutexGuard<'a, Tables>,
}

impl ReadScope for MemoryReadScope<'_> {
    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
        select_rows(&self.tables, plan)
    }

    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError> {
        count_rows(&self.tables, plan)
    }
}

/// A joined working row: one record slot per scoped source alias.
type JoinedRow = HashMap<String, Record>;

fn value_of(row: &JoinedRow, field: &Field) -> Value {
    row.get(field.source())
        .map(|record| record.value(field.name()))
        .unwrap_or(Value::Null)
}

/// SQL-style equality: null never equals anything, including null.
fn values_match(a: &Value, b: &Value) -> bool {
    !a.is_null() && !b.is_null() && a.total_cmp(b) == Ordering::Equal
}

fn eval_predicate(pred: &Predicate, row: &JoinedRow) -> bool {
    match pred {
        Predicate::Eq(field, value) => {
            let actual = value_of(row, field);
            if value.is_null() {
                actual.is_null()
            } else {
                values_match(&actual, value)
            }
        }
        Predicate::And(a, b) => eval_predicate(a, row) && eval_predicate(b, row),
    }
}

/// Join and filter the matching source rows, in insertion order.
fn solve(
    tables: &Tables,
    root_table: &str,
    joins: &[Join],
    predicate: &Option<Predicate>,
) -> Vec<JoinedRow> {
    let empty: Vec<Record> = Vec::new();
    let root_rows = tables.rows.get(root_table).unwrap_or(&empty);

    let mut joined: Vec<JoinedRow> = root_rows
        .iter()
        .map(|record| {
            let mut row = JoinedRow::new();
            row.insert(root_table.to_string(), record.clone());
            row
        })
        .collect();

    for join in joins {
        let target_rows = tables.rows.get(join.target.table()).unwrap_or(&empty);
        let mut next = Vec::new();
        for row in joined {
            let local = value_of(&row, &join.on_local);
            for candidate in target_rows {
                let foreign = candidate.value(join.on_foreign.name());
                if values_match(&local, &foreign) {
                    let mut extended = row.clone();
                    extended.insert(join.alias.clone(), candidate.clone());
                    next.push(extended);
                }
            }
        }
        joined = next;
    }

    match predicate {
        Some(pred) => joined.into_iter().filter(|row| eval_predicate(pred, row)).collect(),
        None => joined,
    }
}

/// Compare two values under one ordering term, in output order.
///
/// Null placement is resolved before direction is applied: `Default` follows
/// the PostgreSQL rule of nulls sorting as largest, so last under `Asc` and
/// first under `Desc`.
fn compare_values(av: &Value, bv: &Value, term: &OrderTerm) -> Ordering {
    let nulls = match term.nulls() {
        NullPlacement::Default => match term.direction() {
            Direction::Asc => NullPlacement::Last,
            Direction::Desc => NullPlacement::First,
        },
        explicit => explicit,
    };
    match (av.is_null(), bv.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match nulls {
            NullPlacement::First => Ordering::Less,
            _ => Ordering::Greater,
        },
        (false, true) => match nulls {
            NullPlacement::First => Ordering::Greater,
            _ => Ordering::Less,
        },
        (false, false) => {
            let ord = av.total_cmp(bv);
            match term.direction() {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        }
    }
}

fn compare_term(a: &JoinedRow, b: &JoinedRow, term: &OrderTerm) -> Ordering {
    compare_values(&value_of(a, term.field()), &value_of(b, term.field()), term)
}

fn sort_rows(rows: &mut [JoinedRow], order: &[OrderTerm]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for term in order {
            let ord = compare_term(a, b, term);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn select_rows(tables: &Tables, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
    let mut rows = solve(tables, plan.root.table(), &plan.joins, &plan.predicate);
    sort_rows(&mut rows, &plan.order);

    let rows: Vec<JoinedRow> = match plan.page {
        Some(window) => rows
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit.map_or(usize::MAX, |l| l as usize))
            .collect(),
        None => rows,
    };

    let root = plan.root.table();
    rows.into_iter()
        .map(|mut row| {
            row.remove(root)
                .ok_or_else(|| StoreError::Query(format!("missing root slot `{root}`")))
        })
        .collect()
}

fn count_rows(tables: &Tables, plan: &SelectPlan) -> Result<u64, StoreError> {
    // Ordering and pagination never change the count.
    let rows = solve(tables, plan.root.table(), &plan.joins, &plan.predicate);
    Ok(rows.len() as u64)
}

/// Group key wrapper: `Value` has no `Ord`, so grouping borrows the total
/// order from `Value::total_cmp`.
#[derive(Debug, Clone, PartialEq)]
struct GroupKey(Vec<Value>);

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = a.total_cmp(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

fn numeric(value: &Value) -> Option<Decimal> {
    match value {
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn compute_sum(rows: &[JoinedRow], field: &Field) -> Value {
    let sum: Decimal = rows
        .iter()
        .filter_map(|row| numeric(&value_of(row, field)))
        .sum();
    // Integer fields keep their base type, matching COALESCE(SUM(x), 0).
    if field.kind() == FieldKind::Int {
        match sum.to_i64() {
            Some(i) => Value::Int(i),
            None => Value::Decimal(sum),
        }
    } else {
        Value::Decimal(sum)
    }
}

fn compute_avg(rows: &[JoinedRow], field: &Field) -> Value {
    let values: Vec<Decimal> = rows
        .iter()
        .filter_map(|row| numeric(&value_of(row, field)))
        .collect();
    if values.is_empty() {
        return Value::Null;
    }
    let sum: Decimal = values.iter().sum();
    Value::Decimal(sum / Decimal::from(values.len() as i64))
}

fn compute_extreme(rows: &[JoinedRow], field: &Field, want: Ordering) -> Value {
    rows.iter()
        .map(|row| value_of(row, field))
        .filter(|v| !v.is_null())
        .reduce(|best, next| {
            if next.total_cmp(&best) == want {
                next
            } else {
                best
            }
        })
        .unwrap_or(Value::Null)
}

fn compute_selection(selection: &Selection, key: &GroupKey, group_by: &[Field], rows: &[JoinedRow]) -> Value {
    match selection {
        Selection::Field(field) => group_by
            .iter()
            .position(|g| g == field)
            .and_then(|idx| key.0.get(idx).cloned())
            .unwrap_or(Value::Null),
        Selection::Agg(AggExpr::Count) => Value::Int(rows.len() as i64),
        Selection::Agg(AggExpr::Sum(field)) => compute_sum(rows, field),
        Selection::Agg(AggExpr::Avg(field)) => compute_avg(rows, field),
        Selection::Agg(AggExpr::Max(field)) => compute_extreme(rows, field, Ordering::Greater),
        Selection::Agg(AggExpr::Min(field)) => compute_extreme(rows, field, Ordering::Less),
    }
}

fn aggregate_rows(tables: &Tables, plan: &AggregatePlan) -> Result<Vec<AggregateRow>, StoreError> {
    let source = solve(tables, plan.root.table(), &plan.joins, &plan.predicate);

    if plan.group_by.is_empty() {
        // Ungrouped aggregation is one row, even over zero source rows.
        let key = GroupKey(Vec::new());
        let values = plan
            .selections
            .iter()
            .map(|s| compute_selection(s, &key, &plan.group_by, &source))
            .collect();
        return Ok(vec![AggregateRow::new(values)]);
    }

    let mut groups: BTreeMap<GroupKey, Vec<JoinedRow>> = BTreeMap::new();
    for row in source {
        let key = GroupKey(plan.group_by.iter().map(|f| value_of(&row, f)).collect());
        groups.entry(key).or_default().push(row);
    }

    let mut entries: Vec<(GroupKey, Vec<JoinedRow>)> = groups.into_iter().collect();
    if !plan.order.is_empty() {
        // Every order term names a group-by key (the builder enforces it),
        // so each term resolves to a key column.
        entries.sort_by(|(ka, _), (kb, _)| {
            for term in &plan.order {
                let pos = plan.group_by.iter().position(|g| g == term.field());
                let (av, bv) = match pos {
                    Some(idx) => (&ka.0[idx], &kb.0[idx]),
                    None => continue,
                };
                let ord = compare_values(av, bv, term);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    Ok(entries
        .into_iter()
        .map(|(key, rows)| {
            let values = plan
                .selections
                .iter()
                .map(|s| compute_selection(s, &key, &plan.group_by, &rows))
                .collect();
            AggregateRow::new(values)
        })
        .collect())
}
