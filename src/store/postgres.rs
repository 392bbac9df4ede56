//! PostgreSQL store over `may_postgres`.
//!
//! Plans are rendered to SQL with `sea-query`'s `PostgresQueryBuilder` and
//! executed through a coroutine-blocking `may_postgres::Client`. Parameter
//! binding goes through a two-pass conversion: sea-query values are first
//! collected into owned typed params, then borrowed as `&dyn ToSql` for the
//! driver. Rows decode back into [`Record`]s using the plan's field metadata.
//!
//! `begin_read` opens a `BEGIN READ ONLY` transaction whose guard rolls back
//! on drop, so the paired page and count reads of `fetch_page` observe one
//! snapshot.

use crate::config::StoreConfig;
use crate::metadata::{Field, FieldKind};
use crate::query::aggregate::{AggExpr, AggregatePlan, AggregateRow, Selection};
use crate::query::order::{Direction, NullPlacement, OrderTerm};
use crate::query::predicate::Predicate;
use crate::query::select::{Join, SelectPlan};
use crate::store::{ReadScope, Store, StoreError};
use crate::value::{Record, Value};
use chrono::{DateTime, Utc};
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_query::{
    Alias, Asterisk, Condition, Expr, ExprTrait, Func, JoinType, NullOrdering, Order,
    PostgresQueryBuilder, SelectStatement,
};
use uuid::Uuid;

#[cfg(feature = "tracing")]
use crate::trace;

/// A [`Store`] backed by PostgreSQL.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connect using the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Postgres` when the connection cannot be
    /// established.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = may_postgres::connect(&config.url)?;
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Store for PostgresStore {
    fn persist(&self, table: &str, record: Record) -> Result<(), StoreError> {
        let mut stmt = sea_query::Query::insert();
        stmt.into_table(Alias::new(table));
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (name, value) in record.iter() {
            columns.push(Alias::new(name));
            values.push(sea_value(value));
        }
        stmt.columns(columns);
        stmt.values(values)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let (sql, params) = stmt.build(PostgresQueryBuilder);
        execute(&self.client, &sql, &params)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        // Inserts are not buffered on this store; persist writes through.
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
        select_via(&self.client, plan)
    }

    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError> {
        count_via(&self.client, plan)
    }

    fn aggregate(&self, plan: &AggregatePlan) -> Result<Vec<AggregateRow>, StoreError> {
        let (sql, params) = render_aggregate(plan).build(PostgresQueryBuilder);
        log::debug!("aggregate SQL: {sql}");
        #[cfg(feature = "tracing")]
        let _span = trace::aggregate_span(plan.root.table()).entered();
        let rows = query_all(&self.client, &sql, &params)?;
        rows.iter().map(|row| decode_aggregate(row, plan)).collect()
    }

    fn begin_read(&self) -> Result<Box<dyn ReadScope + '_>, StoreError> {
        self.client.execute("BEGIN READ ONLY", &[])?;
        Ok(Box::new(PgReadScope {
            client: &self.client,
        }))
    }
}

/// Read-only transaction guard; rolls back when dropped so the transaction
/// releases on every exit path.
struct PgReadScope<'a> {
    client: &'a Client,
}

impl ReadScope for PgReadScope<'_> {
    fn select(&self, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
        select_via(self.client, plan)
    }

    fn count(&self, plan: &SelectPlan) -> Result<u64, StoreError> {
        count_via(self.client, plan)
    }
}

impl Drop for PgReadScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.client.execute("ROLLBACK", &[]) {
            log::warn!("failed to release read transaction: {e}");
        }
    }
}

fn select_via(client: &Client, plan: &SelectPlan) -> Result<Vec<Record>, StoreError> {
    let (sql, params) = render_select(plan).build(PostgresQueryBuilder);
    log::debug!("select SQL: {sql}");
    #[cfg(feature = "tracing")]
    let _span = trace::select_span(plan.root.table()).entered();
    let rows = query_all(client, &sql, &params)?;
    rows.iter().map(|row| decode_record(row, plan)).collect()
}

fn count_via(client: &Client, plan: &SelectPlan) -> Result<u64, StoreError> {
    // The inner query keeps the predicate and joins; ordering and pagination
    // are already stripped by the caller. Subqueries DO apply LIMIT/OFFSET,
    // so a windowed plan must never reach this point.
    let (inner_sql, params) = render_select(plan).build(PostgresQueryBuilder);
    let sql = format!("SELECT COUNT(*) FROM ({inner_sql}) AS count_subquery");
    log::debug!("count SQL: {sql}");
    #[cfg(feature = "tracing")]
    let _span = trace::count_span(plan.root.table()).entered();
    let rows = query_all(client, &sql, &params)?;
    let row = rows
        .first()
        .ok_or_else(|| StoreError::Query("count query returned no rows".to_string()))?;
    let count: i64 = row
        .try_get(0)
        .map_err(|e| StoreError::Decode(format!("count column: {e}")))?;
    Ok(count.max(0) as u64)
}

fn col(field: &Field) -> (Alias, Alias) {
    (Alias::new(field.source()), Alias::new(field.name()))
}

fn render_select(plan: &SelectPlan) -> SelectStatement {
    let mut stmt = sea_query::Query::select();
    // Explicit root columns in definition order, so rows decode by index.
    for field in plan.root.fields() {
        stmt.column((Alias::new(plan.root.table()), Alias::new(field.name())));
    }
    stmt.from(Alias::new(plan.root.table()));
    apply_joins(&mut stmt, &plan.joins);
    if let Some(pred) = &plan.predicate {
        stmt.cond_where(render_predicate(pred));
    }
    apply_order(&mut stmt, &plan.order);
    if let Some(window) = plan.page {
        stmt.offset(window.offset);
        if let Some(limit) = window.limit {
            stmt.limit(limit);
        }
    }
    stmt
}

fn render_aggregate(plan: &AggregatePlan) -> SelectStatement {
    let mut stmt = sea_query::Query::select();
    for selection in &plan.selections {
        match selection {
            Selection::Field(field) => {
                stmt.column(col(field));
            }
            Selection::Agg(AggExpr::Count) => {
                stmt.expr(Expr::col(Asterisk).count());
            }
            Selection::Agg(AggExpr::Sum(field)) => {
                // Ungrouped SUM over zero rows is NULL in SQL; the contract
                // wants a numeric zero.
                stmt.expr(Func::coalesce([
                    Expr::col(col(field)).sum(),
                    Expr::val(0i64).into(),
                ]));
            }
            Selection::Agg(AggExpr::Avg(field)) => {
                stmt.expr(Expr::col(col(field)).avg());
            }
            Selection::Agg(AggExpr::Max(field)) => {
                stmt.expr(Expr::col(col(field)).max());
            }
            Selection::Agg(AggExpr::Min(field)) => {
                stmt.expr(Expr::col(col(field)).min());
            }
        }
    }
    stmt.from(Alias::new(plan.root.table()));
    apply_joins(&mut stmt, &plan.joins);
    if let Some(pred) = &plan.predicate {
        stmt.cond_where(render_predicate(pred));
    }
    for field in &plan.group_by {
        stmt.group_by_col(col(field));
    }
    if plan.order.is_empty() {
        // Deterministic group order; callers can layer their own on top.
        for field in &plan.group_by {
            stmt.order_by(col(field), Order::Asc);
        }
    } else {
        apply_order(&mut stmt, &plan.order);
    }
    stmt
}

fn apply_joins(stmt: &mut SelectStatement, joins: &[Join]) {
    for join in joins {
        stmt.join_as(
            JoinType::InnerJoin,
            Alias::new(join.target.table()),
            Alias::new(join.alias.as_str()),
            Expr::col(col(&join.on_local)).equals(col(&join.on_foreign)),
        );
    }
}

fn apply_order(stmt: &mut SelectStatement, order: &[OrderTerm]) {
    for term in order {
        let direction = match term.direction() {
            Direction::Asc => Order::Asc,
            Direction::Desc => Order::Desc,
        };
        match term.nulls() {
            NullPlacement::First => {
                stmt.order_by_with_nulls(col(term.field()), direction, NullOrdering::First);
            }
            NullPlacement::Last => {
                stmt.order_by_with_nulls(col(term.field()), direction, NullOrdering::Last);
            }
            NullPlacement::Default => {
                stmt.order_by(col(term.field()), direction);
            }
        }
    }
}

fn render_predicate(pred: &Predicate) -> Condition {
    match pred {
        Predicate::Eq(field, value) => {
            if value.is_null() {
                Condition::all().add(Expr::col(col(field)).is_null())
            } else {
                Condition::all().add(Expr::col(col(field)).eq(sea_value(value)))
            }
        }
        Predicate::And(a, b) => Condition::all().add(render_predicate(a)).add(render_predicate(b)),
    }
}

fn sea_value(value: &Value) -> sea_query::Value {
    match value {
        Value::Null => sea_query::Value::BigInt(None),
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Decimal(d) => (*d).into(),
        Value::Text(s) => s.clone().into(),
        Value::Uuid(u) => (*u).into(),
        Value::Timestamp(ts) => (*ts).into(),
        Value::Json(j) => j.clone().into(),
    }
}

/// Owned parameter, the first pass of the value conversion. The second pass
/// borrows these as `&dyn ToSql` once all values are collected.
enum Param {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Decimal(Decimal),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Null(Option<i64>),
}

impl Param {
    fn as_to_sql(&self) -> &dyn ToSql {
        match self {
            Param::Bool(v) => v,
            Param::Int(v) => v,
            Param::Float(v) => v,
            Param::Text(v) => v,
            Param::Uuid(v) => v,
            Param::Decimal(v) => v,
            Param::Timestamp(v) => v,
            Param::Json(v) => v,
            Param::Null(v) => v,
        }
    }
}

fn collect_params(values: &sea_query::Values) -> Result<Vec<Param>, StoreError> {
    use sea_query::Value as Sq;
    let mut params = Vec::new();
    for value in values.iter() {
        let param = match value {
            Sq::Bool(Some(b)) => Param::Bool(*b),
            Sq::TinyInt(Some(i)) => Param::Int(i64::from(*i)),
            Sq::SmallInt(Some(i)) => Param::Int(i64::from(*i)),
            Sq::Int(Some(i)) => Param::Int(i64::from(*i)),
            Sq::BigInt(Some(i)) => Param::Int(*i),
            // sea-query binds LIMIT/OFFSET as unsigned values.
            Sq::TinyUnsigned(Some(u)) => Param::Int(i64::from(*u)),
            Sq::SmallUnsigned(Some(u)) => Param::Int(i64::from(*u)),
            Sq::Unsigned(Some(u)) => Param::Int(i64::from(*u)),
            Sq::BigUnsigned(Some(u)) => {
                if *u > i64::MAX as u64 {
                    return Err(StoreError::Query(format!(
                        "BigUnsigned value {u} exceeds i64::MAX, cannot be safely cast to i64"
                    )));
                }
                Param::Int(*u as i64)
            }
            Sq::Float(Some(f)) => Param::Float(f64::from(*f)),
            Sq::Double(Some(d)) => Param::Float(*d),
            Sq::String(Some(s)) => Param::Text(s.clone()),
            Sq::Uuid(Some(u)) => Param::Uuid(*u),
            Sq::Decimal(Some(d)) => Param::Decimal(*d),
            Sq::ChronoDateTimeUtc(Some(ts)) => Param::Timestamp(*ts),
            Sq::Json(Some(j)) => Param::Json(j.clone()),
            Sq::Bool(None)
            | Sq::TinyInt(None)
            | Sq::SmallInt(None)
            | Sq::Int(None)
            | Sq::BigInt(None)
            | Sq::TinyUnsigned(None)
            | Sq::SmallUnsigned(None)
            | Sq::Unsigned(None)
            | Sq::BigUnsigned(None)
            | Sq::Float(None)
            | Sq::Double(None)
            | Sq::String(None)
            | Sq::Uuid(None)
            | Sq::Decimal(None)
            | Sq::ChronoDateTimeUtc(None)
            | Sq::Json(None) => Param::Null(None),
            other => {
                return Err(StoreError::Query(format!(
                    "unsupported bind parameter: {other:?}"
                )))
            }
        };
        params.push(param);
    }
    Ok(params)
}

fn execute(client: &Client, sql: &str, values: &sea_query::Values) -> Result<u64, StoreError> {
    let params = collect_params(values)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(Param::as_to_sql).collect();
    Ok(client.execute(sql, &refs)?)
}

fn query_all(client: &Client, sql: &str, values: &sea_query::Values) -> Result<Vec<Row>, StoreError> {
    let params = collect_params(values)?;
    let refs: Vec<&dyn ToSql> = params.iter().map(Param::as_to_sql).collect();
    Ok(client.query(sql, &refs)?)
}

fn decode_value(row: &Row, index: usize, kind: FieldKind) -> Result<Value, StoreError> {
    let value = match kind {
        FieldKind::Int => row
            .try_get::<_, Option<i64>>(index)
            .map(|v| v.map(Value::Int)),
        FieldKind::Decimal => row
            .try_get::<_, Option<Decimal>>(index)
            .map(|v| v.map(Value::Decimal)),
        FieldKind::Text => row
            .try_get::<_, Option<String>>(index)
            .map(|v| v.map(Value::Text)),
        FieldKind::Bool => row
            .try_get::<_, Option<bool>>(index)
            .map(|v| v.map(Value::Bool)),
        FieldKind::Uuid => row
            .try_get::<_, Option<Uuid>>(index)
            .map(|v| v.map(Value::Uuid)),
        FieldKind::Timestamp => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| v.map(Value::Timestamp)),
        FieldKind::Json => row
            .try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| v.map(Value::Json)),
    };
    value
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(|e| StoreError::Decode(format!("column {index}: {e}")))
}

fn decode_record(row: &Row, plan: &SelectPlan) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for (index, field) in plan.root.fields().iter().enumerate() {
        let value = decode_value(row, index, field.kind())?;
        record.set(field.name(), value);
    }
    Ok(record)
}

fn decode_aggregate(row: &Row, plan: &AggregatePlan) -> Result<AggregateRow, StoreError> {
    let mut values = Vec::with_capacity(plan.selections.len());
    for (index, selection) in plan.selections.iter().enumerate() {
        let value = match selection {
            Selection::Field(field) => decode_value(row, index, field.kind())?,
            Selection::Agg(AggExpr::Count) => decode_value(row, index, FieldKind::Int)?,
            // SUM(bigint) and AVG come back as NUMERIC.
            Selection::Agg(AggExpr::Sum(field)) => {
                let decimal = decode_value(row, index, FieldKind::Decimal)?;
                match (field.kind(), decimal) {
                    (FieldKind::Int, Value::Decimal(d)) => match d.to_i64() {
                        Some(i) => Value::Int(i),
                        None => Value::Decimal(d),
                    },
                    (_, v) => v,
                }
            }
            Selection::Agg(AggExpr::Avg(_)) => decode_value(row, index, FieldKind::Decimal)?,
            Selection::Agg(AggExpr::Max(field)) | Selection::Agg(AggExpr::Min(field)) => {
                decode_value(row, index, field.kind())?
            }
        };
        values.push(value);
    }
    Ok(AggregateRow::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::aggregate::Aggregate;
    use crate::query::select::Select;
    use crate::tests_cfg::{member_def, team_def};

    fn sql_of(stmt: &SelectStatement) -> String {
        stmt.to_string(PostgresQueryBuilder)
    }

    #[test]
    fn renders_filter_order_and_window() {
        let m = member_def();
        let query = Select::from(&m)
            .filter(m.field("age").unwrap().eq(100))
            .order_by(m.field("age").unwrap().desc())
            .order_by(m.field("username").unwrap().asc().nulls_last())
            .offset(1)
            .limit(2)
            .build()
            .unwrap();
        let sql = sql_of(&render_select(query.plan()));
        assert!(sql.contains(r#"FROM "member""#));
        assert!(sql.contains(r#""member"."age" = 100"#));
        assert!(sql.contains(r#"ORDER BY "member"."age" DESC, "member"."username" ASC NULLS LAST"#));
        assert!(sql.contains("LIMIT 2"));
        assert!(sql.contains("OFFSET 1"));
    }

    #[test]
    fn window_binds_convert_to_int_params() {
        let m = member_def();
        let query = Select::from(&m)
            .filter(m.field("age").unwrap().eq(100))
            .offset(1)
            .limit(2)
            .build()
            .unwrap();
        // sea-query binds the window as unsigned values after the predicate.
        let (sql, values) = render_select(query.plan()).build(PostgresQueryBuilder);
        assert!(sql.contains("LIMIT $2"));
        assert!(sql.contains("OFFSET $3"));
        let params = collect_params(&values).unwrap();
        assert_eq!(params.len(), 3);
        assert!(matches!(params[0], Param::Int(100)));
        assert!(matches!(params[1], Param::Int(2)));
        assert!(matches!(params[2], Param::Int(1)));
    }

    #[test]
    fn oversized_unsigned_bind_is_rejected() {
        let values = sea_query::Values(vec![sea_query::Value::BigUnsigned(Some(u64::MAX))]);
        assert!(matches!(
            collect_params(&values),
            Err(StoreError::Query(_))
        ));
    }

    #[test]
    fn offset_only_window_renders_without_limit() {
        let m = member_def();
        let query = Select::from(&m).offset(1).build().unwrap();
        let (sql, values) = render_select(query.plan()).build(PostgresQueryBuilder);
        assert!(!sql.contains("LIMIT"));
        assert!(sql.contains("OFFSET $1"));
        let params = collect_params(&values).unwrap();
        assert_eq!(params.len(), 1);
        assert!(matches!(params[0], Param::Int(1)));
    }

    #[test]
    fn renders_null_predicate_as_is_null() {
        let m = member_def();
        let query = Select::from(&m)
            .filter(m.field("username").unwrap().eq(Value::Null))
            .build()
            .unwrap();
        let sql = sql_of(&render_select(query.plan()));
        assert!(sql.contains(r#""member"."username" IS NULL"#));
    }

    #[test]
    fn renders_aliased_join() {
        let m = member_def();
        let t = team_def();
        let query = Select::from(&m)
            .join(&t, "team", m.field("team_id").unwrap(), t.field("id").unwrap())
            .filter(t.field("name").unwrap().eq("teamA"))
            .build()
            .unwrap();
        let sql = sql_of(&render_select(query.plan()));
        assert!(sql.contains(r#"INNER JOIN "team" AS "team" ON "member"."team_id" = "team"."id""#));
        assert!(sql.contains(r#""team"."name" = 'teamA'"#));
    }

    #[test]
    fn count_wraps_the_unwindowed_plan() {
        let m = member_def();
        let query = Select::from(&m)
            .filter(m.field("age").unwrap().eq(10))
            .offset(1)
            .limit(2)
            .build()
            .unwrap();
        let count_plan = query.plan().for_count();
        let sql = sql_of(&render_select(&count_plan));
        assert!(!sql.contains("LIMIT"));
        assert!(!sql.contains("OFFSET"));
        assert!(sql.contains(r#""member"."age" = 10"#));
    }

    #[test]
    fn renders_grouped_aggregates() {
        let m = member_def();
        let t = team_def();
        let agg = Aggregate::over(&m)
            .join(&t, "team", m.field("team_id").unwrap(), t.field("id").unwrap())
            .select(t.field("name").unwrap())
            .select(AggExpr::Avg(m.field("age").unwrap()))
            .group_by(t.field("name").unwrap())
            .build()
            .unwrap();
        let sql = sql_of(&render_aggregate(agg.plan()));
        assert!(sql.contains(r#"AVG("member"."age")"#));
        assert!(sql.contains(r#"GROUP BY "team"."name""#));
        assert!(sql.contains(r#"ORDER BY "team"."name" ASC"#));
    }

    #[test]
    fn explicit_group_ordering_replaces_the_default() {
        let m = member_def();
        let t = team_def();
        let agg = Aggregate::over(&m)
            .join(&t, "team", m.field("team_id").unwrap(), t.field("id").unwrap())
            .select(t.field("name").unwrap())
            .select(AggExpr::Count)
            .group_by(t.field("name").unwrap())
            .order_by(t.field("name").unwrap().desc())
            .build()
            .unwrap();
        let sql = sql_of(&render_aggregate(agg.plan()));
        assert!(sql.contains(r#"ORDER BY "team"."name" DESC"#));
        assert!(!sql.contains(r#"ORDER BY "team"."name" ASC"#));
    }

    #[test]
    fn renders_sum_with_zero_fallback() {
        let m = member_def();
        let agg = Aggregate::over(&m)
            .select(AggExpr::Count)
            .select(AggExpr::Sum(m.field("age").unwrap()))
            .build()
            .unwrap();
        let sql = sql_of(&render_aggregate(agg.plan()));
        assert!(sql.contains("COUNT(*)"));
        assert!(sql.contains(r#"COALESCE(SUM("member"."age"), 0)"#));
    }

    #[test]
    fn binds_every_scalar_kind() {
        let values = sea_query::Values(vec![
            sea_value(&Value::Int(7)),
            sea_value(&Value::Text("member1".to_string())),
            sea_value(&Value::Bool(true)),
            sea_value(&Value::Decimal(Decimal::new(105, 1))),
        ]);
        let params = collect_params(&values).unwrap();
        assert_eq!(params.len(), 4);
        assert!(matches!(params[0], Param::Int(7)));
        assert!(matches!(params[2], Param::Bool(true)));
    }
}
