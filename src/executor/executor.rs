//! Statement execution
//!
//! Statements are executed directly from their tree. Expressions are bound
//! against the tables they name at the start of each execution, so a cached
//! statement always sees the current schema.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

use super::context::QueryContext;
use super::cursor::ResultSet;
use super::planner::{plan_joins, JoinPlan};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::sql::{
    AggregateFunc, BindScope, CreateTableStatement, DeleteStatement, DropTableStatement, Expr,
    InsertStatement, SelectItem, SelectStatement, Statement, UpdateStatement,
};
use crate::storage::tuple::ArithOp;
use crate::storage::{Table, Tuple, Value};

/// Execute a statement against a database
pub fn execute(db: &Database, statement: &Statement, params: &[Value]) -> Result<ResultSet> {
    match statement {
        Statement::Select(select) => execute_select(db, select, params),
        Statement::Insert(insert) => execute_insert(db, insert, params),
        Statement::Update(update) => execute_update(db, update, params),
        Statement::Delete(delete) => execute_delete(db, delete, params),
        Statement::CreateTable(create) => execute_create_table(db, create),
        Statement::DropTable(drop) => execute_drop_table(db, drop),
        Statement::ShowTables => {
            let rows = db
                .table_names()?
                .into_iter()
                .map(|name| Tuple::new(vec![Value::String(name)]))
                .collect();
            Ok(ResultSet::with_rows(vec!["name".to_string()], rows))
        }
    }
}

fn require_table(db: &Database, name: &str) -> Result<Arc<Table>> {
    db.get_table(name)?
        .ok_or_else(|| Error::TableNotFound(name.to_string()))
}

fn no_aggregates(expr: &Expr, clause: &str) -> Result<()> {
    if expr.contains_aggregate() {
        return Err(Error::ExecutionError(format!(
            "aggregate functions are not allowed in {}",
            clause
        )));
    }
    Ok(())
}

fn matches_all(filters: &[Expr], ctx: &QueryContext<'_>) -> Result<bool> {
    for filter in filters {
        if filter.eval_bool(ctx)? != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn execute_create_table(db: &Database, create: &CreateTableStatement) -> Result<ResultSet> {
    match db.create_table(&create.table_name, create.schema.clone()) {
        Ok(_) => Ok(ResultSet::with_update_count(0)),
        Err(Error::TableAlreadyExists(_)) if create.if_not_exists => {
            Ok(ResultSet::with_update_count(0))
        }
        Err(e) => Err(e),
    }
}

fn execute_drop_table(db: &Database, drop: &DropTableStatement) -> Result<ResultSet> {
    match db.drop_table(&drop.table_name) {
        Ok(()) => Ok(ResultSet::with_update_count(0)),
        Err(Error::TableNotFound(_)) if drop.if_exists => Ok(ResultSet::with_update_count(0)),
        Err(e) => Err(e),
    }
}

fn execute_insert(db: &Database, insert: &InsertStatement, params: &[Value]) -> Result<ResultSet> {
    let table = require_table(db, &insert.table_name)?;
    let schema = table.schema();

    let targets: Vec<usize> = match &insert.columns {
        Some(columns) => {
            let mut targets = Vec::with_capacity(columns.len());
            for name in columns {
                let index = schema.get_column_index(name).ok_or_else(|| {
                    Error::ColumnNotFound(name.clone(), table.name().to_string())
                })?;
                if targets.contains(&index) {
                    return Err(Error::ExecutionError(format!(
                        "column '{}' is listed twice",
                        name
                    )));
                }
                targets.push(index);
            }
            targets
        }
        None => (0..schema.column_count()).collect(),
    };

    // VALUES may use parameters and functions but no columns
    let scope = BindScope::new();
    let ctx = QueryContext::new(params);
    let mut rows = Vec::with_capacity(insert.values.len());
    for exprs in &insert.values {
        if exprs.len() != targets.len() {
            return Err(Error::ExecutionError(format!(
                "{} values supplied for {} columns",
                exprs.len(),
                targets.len()
            )));
        }
        let mut values = vec![None; schema.column_count()];
        for (expr, &target) in exprs.iter().zip(&targets) {
            no_aggregates(expr, "VALUES")?;
            values[target] = Some(expr.bind(&scope)?.eval(&ctx)?);
        }
        rows.push(values);
    }

    let mut writer = table.lock_for_insert(true)?.ok_or_else(|| {
        Error::Internal(format!("no writer for table '{}'", table.name()))
    })?;
    let mut count = 0;
    for values in rows {
        writer.insert(values)?;
        count += 1;
    }
    debug!(table = %table.name(), rows = count, "insert");
    Ok(ResultSet::with_update_count(count))
}

fn execute_update(db: &Database, update: &UpdateStatement, params: &[Value]) -> Result<ResultSet> {
    let table = require_table(db, &update.table_name)?;
    let schema = table.schema();
    let mut scope = BindScope::new();
    scope.push(&update.table_name, schema);

    let mut assignments = Vec::with_capacity(update.assignments.len());
    for assignment in &update.assignments {
        let index = schema.get_column_index(&assignment.column).ok_or_else(|| {
            Error::ColumnNotFound(assignment.column.clone(), table.name().to_string())
        })?;
        no_aggregates(&assignment.value, "UPDATE")?;
        assignments.push((index, assignment.value.bind(&scope)?));
    }
    let filter = match &update.where_clause {
        Some(predicate) => {
            no_aggregates(predicate, "WHERE")?;
            Some(predicate.bind(&scope)?)
        }
        None => None,
    };

    let mut writer = table.write()?;
    let rows = writer.scan()?;

    // Compute every new row from the old values before changing any
    let mut changes = Vec::new();
    {
        let mut ctx = QueryContext::new(params).with_tables(1);
        for (row_id, row) in &rows {
            ctx.set_row(0, Some(row));
            if let Some(filter) = &filter {
                if filter.eval_bool(&ctx)? != Some(true) {
                    continue;
                }
            }
            let mut values = row.values().to_vec();
            for (index, expr) in &assignments {
                values[*index] = expr.eval(&ctx)?;
            }
            changes.push((*row_id, values));
        }
    }

    let count = changes.len() as u64;
    for (row_id, values) in changes {
        writer.update(row_id, values)?;
    }
    debug!(table = %table.name(), rows = count, "update");
    Ok(ResultSet::with_update_count(count))
}

fn execute_delete(db: &Database, delete: &DeleteStatement, params: &[Value]) -> Result<ResultSet> {
    let table = require_table(db, &delete.table_name)?;
    let mut writer = table.write()?;

    let Some(predicate) = &delete.where_clause else {
        let count = writer.truncate()?;
        debug!(table = %table.name(), rows = count, "delete all");
        return Ok(ResultSet::with_update_count(count));
    };

    no_aggregates(predicate, "WHERE")?;
    let mut scope = BindScope::new();
    scope.push(&delete.table_name, table.schema());
    let filter = predicate.bind(&scope)?;

    let rows = writer.scan()?;
    let mut doomed = Vec::new();
    {
        let mut ctx = QueryContext::new(params).with_tables(1);
        for (row_id, row) in &rows {
            ctx.set_row(0, Some(row));
            if filter.eval_bool(&ctx)? == Some(true) {
                doomed.push(*row_id);
            }
        }
    }

    let mut count = 0;
    for row_id in doomed {
        if writer.delete(row_id)? {
            count += 1;
        }
    }
    debug!(table = %table.name(), rows = count, "delete");
    Ok(ResultSet::with_update_count(count))
}

/// Where an ORDER BY key comes from
enum SortKey {
    /// A result column
    Output(usize),
    /// An expression evaluated with the row or group
    Expr(Expr),
}

/// Snapshot the rows of every table, taking the read locks in ascending
/// name order and holding them until all scans are done.
fn read_tables(tables: &[Arc<Table>]) -> Result<Vec<Vec<Tuple>>> {
    let mut order: Vec<usize> = (0..tables.len()).collect();
    order.sort_by_key(|&i| tables[i].name().to_lowercase());
    order.dedup_by_key(|i| tables[*i].name().to_lowercase());

    let mut readers = Vec::with_capacity(order.len());
    for &i in &order {
        readers.push((i, tables[i].read()?));
    }

    let mut rows = vec![Vec::new(); tables.len()];
    for (i, reader) in &readers {
        let scanned: Vec<Tuple> = reader.scan()?.into_iter().map(|(_, row)| row).collect();
        for (j, table) in tables.iter().enumerate() {
            if j != *i && Arc::ptr_eq(table, &tables[*i]) {
                rows[j] = scanned.clone();
            }
        }
        rows[*i] = scanned;
    }
    Ok(rows)
}

/// Visit every row combination that passes the plan's filters
fn join_rows<'a>(
    plan: &JoinPlan,
    rows: &'a [Vec<Tuple>],
    level: usize,
    ctx: &mut QueryContext<'a>,
    current: &mut Vec<usize>,
    emit: &mut dyn FnMut(&QueryContext<'a>, &[usize]) -> Result<()>,
) -> Result<()> {
    let Some(&table) = plan.order.get(level) else {
        return emit(ctx, current);
    };
    for (index, row) in rows[table].iter().enumerate() {
        ctx.set_row(table, Some(row));
        current[table] = index;
        if matches_all(&plan.filters[level], ctx)? {
            join_rows(plan, rows, level + 1, ctx, current, emit)?;
        }
    }
    ctx.set_row(table, None);
    Ok(())
}

fn execute_select(db: &Database, select: &SelectStatement, params: &[Value]) -> Result<ResultSet> {
    let tables = select
        .from
        .iter()
        .map(|table_ref| require_table(db, &table_ref.name))
        .collect::<Result<Vec<_>>>()?;

    let mut scope = BindScope::new();
    let mut references: Vec<String> = Vec::new();
    for (table_ref, table) in select.from.iter().zip(&tables) {
        let reference = table_ref.reference_name();
        if references.iter().any(|r| r.eq_ignore_ascii_case(reference)) {
            return Err(Error::ExecutionError(format!(
                "table '{}' appears twice in FROM; give it an alias",
                reference
            )));
        }
        references.push(reference.to_string());
        scope.push(reference, table.schema());
    }

    // Result columns
    let mut names = Vec::new();
    let mut projection = Vec::new();
    for item in &select.columns {
        match item {
            SelectItem::Wildcard => {
                if tables.is_empty() {
                    return Err(Error::ExecutionError(
                        "SELECT * needs a FROM clause".to_string(),
                    ));
                }
                for index in 0..tables.len() {
                    push_all_columns(index, &tables[index], &mut names, &mut projection);
                }
            }
            SelectItem::QualifiedWildcard(reference) => {
                let index = references
                    .iter()
                    .position(|r| r.eq_ignore_ascii_case(reference))
                    .ok_or_else(|| Error::TableNotFound(reference.clone()))?;
                push_all_columns(index, &tables[index], &mut names, &mut projection);
            }
            SelectItem::Expr { expr, alias } => {
                names.push(alias.clone().unwrap_or_else(|| expr.to_string()));
                projection.push(expr.bind(&scope)?);
            }
        }
    }

    let conjuncts = match &select.where_clause {
        Some(predicate) => {
            no_aggregates(predicate, "WHERE")?;
            predicate.bind(&scope)?.into_conjuncts()
        }
        None => Vec::new(),
    };

    let mut sort_keys = Vec::with_capacity(select.order_by.len());
    for item in &select.order_by {
        sort_keys.push(resolve_sort_key(&item.expr, &names, &scope)?);
    }

    let mut group_by = Vec::with_capacity(select.group_by.len());
    for expr in &select.group_by {
        no_aggregates(expr, "GROUP BY")?;
        group_by.push(expr.bind(&scope)?);
    }
    let having = select.having.as_ref().map(|h| h.bind(&scope)).transpose()?;

    let aggregating = !group_by.is_empty()
        || having.is_some()
        || projection.iter().any(Expr::contains_aggregate)
        || sort_keys
            .iter()
            .any(|k| matches!(k, SortKey::Expr(e) if e.contains_aggregate()));

    let snapshot = read_tables(&tables)?;
    let row_counts: Vec<u64> = snapshot.iter().map(|rows| rows.len() as u64).collect();
    let plan = plan_joins(&row_counts, conjuncts);
    debug!(tables = tables.len(), order = ?plan.order, cost = plan.cost, "select plan");

    let ctx = QueryContext::new(params).with_tables(tables.len());
    let mut output = if aggregating {
        select_groups(
            &plan, &snapshot, &tables, ctx, &projection, &group_by, having, &sort_keys,
        )?
    } else {
        select_rows(&plan, &snapshot, ctx, &projection, &sort_keys)?
    };

    if select.distinct {
        let mut seen = HashSet::new();
        output.retain(|(values, _)| seen.insert(values.clone()));
    }

    if !select.order_by.is_empty() {
        output.sort_by(|(_, a), (_, b)| {
            for ((x, y), item) in a.iter().zip(b).zip(&select.order_by) {
                let ordering = x.compare(y).unwrap_or(Ordering::Equal);
                let ordering = if item.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let offset = match &select.offset {
        Some(expr) => row_limit(expr, params, "OFFSET")?,
        None => 0,
    };
    let limit = match &select.limit {
        Some(expr) => row_limit(expr, params, "LIMIT")?,
        None => usize::MAX,
    };
    let rows = output
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(values, _)| Tuple::new(values))
        .collect();
    Ok(ResultSet::with_rows(names, rows))
}

fn push_all_columns(index: usize, table: &Table, names: &mut Vec<String>, projection: &mut Vec<Expr>) {
    for (position, column) in table.schema().columns().iter().enumerate() {
        names.push(column.name.clone());
        projection.push(Expr::BoundColumn {
            table: index,
            column: position,
            name: column.name.clone(),
            data_type: column.data_type.clone(),
        });
    }
}

/// ORDER BY accepts a result column name or alias, a 1-based result
/// position, or any expression over the tables.
fn resolve_sort_key(expr: &Expr, names: &[String], scope: &BindScope<'_>) -> Result<SortKey> {
    match expr {
        Expr::Literal(value @ (Value::Integer(_) | Value::BigInt(_))) => {
            let position = value.as_i64().unwrap_or(0);
            if position < 1 || position as usize > names.len() {
                return Err(Error::ExecutionError(format!(
                    "ORDER BY position {} is not in the select list",
                    position
                )));
            }
            Ok(SortKey::Output(position as usize - 1))
        }
        Expr::Column { table: None, name } => {
            match names.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                Some(index) => Ok(SortKey::Output(index)),
                None => Ok(SortKey::Expr(expr.bind(scope)?)),
            }
        }
        _ => Ok(SortKey::Expr(expr.bind(scope)?)),
    }
}

fn sort_values(keys: &[SortKey], values: &[Value], ctx: &QueryContext<'_>) -> Result<Vec<Value>> {
    keys.iter()
        .map(|key| match key {
            SortKey::Output(index) => Ok(values[*index].clone()),
            SortKey::Expr(expr) => expr.eval(ctx),
        })
        .collect()
}

/// Evaluate LIMIT or OFFSET; they may use literals and parameters only
fn row_limit(expr: &Expr, params: &[Value], clause: &str) -> Result<usize> {
    let bound = expr.bind(&BindScope::new())?;
    let n = bound.eval_long(&QueryContext::new(params))?;
    usize::try_from(n)
        .map_err(|_| Error::ExecutionError(format!("{} must not be negative, got {}", clause, n)))
}

type OutputRow = (Vec<Value>, Vec<Value>);

fn select_rows<'a>(
    plan: &JoinPlan,
    snapshot: &'a [Vec<Tuple>],
    mut ctx: QueryContext<'a>,
    projection: &[Expr],
    sort_keys: &[SortKey],
) -> Result<Vec<OutputRow>> {
    let mut output = Vec::new();
    if !matches_all(&plan.constant, &ctx)? {
        return Ok(output);
    }

    let mut current = vec![0; snapshot.len()];
    join_rows(plan, snapshot, 0, &mut ctx, &mut current, &mut |ctx, _| {
        let values = projection
            .iter()
            .map(|expr| expr.eval(ctx))
            .collect::<Result<Vec<_>>>()?;
        let keys = sort_values(sort_keys, &values, ctx)?;
        output.push((values, keys));
        Ok(())
    })?;
    Ok(output)
}

struct Group {
    /// Row index per table of the group's first row
    first: Vec<usize>,
    accumulators: Vec<Accumulator>,
}

#[allow(clippy::too_many_arguments)]
fn select_groups<'a>(
    plan: &JoinPlan,
    snapshot: &'a [Vec<Tuple>],
    tables: &[Arc<Table>],
    mut ctx: QueryContext<'a>,
    projection: &[Expr],
    group_by: &[Expr],
    having: Option<Expr>,
    sort_keys: &[SortKey],
) -> Result<Vec<OutputRow>> {
    // Aggregate calls become references into each group's results
    let mut aggregates = Vec::new();
    let projection = projection
        .iter()
        .map(|expr| expr.extract_aggregates(&mut aggregates))
        .collect::<Result<Vec<_>>>()?;
    let having = having
        .map(|expr| expr.extract_aggregates(&mut aggregates))
        .transpose()?;
    let sort_keys = sort_keys
        .iter()
        .map(|key| match key {
            SortKey::Output(index) => Ok(SortKey::Output(*index)),
            SortKey::Expr(expr) => expr.extract_aggregates(&mut aggregates).map(SortKey::Expr),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut groups: IndexMap<Vec<Value>, Group> = IndexMap::new();
    if matches_all(&plan.constant, &ctx)? {
        let mut current = vec![0; snapshot.len()];
        join_rows(plan, snapshot, 0, &mut ctx, &mut current, &mut |ctx, current| {
            let key = group_by
                .iter()
                .map(|expr| expr.eval(ctx))
                .collect::<Result<Vec<_>>>()?;
            let group = match groups.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(Group {
                    first: current.to_vec(),
                    accumulators: aggregates
                        .iter()
                        .map(Accumulator::new)
                        .collect::<Result<Vec<_>>>()?,
                }),
            };
            for accumulator in &mut group.accumulators {
                accumulator.add(ctx)?;
            }
            Ok(())
        })?;
    }

    // Without GROUP BY there is exactly one group, even over no rows
    let empty = groups.is_empty() && group_by.is_empty();
    if empty {
        groups.insert(
            Vec::new(),
            Group {
                first: Vec::new(),
                accumulators: aggregates
                    .iter()
                    .map(Accumulator::new)
                    .collect::<Result<Vec<_>>>()?,
            },
        );
    }
    let null_rows: Vec<Tuple> = tables
        .iter()
        .map(|table| Tuple::new(vec![Value::Null; table.schema().column_count()]))
        .collect();

    let base = ctx;
    let mut output = Vec::with_capacity(groups.len());
    for (_, group) in groups {
        let results = group
            .accumulators
            .into_iter()
            .map(Accumulator::finish)
            .collect::<Result<Vec<_>>>()?;

        let mut ctx = base.clone();
        for (table, nulls) in null_rows.iter().enumerate() {
            let row = match group.first.get(table) {
                Some(&index) => &snapshot[table][index],
                None => nulls,
            };
            ctx.set_row(table, Some(row));
        }
        ctx.set_aggregates(&results);

        if let Some(having) = &having {
            if having.eval_bool(&ctx)? != Some(true) {
                continue;
            }
        }
        let values = projection
            .iter()
            .map(|expr| expr.eval(&ctx))
            .collect::<Result<Vec<_>>>()?;
        let keys = sort_values(&sort_keys, &values, &ctx)?;
        output.push((values, keys));
    }
    Ok(output)
}

/// Running state of one aggregate call within one group
struct Accumulator {
    func: AggregateFunc,
    arg: Option<Expr>,
    /// Values already counted, for DISTINCT
    seen: Option<HashSet<Value>>,
    count: i64,
    sum: Value,
    best: Value,
}

impl Accumulator {
    fn new(expr: &Expr) -> Result<Self> {
        let Expr::Aggregate {
            func,
            arg,
            distinct,
        } = expr
        else {
            return Err(Error::Internal(format!("{} is not an aggregate", expr)));
        };
        Ok(Self {
            func: *func,
            arg: arg.as_deref().cloned(),
            seen: distinct.then(HashSet::new),
            count: 0,
            sum: Value::Null,
            best: Value::Null,
        })
    }

    fn add(&mut self, ctx: &QueryContext<'_>) -> Result<()> {
        let Some(arg) = &self.arg else {
            // COUNT(*)
            self.count += 1;
            return Ok(());
        };
        let value = arg.eval(ctx)?;
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            if !seen.insert(value.clone()) {
                return Ok(());
            }
        }

        self.count += 1;
        match self.func {
            AggregateFunc::Count => {}
            AggregateFunc::Sum | AggregateFunc::Avg => {
                self.sum = if self.sum.is_null() {
                    value
                } else {
                    self.sum.arith(ArithOp::Add, &value)?
                };
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                let replace = match self.best.compare(&value) {
                    _ if self.best.is_null() => true,
                    Some(Ordering::Greater) => self.func == AggregateFunc::Min,
                    Some(Ordering::Less) => self.func == AggregateFunc::Max,
                    Some(Ordering::Equal) => false,
                    None => {
                        return Err(Error::TypeMismatch {
                            from: value.type_name().to_string(),
                            to: self.best.type_name().to_string(),
                        })
                    }
                };
                if replace {
                    self.best = value;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Value> {
        Ok(match self.func {
            AggregateFunc::Count => Value::from_i64(self.count),
            AggregateFunc::Sum => self.sum,
            AggregateFunc::Avg if self.count == 0 => Value::Null,
            AggregateFunc::Avg => {
                let sum = self.sum.as_f64().ok_or_else(|| Error::TypeMismatch {
                    from: self.sum.type_name().to_string(),
                    to: "DOUBLE".to_string(),
                })?;
                Value::Float(sum / self.count as f64)
            }
            AggregateFunc::Min | AggregateFunc::Max => self.best,
        })
    }
}
