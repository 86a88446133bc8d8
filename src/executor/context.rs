//! Per-execution evaluation state

use chrono::Utc;

use crate::error::{Error, Result};
use crate::storage::{Tuple, Value};

/// Everything an expression can read while it is evaluated: parameter
/// values, the current row of each table in scope, the aggregate values of
/// the current group, and the statement clock.
///
/// The clock is read once when the context is created, so every
/// time function in one statement sees the same instant.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    params: &'a [Value],
    rows: Vec<Option<&'a Tuple>>,
    aggregates: &'a [Value],
    now_millis: i64,
}

impl<'a> QueryContext<'a> {
    pub fn new(params: &'a [Value]) -> Self {
        Self {
            params,
            rows: Vec::new(),
            aggregates: &[],
            now_millis: Utc::now().timestamp_millis(),
        }
    }

    /// Pin the statement clock
    pub fn with_now(mut self, millis: i64) -> Self {
        self.now_millis = millis;
        self
    }

    /// Reserve a row slot for each of `count` tables
    pub fn with_tables(mut self, count: usize) -> Self {
        self.rows = vec![None; count];
        self
    }

    pub fn now_millis(&self) -> i64 {
        self.now_millis
    }

    pub fn set_row(&mut self, table: usize, row: Option<&'a Tuple>) {
        if table >= self.rows.len() {
            self.rows.resize(table + 1, None);
        }
        self.rows[table] = row;
    }

    pub fn set_aggregates(&mut self, aggregates: &'a [Value]) {
        self.aggregates = aggregates;
    }

    pub fn param(&self, index: usize) -> Result<&'a Value> {
        self.params
            .get(index)
            .ok_or(Error::UnboundParameter(index + 1))
    }

    pub fn column(&self, table: usize, column: usize) -> Result<&'a Value> {
        let row = self
            .rows
            .get(table)
            .copied()
            .flatten()
            .ok_or_else(|| Error::Internal(format!("no current row for table #{}", table)))?;
        row.get(column)
            .ok_or_else(|| Error::Internal(format!("row has no column #{}", column)))
    }

    pub fn aggregate(&self, index: usize) -> Result<&'a Value> {
        self.aggregates
            .get(index)
            .ok_or_else(|| Error::Internal(format!("no aggregate #{} in this context", index)))
    }
}
