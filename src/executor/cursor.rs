//! Statement results

use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{Tuple, Value};

/// Result of executing a statement
///
/// Row-producing statements fill `rows`; the others report how many rows
/// they changed through `update_count`. Rows are read with a forward-only
/// cursor: call `next()` before reading the first row.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Tuple>,
    #[serde(skip)]
    position: Option<usize>,
    update_count: u64,
}

impl ResultSet {
    /// A result with rows
    pub fn with_rows(columns: Vec<String>, rows: Vec<Tuple>) -> Self {
        Self {
            columns,
            rows,
            position: None,
            update_count: 0,
        }
    }

    /// A result of a statement that changed `count` rows
    pub fn with_update_count(count: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            position: None,
            update_count: count,
        }
    }

    /// Advance to the next row. Returns false once the rows are exhausted.
    pub fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    fn current(&self) -> Result<&Tuple> {
        self.position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| Error::ExecutionError("cursor is not on a row".to_string()))
    }

    /// Value of column `index` (0-based) in the current row
    pub fn get_value(&self, index: usize) -> Result<&Value> {
        self.current()?.get(index).ok_or_else(|| {
            Error::ExecutionError(format!(
                "column index {} out of range ({} columns)",
                index,
                self.columns.len()
            ))
        })
    }

    /// Integer value; NULL reads as 0
    pub fn get_long(&self, index: usize) -> Result<i64> {
        let value = self.get_value(index)?;
        if value.is_null() {
            return Ok(0);
        }
        value.as_i64().ok_or_else(|| Error::TypeMismatch {
            from: value.type_name().to_string(),
            to: "BIGINT".to_string(),
        })
    }

    /// Floating-point value; NULL reads as 0.0
    pub fn get_double(&self, index: usize) -> Result<f64> {
        let value = self.get_value(index)?;
        if value.is_null() {
            return Ok(0.0);
        }
        value.as_f64().ok_or_else(|| Error::TypeMismatch {
            from: value.type_name().to_string(),
            to: "DOUBLE".to_string(),
        })
    }

    /// Text form of the value; `None` for NULL
    pub fn get_string(&self, index: usize) -> Result<Option<String>> {
        let value = self.get_value(index)?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.get_value(index)?.is_null())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Position of a result column, ignoring case
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// All rows, independent of the cursor
    pub fn rows(&self) -> &[Tuple] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
