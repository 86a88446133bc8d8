//! Unique indexes
//!
//! Each PRIMARY KEY and each UNIQUE column of a table gets an ordered,
//! in-memory index from key to row. Indexes are rebuilt from the stored rows
//! when a table is loaded and kept current by every write, so constraint
//! checks and key lookups never scan the block chain.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::table::RowId;
use super::tuple::{Tuple, Value};
use crate::catalog::Schema;

/// Key values of one row, in index column order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    /// Build a key from column values. Keys never contain NULL.
    pub fn new(values: Vec<Value>) -> Option<Self> {
        if values.iter().any(Value::is_null) {
            return None;
        }
        Some(Self(values.into_iter().map(normalize).collect()))
    }

    /// Compare two keys column by column
    pub fn compare(&self, other: &IndexKey) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = match (a, b) {
                (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
                _ => a
                    .compare(b)
                    .unwrap_or_else(|| a.type_name().cmp(b.type_name())),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

// -0.0 and 0.0 are the same key
fn normalize(value: Value) -> Value {
    match value {
        Value::Float(f) if f == 0.0 => Value::Float(0.0),
        other => other,
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

/// A unique index over one or more columns
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    name: String,
    columns: Vec<usize>,
    primary: bool,
    entries: BTreeMap<IndexKey, RowId>,
}

impl UniqueIndex {
    pub fn new(name: impl Into<String>, columns: Vec<usize>, primary: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            primary,
            entries: BTreeMap::new(),
        }
    }

    /// The primary key index first, then one index per UNIQUE column
    pub fn for_schema(schema: &Schema) -> Vec<UniqueIndex> {
        let mut indexes = Vec::new();
        let key: Vec<usize> = schema
            .columns()
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.position)
            .collect();
        if !key.is_empty() {
            indexes.push(UniqueIndex::new("PRIMARY KEY", key, true));
        }
        for column in schema.columns().iter().filter(|c| c.unique && !c.primary_key) {
            indexes.push(UniqueIndex::new(column.name.clone(), vec![column.position], false));
        }
        indexes
    }

    /// Constraint name: "PRIMARY KEY" or the UNIQUE column's name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The row's key, or `None` when a key column is NULL
    pub fn key_of(&self, row: &Tuple) -> Option<IndexKey> {
        let values = self
            .columns
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        IndexKey::new(values)
    }

    pub fn get(&self, key: &IndexKey) -> Option<RowId> {
        self.entries.get(key).copied()
    }

    /// Row holding the same key as `row`, other than `exclude`
    pub fn conflict(&self, row: &Tuple, exclude: Option<RowId>) -> Option<RowId> {
        let id = self.get(&self.key_of(row)?)?;
        (Some(id) != exclude).then_some(id)
    }

    /// Index `row` at `row_id`. Returns the row that already held the key.
    pub fn insert(&mut self, row: &Tuple, row_id: RowId) -> Option<RowId> {
        let key = self.key_of(row)?;
        match self.entries.get(&key) {
            Some(&existing) if existing != row_id => Some(existing),
            _ => {
                self.entries.insert(key, row_id);
                None
            }
        }
    }

    /// Drop `row`'s entry if it still points at `row_id`
    pub fn remove(&mut self, row: &Tuple, row_id: RowId) {
        if let Some(key) = self.key_of(row) {
            if self.entries.get(&key) == Some(&row_id) {
                self.entries.remove(&key);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
