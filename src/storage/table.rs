//! Tables
//!
//! A `Table` couples a schema with the block chain that stores its rows.
//! Rows are only reachable through a [`TableReader`] or [`TableWriter`],
//! which hold the table's [`Lock`] in read or read+write mode for as long as
//! they live. The chain and the counters in `TableState` only change under
//! a writer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::block::{BlockId, BlockKind, INVALID_BLOCK, MAX_ROW_SIZE};
use super::block_manager::BlockManager;
use super::block_store::{BlockStore, TableHeader};
use super::index::{IndexKey, UniqueIndex};
use super::tuple::{Tuple, Value};
use crate::catalog::Schema;
use crate::error::{Error, Result};
use crate::lock::{Lock, ReadGuard, WriteGuard};

/// Location of a row: block and slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub block: BlockId,
    pub slot: u16,
}

#[derive(Debug, Default)]
struct TableState {
    /// Row blocks in chain order
    blocks: Vec<BlockId>,
    /// Position in `blocks` where inserts start looking for space
    insert_hint: usize,
    /// Highest value handed out or seen in the AUTO_INCREMENT column
    auto_increment: i64,
    row_count: u64,
    /// PRIMARY KEY and UNIQUE indexes
    indexes: Vec<UniqueIndex>,
}

/// A table: schema, rows, and the lock that guards them
#[derive(Debug)]
pub struct Table {
    name: String,
    schema: Schema,
    store: Arc<BlockStore>,
    manager: Arc<BlockManager>,
    lock: Lock,
    state: Mutex<TableState>,
    lock_timeout: Duration,
}

impl Table {
    /// Wrap a store. The table is unusable until `init` has run.
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        store: Arc<BlockStore>,
        manager: Arc<BlockManager>,
        lock_timeout: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            lock: Lock::new(format!("table:{}", name)),
            name,
            schema,
            store,
            manager,
            state: Mutex::new(TableState::default()),
            lock_timeout,
        }
    }

    /// Validate the schema and adopt the verified block chain.
    ///
    /// Every row is decoded once; the row count and the AUTO_INCREMENT
    /// high-water mark are recomputed from what is actually stored.
    pub fn init(&self, header: &TableHeader, blocks: Vec<BlockId>) -> Result<()> {
        self.schema.validate(&self.name)?;

        let auto_column = self.schema.columns().iter().position(|c| c.auto_increment);
        let mut auto_increment = header.auto_increment;
        let mut row_count = 0;
        let mut indexes = UniqueIndex::for_schema(&self.schema);
        for &block in &blocks {
            for (row_id, row) in self.read_block_rows(block)? {
                if row.len() != self.schema.column_count() {
                    return Err(self.corrupt(format!(
                        "row in block {} has {} values, expected {}",
                        block,
                        row.len(),
                        self.schema.column_count()
                    )));
                }
                if let Some(value) = auto_column.and_then(|i| row.get(i)).and_then(Value::as_i64) {
                    auto_increment = auto_increment.max(value);
                }
                for index in &mut indexes {
                    if let Some(other) = index.insert(&row, row_id) {
                        return Err(self.corrupt(format!(
                            "rows {}:{} and {}:{} share a {} key",
                            other.block,
                            other.slot,
                            row_id.block,
                            row_id.slot,
                            index.name()
                        )));
                    }
                }
                row_count += 1;
            }
        }

        debug!(table = %self.name, blocks = blocks.len(), rows = row_count, "table initialized");
        *self.state.lock() = TableState {
            blocks,
            insert_hint: 0,
            auto_increment,
            row_count,
            indexes,
        };
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of live rows
    pub fn row_count(&self) -> u64 {
        self.state.lock().row_count
    }

    /// Number of row blocks in the chain
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Text that recreates this table's schema
    pub fn create_sql(&self) -> String {
        self.schema.to_create_sql(&self.name)
    }

    /// Take the table lock in read mode
    pub fn read(&self) -> Result<TableReader<'_>> {
        let guard = self.lock.read(self.lock_timeout)?;
        Ok(TableReader {
            table: self,
            _guard: guard,
        })
    }

    /// Take the table lock in read+write mode
    pub fn write(&self) -> Result<TableWriter<'_>> {
        let guard = self.lock.write(self.lock_timeout)?;
        Ok(TableWriter {
            table: self,
            _guard: guard,
        })
    }

    /// Take the table lock in read+write mode only if it is idle
    pub fn try_write(&self) -> Option<TableWriter<'_>> {
        self.lock.try_write().map(|guard| TableWriter {
            table: self,
            _guard: guard,
        })
    }

    /// Writer for an insert: the no-wait path first, then, if `wait`
    /// allows it, a blocking acquisition.
    pub fn lock_for_insert(&self, wait: bool) -> Result<Option<TableWriter<'_>>> {
        if let Some(writer) = self.try_write() {
            return Ok(Some(writer));
        }
        if !wait {
            trace!(table = %self.name, "insert lock busy");
            return Ok(None);
        }
        self.write().map(Some)
    }

    /// Insert one full row, waiting for the lock if needed
    pub fn insert(&self, values: Vec<Value>) -> Result<RowId> {
        match self.lock_for_insert(true)? {
            Some(mut writer) => writer.insert(values.into_iter().map(Some).collect()),
            None => Err(Error::Internal(format!(
                "no writer for table '{}'",
                self.name
            ))),
        }
    }

    /// Insert one full row only if the table is idle. `Ok(None)` if busy.
    pub fn try_insert(&self, values: Vec<Value>) -> Result<Option<RowId>> {
        match self.lock_for_insert(false)? {
            Some(mut writer) => writer.insert(values.into_iter().map(Some).collect()).map(Some),
            None => Ok(None),
        }
    }

    /// All rows, under a read lock
    pub fn scan(&self) -> Result<Vec<Tuple>> {
        let reader = self.read()?;
        Ok(reader.scan()?.into_iter().map(|(_, row)| row).collect())
    }

    /// Write the header and every dirty block to the store
    pub fn flush(&self) -> Result<()> {
        let _guard = self.lock.read(self.lock_timeout)?;
        self.write_out()
    }

    fn write_out(&self) -> Result<()> {
        self.store.write_header(&self.header())?;
        self.manager.flush_store(self.store.id())?;
        self.store.sync()
    }

    /// Flush and release the table's cached blocks
    pub fn close(&self) -> Result<()> {
        let _guard = self.lock.write(self.lock_timeout)?;
        self.write_out()?;
        self.manager.discard_store(self.store.id());
        debug!(table = %self.name, "table closed");
        Ok(())
    }

    /// Drop cached blocks without writing them and delete the storage
    pub fn remove(&self) -> Result<()> {
        let _guard = self.lock.write(self.lock_timeout)?;
        self.manager.discard_store(self.store.id());
        self.store.remove()?;
        let mut state = self.state.lock();
        *state = TableState::default();
        debug!(table = %self.name, "table removed");
        Ok(())
    }

    fn header(&self) -> TableHeader {
        let state = self.state.lock();
        let mut header = TableHeader::new(self.name.clone(), self.create_sql());
        header.first_block = state.blocks.first().copied().unwrap_or(INVALID_BLOCK);
        header.last_block = state.blocks.last().copied().unwrap_or(INVALID_BLOCK);
        header.block_count = state.blocks.len() as u32 + 1;
        header.auto_increment = state.auto_increment;
        header.row_count = state.row_count;
        header
    }

    fn read_block_rows(&self, block: BlockId) -> Result<Vec<(RowId, Tuple)>> {
        let raw = self.manager.with_block(&self.store, block, |b| {
            b.rows()
                .map(|(slot, bytes)| (slot, bytes.to_vec()))
                .collect::<Vec<_>>()
        })?;
        raw.into_iter()
            .map(|(slot, bytes)| {
                let row = Tuple::from_bytes(&bytes).map_err(|e| {
                    self.corrupt(format!("block {} slot {}: {}", block, slot, e))
                })?;
                Ok((RowId { block, slot }, row))
            })
            .collect()
    }

    fn read_row(&self, row_id: RowId) -> Result<Option<Tuple>> {
        let bytes = self.manager.with_block(&self.store, row_id.block, |b| {
            b.row(row_id.slot).map(<[u8]>::to_vec)
        })?;
        bytes
            .map(|bytes| {
                Tuple::from_bytes(&bytes).map_err(|e| {
                    self.corrupt(format!("block {} slot {}: {}", row_id.block, row_id.slot, e))
                })
            })
            .transpose()
    }

    /// Find a row through the unique index over exactly `columns`
    fn find(&self, columns: &[&str], values: &[Value]) -> Result<Option<(RowId, Tuple)>> {
        if columns.len() != values.len() {
            return Err(Error::ExecutionError(format!(
                "{} key values supplied for {} columns",
                values.len(),
                columns.len()
            )));
        }
        let mut positions = Vec::with_capacity(columns.len());
        let mut key = Vec::with_capacity(columns.len());
        for (name, value) in columns.iter().zip(values) {
            let column = self.schema.get_column(name).ok_or_else(|| {
                Error::ColumnNotFound(name.to_string(), self.name.clone())
            })?;
            positions.push(column.position);
            key.push(value.coerce_to(&column.data_type, &column.name)?);
        }

        let found = {
            let state = self.state.lock();
            let index = state
                .indexes
                .iter()
                .find(|index| {
                    let mut have = index.columns().to_vec();
                    let mut want = positions.clone();
                    have.sort_unstable();
                    want.sort_unstable();
                    have == want
                })
                .ok_or_else(|| {
                    Error::ExecutionError(format!(
                        "table '{}' has no unique index on ({})",
                        self.name,
                        columns.join(", ")
                    ))
                })?;
            let ordered = index
                .columns()
                .iter()
                .map(|c| {
                    positions
                        .iter()
                        .position(|p| p == c)
                        .map(|i| key[i].clone())
                        .unwrap_or(Value::Null)
                })
                .collect();
            IndexKey::new(ordered).and_then(|key| index.get(&key))
        };

        match found {
            Some(row_id) => Ok(self.read_row(row_id)?.map(|row| (row_id, row))),
            None => Ok(None),
        }
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptTable {
            table: self.name.clone(),
            reason,
        }
    }
}

/// Read access to a table's rows
pub struct TableReader<'a> {
    table: &'a Table,
    _guard: ReadGuard<'a>,
}

impl<'a> TableReader<'a> {
    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// All live rows in chain order
    pub fn scan(&self) -> Result<Vec<(RowId, Tuple)>> {
        scan_chain(self.table)
    }

    /// One row by id, `None` if it was deleted
    pub fn get(&self, row_id: RowId) -> Result<Option<Tuple>> {
        self.table.read_row(row_id)
    }

    /// Look a row up by its PRIMARY KEY or UNIQUE columns
    pub fn find(&self, columns: &[&str], values: &[Value]) -> Result<Option<(RowId, Tuple)>> {
        self.table.find(columns, values)
    }
}

/// Exclusive access to a table's rows
pub struct TableWriter<'a> {
    table: &'a Table,
    _guard: WriteGuard<'a>,
}

impl<'a> TableWriter<'a> {
    pub fn table(&self) -> &'a Table {
        self.table
    }

    pub fn scan(&self) -> Result<Vec<(RowId, Tuple)>> {
        scan_chain(self.table)
    }

    pub fn get(&self, row_id: RowId) -> Result<Option<Tuple>> {
        self.table.read_row(row_id)
    }

    pub fn find(&self, columns: &[&str], values: &[Value]) -> Result<Option<(RowId, Tuple)>> {
        self.table.find(columns, values)
    }

    /// Insert a row. `None` entries take the column default, and NULL in an
    /// AUTO_INCREMENT column takes the next counter value.
    pub fn insert(&mut self, values: Vec<Option<Value>>) -> Result<RowId> {
        let schema = &self.table.schema;
        if values.len() != schema.column_count() {
            return Err(Error::ExecutionError(format!(
                "table '{}' has {} columns but {} values were supplied",
                self.table.name,
                schema.column_count(),
                values.len()
            )));
        }

        let mut auto_increment = self.table.state.lock().auto_increment;
        let mut row = Vec::with_capacity(values.len());
        for (column, value) in schema.columns().iter().zip(values) {
            let value = value
                .or_else(|| column.default.clone())
                .unwrap_or(Value::Null);
            let mut value = value.coerce_to(&column.data_type, &column.name)?;
            if column.auto_increment {
                match value.as_i64() {
                    Some(v) if !value.is_null() => auto_increment = auto_increment.max(v),
                    _ => {
                        auto_increment += 1;
                        value = Value::from_i64(auto_increment)
                            .coerce_to(&column.data_type, &column.name)?;
                    }
                }
            }
            row.push(value);
        }
        let row = Tuple::new(row);

        self.check_row(&row, None)?;
        let row_id = self.store_row(&row)?;

        let mut state = self.table.state.lock();
        state.auto_increment = auto_increment;
        state.row_count += 1;
        for index in &mut state.indexes {
            index.insert(&row, row_id);
        }
        trace!(table = %self.table.name, block = row_id.block, slot = row_id.slot, "row inserted");
        Ok(row_id)
    }

    /// Replace a row's values. The row may move; its new location is returned.
    pub fn update(&mut self, row_id: RowId, values: Vec<Value>) -> Result<RowId> {
        let schema = &self.table.schema;
        if values.len() != schema.column_count() {
            return Err(Error::ExecutionError(format!(
                "update of table '{}' supplied {} values for {} columns",
                self.table.name,
                values.len(),
                schema.column_count()
            )));
        }

        let mut auto_increment = self.table.state.lock().auto_increment;
        let mut row = Vec::with_capacity(values.len());
        for (column, value) in schema.columns().iter().zip(values) {
            let value = value.coerce_to(&column.data_type, &column.name)?;
            if column.auto_increment {
                if let Some(v) = value.as_i64().filter(|_| !value.is_null()) {
                    auto_increment = auto_increment.max(v);
                }
            }
            row.push(value);
        }
        let row = Tuple::new(row);

        let old = self.table.read_row(row_id)?.ok_or_else(|| {
            Error::ExecutionError(format!(
                "row {}:{} of table '{}' does not exist",
                row_id.block, row_id.slot, self.table.name
            ))
        })?;
        self.check_row(&row, Some(row_id))?;

        let bytes = encode(&row)?;
        let in_place = self.table.manager.with_block_mut(
            &self.table.store,
            row_id.block,
            |block| block.update_row(row_id.slot, &bytes),
        )?;

        // A row that outgrows its block is written elsewhere before the old
        // image goes, so a failed placement leaves the row as it was.
        let new_id = if in_place {
            row_id
        } else {
            let new_id = self.place_bytes(&bytes)?;
            let removed = self.table.manager.with_block_mut(
                &self.table.store,
                row_id.block,
                |block| block.delete_row(row_id.slot),
            );
            if let Err(e) = removed {
                let _ = self.table.manager.with_block_mut(
                    &self.table.store,
                    new_id.block,
                    |block| block.delete_row(new_id.slot),
                );
                return Err(e);
            }
            self.note_free_space(row_id.block);
            new_id
        };

        let mut state = self.table.state.lock();
        state.auto_increment = auto_increment;
        for index in &mut state.indexes {
            index.remove(&old, row_id);
            index.insert(&row, new_id);
        }
        Ok(new_id)
    }

    /// Delete a row. Returns false if it was already gone.
    pub fn delete(&mut self, row_id: RowId) -> Result<bool> {
        let Some(old) = self.table.read_row(row_id)? else {
            return Ok(false);
        };
        let deleted = self.table.manager.with_block_mut(
            &self.table.store,
            row_id.block,
            |block| block.delete_row(row_id.slot),
        )?;
        if deleted {
            let mut state = self.table.state.lock();
            state.row_count = state.row_count.saturating_sub(1);
            for index in &mut state.indexes {
                index.remove(&old, row_id);
            }
            drop(state);
            self.note_free_space(row_id.block);
        }
        Ok(deleted)
    }

    /// Let inserts look at `block` again
    fn note_free_space(&self, block: BlockId) {
        let mut state = self.table.state.lock();
        if let Some(position) = state.blocks.iter().position(|b| *b == block) {
            state.insert_hint = state.insert_hint.min(position);
        }
    }

    /// Delete every row, keeping the block chain for reuse. Returns the
    /// number of rows removed.
    pub fn truncate(&mut self) -> Result<u64> {
        let blocks = self.table.state.lock().blocks.clone();
        for block in blocks {
            self.table
                .manager
                .with_block_mut(&self.table.store, block, |b| b.reset_rows())?;
        }
        let mut state = self.table.state.lock();
        let removed = state.row_count;
        state.row_count = 0;
        state.insert_hint = 0;
        for index in &mut state.indexes {
            index.clear();
        }
        Ok(removed)
    }

    /// Enforce NOT NULL, PRIMARY KEY and UNIQUE, ignoring the row at
    /// `exclude`.
    fn check_row(&self, row: &Tuple, exclude: Option<RowId>) -> Result<()> {
        let schema = &self.table.schema;
        for column in schema.columns() {
            let value = row.get(column.position).unwrap_or(&Value::Null);
            if value.is_null() && !column.nullable {
                return Err(Error::NullNotAllowed(column.name.clone()));
            }
        }

        let state = self.table.state.lock();
        for index in &state.indexes {
            if index.conflict(row, exclude).is_none() {
                continue;
            }
            if index.is_primary() {
                debug!(table = %self.table.name, row = ?row, "duplicate primary key");
                return Err(Error::PrimaryKeyViolation(self.table.name.clone()));
            }
            return Err(Error::UniqueViolation(index.name().to_string()));
        }
        Ok(())
    }

    fn store_row(&mut self, row: &Tuple) -> Result<RowId> {
        let bytes = encode(row)?;
        self.place_bytes(&bytes)
    }

    /// Put an encoded row into the first block with room, extending the
    /// chain when none has.
    fn place_bytes(&mut self, bytes: &[u8]) -> Result<RowId> {
        let table = self.table;
        let (mut position, blocks) = {
            let state = table.state.lock();
            (state.insert_hint, state.blocks.clone())
        };

        while position < blocks.len() {
            let block = blocks[position];
            let slot = table
                .manager
                .with_block_mut(&table.store, block, |b| b.insert_row(bytes))?;
            if let Some(slot) = slot {
                table.state.lock().insert_hint = position;
                return Ok(RowId { block, slot });
            }
            position += 1;
        }

        let block = table.manager.allocate_block(&table.store, BlockKind::Row)?;
        if let Some(&last) = blocks.last() {
            table
                .manager
                .with_block_mut(&table.store, last, |b| b.set_next(block))?;
        }
        {
            let mut state = table.state.lock();
            state.blocks.push(block);
            state.insert_hint = state.blocks.len() - 1;
        }
        // The header on disk always names the current chain ends
        table.store.write_header(&table.header())?;
        debug!(table = %table.name, block, "row block appended");

        let slot = table
            .manager
            .with_block_mut(&table.store, block, |b| b.insert_row(bytes))?
            .ok_or(Error::RowTooLarge(bytes.len()))?;
        Ok(RowId { block, slot })
    }
}

fn encode(row: &Tuple) -> Result<Vec<u8>> {
    let bytes = row.to_bytes();
    if bytes.len() > MAX_ROW_SIZE {
        return Err(Error::RowTooLarge(bytes.len()));
    }
    Ok(bytes)
}

fn scan_chain(table: &Table) -> Result<Vec<(RowId, Tuple)>> {
    let blocks = table.state.lock().blocks.clone();
    let mut rows = Vec::new();
    for block in blocks {
        rows.extend(table.read_block_rows(block)?);
    }
    Ok(rows)
}
