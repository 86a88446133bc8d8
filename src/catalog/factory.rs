//! Table creation and loading
//!
//! `TableFactory` is the only place that turns a name into a `Table`. It
//! writes new table files and, on load, checks everything it reads: the
//! header, the stored CREATE TABLE text, and every block of the row chain.
//! Anything inconsistent is reported as `Error::CorruptTable` so that the
//! catalog can decide whether to delete the file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::schema::Schema;
use crate::error::{Error, Result};
use crate::sql::{Parser, Statement};
use crate::storage::block::{BlockId, BlockKind, HEADER_BLOCK, INVALID_BLOCK};
use crate::storage::block_store::{table_path, BlockStore, TableHeader, TABLE_EXTENSION};
use crate::storage::{BlockManager, Table};

/// Creates and loads the tables of one database
#[derive(Debug)]
pub struct TableFactory {
    dir: Option<PathBuf>,
    manager: Arc<BlockManager>,
    lock_timeout: Duration,
}

impl TableFactory {
    pub fn new(dir: Option<PathBuf>, manager: Arc<BlockManager>, lock_timeout: Duration) -> Self {
        Self {
            dir,
            manager,
            lock_timeout,
        }
    }

    /// File holding `name`, if the database has a directory.
    /// File names are lowercase so lookups ignore case.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(|dir| table_path(dir, &name.to_lowercase()))
    }

    /// Whether a table file for `name` exists
    pub fn exists(&self, name: &str) -> bool {
        self.path_of(name).is_some_and(|path| path.exists())
    }

    /// Write a new, empty table
    pub fn create(&self, name: &str, schema: Schema) -> Result<Arc<Table>> {
        schema.validate(name)?;
        if self.exists(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }

        let store = Arc::new(BlockStore::create(
            self.manager.next_store_id(),
            name,
            self.path_of(name),
        )?);
        let table = Table::new(
            name,
            schema,
            store.clone(),
            self.manager.clone(),
            self.lock_timeout,
        );
        let header = TableHeader::new(name, table.create_sql());

        let written = store
            .write_header(&header)
            .and_then(|_| store.sync())
            .and_then(|_| table.init(&header, Vec::new()));
        if let Err(e) = written {
            // Leave nothing half-created behind.
            let _ = store.remove();
            return Err(e);
        }

        info!(table = name, "table created");
        Ok(Arc::new(table))
    }

    /// Open a table file and verify it
    pub fn load(&self, name: &str) -> Result<Arc<Table>> {
        let path = self
            .path_of(name)
            .filter(|path| path.exists())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let store = Arc::new(BlockStore::open(self.manager.next_store_id(), name, path)?);
        let header = store.read_header()?;
        let corrupt = |reason: String| Error::CorruptTable {
            table: name.to_string(),
            reason,
        };

        if !header.name.eq_ignore_ascii_case(name) {
            return Err(corrupt(format!("header names table '{}'", header.name)));
        }

        let schema = parse_schema(&header.create_sql, &header.name).map_err(|e| {
            corrupt(format!("stored schema is unusable: {}", e))
        })?;
        let blocks = verify_chain(&store, &header)?;

        let store_id = store.id();
        let table = Table::new(
            header.name.clone(),
            schema,
            store,
            self.manager.clone(),
            self.lock_timeout,
        );
        if let Err(e) = table.init(&header, blocks) {
            self.manager.discard_store(store_id);
            return Err(match e {
                Error::CorruptTable { .. } | Error::IoError(_) => e,
                other => corrupt(other.to_string()),
            });
        }

        debug!(table = %header.name, rows = table.row_count(), "table loaded");
        Ok(Arc::new(table))
    }

    /// Delete the file of a table that failed to load. Returns whether
    /// there was anything to delete.
    pub fn remove_file(&self, name: &str) -> Result<bool> {
        match self.path_of(name) {
            Some(path) if path.exists() => {
                fs::remove_file(&path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Lowercase names of the table files in the directory
    pub fn stored_names(&self) -> Result<Vec<String>> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(Vec::new());
        };
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(name) = table_name_of(&path) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn table_name_of(path: &Path) -> Option<String> {
    if !path.is_file() || path.extension()? != TABLE_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

/// Rebuild a schema from stored CREATE TABLE text
fn parse_schema(sql: &str, name: &str) -> Result<Schema> {
    let mut parser = Parser::new(sql)?;
    let statement = parser.parse()?;
    parser.expect_end()?;
    match statement {
        Statement::CreateTable(create) if create.table_name.eq_ignore_ascii_case(name) => {
            Ok(create.schema)
        }
        Statement::CreateTable(create) => Err(Error::ParseError(format!(
            "CREATE TABLE names '{}'",
            create.table_name
        ))),
        _ => Err(Error::ParseError("not a CREATE TABLE statement".to_string())),
    }
}

/// Walk the row chain from the header, checking every link
fn verify_chain(store: &BlockStore, header: &TableHeader) -> Result<Vec<BlockId>> {
    let corrupt = |reason: String| Error::CorruptTable {
        table: header.name.clone(),
        reason,
    };

    let block_count = store.block_count()?;
    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    let mut current = header.first_block;

    while current != INVALID_BLOCK {
        if current == HEADER_BLOCK || current >= block_count {
            return Err(corrupt(format!(
                "chain points to block {} of {}",
                current, block_count
            )));
        }
        if !seen.insert(current) {
            return Err(corrupt(format!("chain loops at block {}", current)));
        }

        let block = store.read_block(current)?;
        if block.kind() != Some(BlockKind::Row) {
            return Err(corrupt(format!("block {} is not a row block", current)));
        }
        if !block.is_consistent() {
            return Err(corrupt(format!("block {} has a damaged slot directory", current)));
        }

        blocks.push(current);
        current = block.next();
    }

    // Row blocks reach the file whenever they are evicted, so after an
    // unclean shutdown the chain may end before or after the recorded tail.
    // Every block on it has been checked; the header is rewritten on flush.
    let last = blocks.last().copied().unwrap_or(INVALID_BLOCK);
    if last != header.last_block {
        warn!(
            table = %header.name,
            chain_end = last,
            header_end = header.last_block,
            "repairing stale chain tail"
        );
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};
    use crate::storage::Value;
    use tempfile::TempDir;

    fn factory(dir: &TempDir) -> TableFactory {
        TableFactory::new(
            Some(dir.path().to_path_buf()),
            Arc::new(BlockManager::new(0)),
            Duration::from_secs(1),
        )
    }

    fn schema() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Integer, 0).primary_key(true),
            Column::new("label", DataType::Varchar(16), 1),
        ])
    }

    #[test]
    fn test_create_then_load() {
        let dir = TempDir::new().unwrap();
        {
            let factory = factory(&dir);
            let table = factory.create("Items", schema()).unwrap();
            table.insert(vec![Value::Integer(1), Value::from("one")]).unwrap();
            table.close().unwrap();
            assert!(matches!(
                factory.create("items", schema()),
                Err(Error::TableAlreadyExists(_))
            ));
        }

        let factory = factory(&dir);
        assert_eq!(factory.stored_names().unwrap(), vec!["items".to_string()]);
        let table = factory.load("ITEMS").unwrap();
        assert_eq!(table.name(), "Items");
        assert_eq!(table.schema(), &schema());
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            factory(&dir).load("ghost"),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        factory.create("t", schema()).unwrap().close().unwrap();

        let path = factory.path_of("t").unwrap();
        fs::write(&path, b"not a table").unwrap();
        assert!(factory.load("t").unwrap_err().is_corruption());
        assert!(factory.remove_file("t").unwrap());
        assert!(!factory.exists("t"));
    }

    #[test]
    fn test_broken_chain_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        factory.create("t", schema()).unwrap().close().unwrap();

        // Point the chain past the end of the file
        let store = BlockStore::open(99, "t", factory.path_of("t").unwrap()).unwrap();
        let mut header = store.read_header().unwrap();
        header.first_block = 7;
        header.last_block = 7;
        store.write_header(&header).unwrap();
        drop(store);

        let err = factory.load("t").unwrap_err();
        assert!(matches!(err, Error::CorruptTable { .. }), "{:?}", err);
    }

    #[test]
    fn test_stale_tail_is_repaired() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        let table = factory.create("t", schema()).unwrap();
        for i in 0..1000 {
            table
                .insert(vec![Value::Integer(i), Value::from("some label")])
                .unwrap();
        }
        table.close().unwrap();
        assert!(table.block_count() > 1);

        // Header written before the last block was linked
        let store = BlockStore::open(99, "t", factory.path_of("t").unwrap()).unwrap();
        let mut header = store.read_header().unwrap();
        let first = store.read_block(header.first_block).unwrap();
        header.last_block = header.first_block;
        store.write_header(&header).unwrap();
        drop(store);
        assert_ne!(first.next(), INVALID_BLOCK);

        let table = factory.load("t").unwrap();
        assert_eq!(table.row_count(), 1000);
    }

    #[test]
    fn test_bad_schema_text_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let factory = factory(&dir);
        factory.create("t", schema()).unwrap().close().unwrap();

        let store = BlockStore::open(99, "t", factory.path_of("t").unwrap()).unwrap();
        let mut header = store.read_header().unwrap();
        header.create_sql = "CREATE TABLE t (".to_string();
        store.write_header(&header).unwrap();
        drop(store);

        assert!(factory.load("t").unwrap_err().is_corruption());
    }
}
