//! The database catalog
//!
//! A `Database` owns the name → table registry, the shared block cache and
//! a cache of compiled queries. Tables are loaded from the storage
//! directory the first time they are asked for. Creating, loading and
//! dropping tables is serialized by the catalog lock; the registry map
//! itself is only guarded for the moment it is read or changed.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::catalog::{Schema, TableFactory};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::executor::{Query, ResultSet};
use crate::lock::Lock;
use crate::storage::{BlockManager, CacheStats, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Active,
    Destroyed,
}

/// An embedded database
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    state: Mutex<Lifecycle>,
    /// Loaded tables by lowercase name
    tables: RwLock<HashMap<String, Arc<Table>>>,
    catalog_lock: Lock,
    manager: Arc<BlockManager>,
    factory: TableFactory,
    /// Compiled queries by SQL text, least recently used first
    query_cache: Mutex<IndexMap<String, Arc<Query>>>,
}

impl Database {
    /// Build a database that is not yet usable; call `init` next.
    pub fn new(config: DatabaseConfig) -> Self {
        let manager = Arc::new(BlockManager::new(0));
        let factory = TableFactory::new(
            config.path.clone(),
            manager.clone(),
            config.lock_timeout_duration(),
        );
        Self {
            config,
            state: Mutex::new(Lifecycle::Uninitialized),
            tables: RwLock::new(HashMap::new()),
            catalog_lock: Lock::new("catalog"),
            manager,
            factory,
            query_cache: Mutex::new(IndexMap::new()),
        }
    }

    /// Create the storage directory and size the block cache
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            Lifecycle::Active => return Ok(()),
            Lifecycle::Destroyed => return Err(Error::DatabaseClosed),
            Lifecycle::Uninitialized => {}
        }

        if let Some(dir) = &self.config.path {
            fs::create_dir_all(dir)?;
        }
        let blocks = self.manager.ensure_capacity(self.config.min_memory);
        *state = Lifecycle::Active;
        info!(path = ?self.config.path, cache_blocks = blocks, "database opened");
        Ok(())
    }

    /// Build and initialize a database
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let db = Self::new(config);
        db.init()?;
        Ok(db)
    }

    /// A database with no storage directory
    pub fn in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::new())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock() == Lifecycle::Active
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::DatabaseClosed)
        }
    }

    /// Find a table, loading it from storage on first use.
    ///
    /// `Ok(None)` means there is no such table. A stored table that fails
    /// verification is deleted and reported as missing when
    /// `remove_on_error` is set; otherwise the error is returned and the
    /// file is left alone.
    pub fn get_table(&self, name: &str) -> Result<Option<Arc<Table>>> {
        self.check_open()?;
        let key = name.to_lowercase();
        if let Some(table) = self.tables.read().get(&key) {
            return Ok(Some(table.clone()));
        }

        let _guard = self.catalog_lock.write(self.config.lock_timeout_duration())?;
        self.lookup(name)
    }

    /// Registry lookup, then load. The catalog lock must be held.
    fn lookup(&self, name: &str) -> Result<Option<Arc<Table>>> {
        let key = name.to_lowercase();
        // Another thread may have loaded it while we waited for the lock
        if let Some(table) = self.tables.read().get(&key) {
            return Ok(Some(table.clone()));
        }

        match self.factory.load(name) {
            Ok(table) => {
                self.tables.write().insert(key, table.clone());
                info!(table = %table.name(), "table loaded");
                Ok(Some(table))
            }
            Err(Error::TableNotFound(_)) => Ok(None),
            Err(e) if e.is_corruption() && self.config.remove_on_error => {
                warn!(table = name, error = %e, "removing unreadable table");
                self.factory.remove_file(name)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a table. Fails without side effects if the name is taken.
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<Table>> {
        self.check_open()?;
        let _guard = self.catalog_lock.write(self.config.lock_timeout_duration())?;

        let key = name.to_lowercase();
        if self.tables.read().contains_key(&key) || self.factory.exists(name) {
            return Err(Error::TableAlreadyExists(name.to_string()));
        }

        let table = self.factory.create(name, schema)?;
        self.tables.write().insert(key, table.clone());
        self.clear_query_cache();
        Ok(table)
    }

    /// Remove a table and its storage
    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.check_open()?;
        let _guard = self.catalog_lock.write(self.config.lock_timeout_duration())?;

        let table = self
            .lookup(name)?
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        self.tables.write().remove(&name.to_lowercase());
        self.clear_query_cache();
        table.remove()?;
        info!(table = %table.name(), "table dropped");
        Ok(())
    }

    /// Names of loaded and stored tables, sorted ignoring case.
    /// Tables not yet loaded are listed by their lowercase file name.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.check_open()?;
        let mut names: Vec<String> = self
            .tables
            .read()
            .values()
            .map(|table| table.name().to_string())
            .collect();
        for stored in self.factory.stored_names()? {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&stored)) {
                names.push(stored);
            }
        }
        names.sort_by_key(|n| n.to_lowercase());
        Ok(names)
    }

    /// Compile a statement, reusing a cached compilation of the same text
    pub fn parse_query(&self, sql: &str) -> Result<Arc<Query>> {
        self.check_open()?;
        let capacity = self.config.query_cache_size;
        if capacity == 0 {
            return Query::parse(sql).map(Arc::new);
        }

        {
            let mut cache = self.query_cache.lock();
            if let Some(query) = cache.shift_remove(sql) {
                cache.insert(sql.to_string(), query.clone());
                return Ok(query);
            }
        }

        let query = Arc::new(Query::parse(sql)?);
        let mut cache = self.query_cache.lock();
        cache.insert(sql.to_string(), query.clone());
        while cache.len() > capacity {
            cache.shift_remove_index(0);
        }
        Ok(query)
    }

    /// Compile and run a statement
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let query = self.parse_query(sql)?;
        let result = query.execute(self, params);
        if query.is_ddl() {
            self.clear_query_cache();
        }
        result
    }

    fn clear_query_cache(&self) {
        let mut cache = self.query_cache.lock();
        if !cache.is_empty() {
            debug!(entries = cache.len(), "clearing query cache");
            cache.clear();
        }
    }

    /// Number of compiled queries currently cached
    pub fn cached_queries(&self) -> usize {
        self.query_cache.lock().len()
    }

    /// Grow the block cache to hold at least `bytes`. Returns the capacity
    /// in blocks.
    pub fn ensure_memory_capacity(&self, bytes: usize) -> usize {
        self.manager.ensure_capacity(bytes)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.manager.stats()
    }

    /// Write every loaded table to storage
    pub fn flush(&self) -> Result<()> {
        self.check_open()?;
        let tables: Vec<Arc<Table>> = self.tables.read().values().cloned().collect();
        for table in tables {
            table.flush()?;
        }
        Ok(())
    }

    /// Close every table and mark the database destroyed.
    ///
    /// A table that fails to close is logged and skipped. Closing twice is
    /// a no-op.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == Lifecycle::Destroyed {
                return Ok(());
            }
            *state = Lifecycle::Destroyed;
        }

        let guard = self.catalog_lock.write(self.config.lock_timeout_duration());
        if let Err(e) = &guard {
            warn!(error = %e, "closing without the catalog lock");
        }

        let tables: Vec<Arc<Table>> = self.tables.write().drain().map(|(_, t)| t).collect();
        let mut failed = 0;
        for table in &tables {
            if let Err(e) = table.close() {
                failed += 1;
                warn!(table = %table.name(), error = %e, "failed to close table");
            }
        }
        self.query_cache.lock().clear();
        info!(tables = tables.len(), failed, "database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if *self.state.lock() == Lifecycle::Active {
            let _ = self.close();
        }
    }
}
