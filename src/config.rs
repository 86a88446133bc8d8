//! Database configuration
//!
//! Settings can be built in code or read from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default minimum block cache size (8 MiB)
pub const DEFAULT_MIN_MEMORY: usize = 8 * 1024 * 1024;

/// Default lock wait (10 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Default number of compiled queries kept by the catalog
pub const DEFAULT_QUERY_CACHE_SIZE: usize = 128;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Directory holding one `.db` file per table; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// Delete a table file that fails to load instead of reporting the error
    pub remove_on_error: bool,
    /// Minimum bytes of block cache
    pub min_memory: usize,
    /// Upper bound on every blocking lock acquisition, in milliseconds
    pub lock_timeout_ms: u64,
    /// Compiled queries kept by SQL text; zero disables the cache
    pub query_cache_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            remove_on_error: false,
            min_memory: DEFAULT_MIN_MEMORY,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Store tables under the given directory
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the remove-on-error policy
    pub fn remove_on_error(mut self, remove: bool) -> Self {
        self.remove_on_error = remove;
        self
    }

    /// Set the minimum cache size in bytes
    pub fn min_memory(mut self, bytes: usize) -> Self {
        self.min_memory = bytes;
        self
    }

    /// Set the lock timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the query cache size
    pub fn query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    /// Lock timeout as a `Duration`
    pub fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write this config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
