//! BlockDB - an embedded relational storage engine written in Rust
//!
//! This library provides:
//! - A reader/writer lock with timeouts and a no-wait mode
//! - Block storage (8 KiB slotted blocks, per-table stores, a shared LRU cache)
//! - Tables with NOT NULL, PRIMARY KEY and UNIQUE checks
//! - A catalog that loads tables lazily and removes unreadable ones on request
//! - SQL parsing, expression binding and evaluation, and query execution

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod lock;
pub mod sql;
pub mod storage;

pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, Result};
pub use executor::{Query, ResultSet};
pub use storage::Value;
