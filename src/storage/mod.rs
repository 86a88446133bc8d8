//! Storage engine module
//!
//! This module contains the storage engine components:
//! - Fixed-size slotted blocks
//! - Per-table block stores (file or memory)
//! - The shared LRU block cache
//! - Tables and their row encoding
//! - In-memory unique indexes

pub mod block;
pub mod block_manager;
pub mod block_store;
pub mod index;
pub mod table;
pub mod tuple;

pub use block::{Block, BlockId, BlockKind, BLOCK_SIZE};
pub use block_manager::{BlockManager, CacheStats};
pub use block_store::{BlockStore, TableHeader};
pub use index::{IndexKey, UniqueIndex};
pub use table::{RowId, Table, TableReader, TableWriter};
pub use tuple::{Tuple, Value};
