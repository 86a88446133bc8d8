//! Shared block cache
//!
//! One `BlockManager` serves every table of a database. It keeps recently
//! used blocks in an LRU cache keyed by (store, block) and writes dirty blocks
//! back to their store when they are evicted or flushed.
//!
//! The manager only guards its own index. Callers must hold the owning
//! table's lock while they read or modify block contents.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::block::{Block, BlockId, BlockKind, BLOCK_SIZE};
use super::block_store::BlockStore;
use crate::error::Result;

/// Smallest cache the manager will run with
pub const MIN_CACHE_BLOCKS: usize = 16;

/// Cache key: which store, which block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub store: u32,
    pub block: BlockId,
}

#[derive(Debug)]
struct CachedBlock {
    block: Block,
    dirty: bool,
    store: Arc<BlockStore>,
}

impl CachedBlock {
    fn write_back(&mut self, block: BlockId) -> Result<()> {
        if self.dirty {
            self.store.write_block(block, &self.block)?;
            self.dirty = false;
        }
        Ok(())
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct BlockCache {
    /// Least recently used first
    blocks: IndexMap<BlockKey, CachedBlock>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl BlockCache {
    /// Move a resident block to the most-recently-used end
    fn hit(&mut self, key: &BlockKey) -> Option<usize> {
        let entry = self.blocks.shift_remove(key)?;
        self.hits += 1;
        let (index, _) = self.blocks.insert_full(*key, entry);
        Some(index)
    }

    fn make_room(&mut self) -> Result<()> {
        while self.blocks.len() >= self.capacity {
            let Some((key, mut victim)) = self.blocks.shift_remove_index(0) else {
                break;
            };
            if let Err(e) = victim.write_back(key.block) {
                // Keep the dirty block rather than lose it.
                self.blocks.insert(key, victim);
                return Err(e);
            }
            self.evictions += 1;
            trace!(store = key.store, block = key.block, "evicted block");
        }
        Ok(())
    }
}

/// Block cache shared by all tables of a database
#[derive(Debug)]
pub struct BlockManager {
    cache: Mutex<BlockCache>,
    next_store_id: AtomicU32,
}

impl BlockManager {
    /// Create a manager able to cache at least `min_bytes`
    pub fn new(min_bytes: usize) -> Self {
        Self {
            cache: Mutex::new(BlockCache {
                blocks: IndexMap::new(),
                capacity: blocks_for(min_bytes).max(MIN_CACHE_BLOCKS),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            next_store_id: AtomicU32::new(1),
        }
    }

    /// Hand out an id for a new `BlockStore`
    pub fn next_store_id(&self) -> u32 {
        self.next_store_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Grow the cache to hold at least `min_bytes`. Never shrinks.
    ///
    /// Returns the capacity in blocks.
    pub fn ensure_capacity(&self, min_bytes: usize) -> usize {
        let wanted = blocks_for(min_bytes);
        let mut cache = self.cache.lock();
        if wanted > cache.capacity {
            debug!(from = cache.capacity, to = wanted, "growing block cache");
            cache.capacity = wanted;
        }
        cache.capacity
    }

    /// Cache capacity in blocks
    pub fn capacity(&self) -> usize {
        self.cache.lock().capacity
    }

    /// Lock the cache with `block` resident, returning its index.
    ///
    /// A miss reads the block without holding the cache lock. The caller
    /// holds the owning table's lock, so the only race is another reader
    /// loading the same block, which the second lookup catches.
    fn resident(
        &self,
        store: &Arc<BlockStore>,
        block: BlockId,
    ) -> Result<(MutexGuard<'_, BlockCache>, usize)> {
        let key = BlockKey {
            store: store.id(),
            block,
        };
        {
            let mut cache = self.cache.lock();
            if let Some(index) = cache.hit(&key) {
                return Ok((cache, index));
            }
        }

        let data = store.read_block(block)?;
        let mut cache = self.cache.lock();
        if let Some(index) = cache.hit(&key) {
            return Ok((cache, index));
        }
        cache.misses += 1;
        cache.make_room()?;
        let (index, _) = cache.blocks.insert_full(
            key,
            CachedBlock {
                block: data,
                dirty: false,
                store: store.clone(),
            },
        );
        Ok((cache, index))
    }

    /// Run `f` over a block's contents
    pub fn with_block<R>(
        &self,
        store: &Arc<BlockStore>,
        block: BlockId,
        f: impl FnOnce(&Block) -> R,
    ) -> Result<R> {
        let (cache, index) = self.resident(store, block)?;
        Ok(f(&cache.blocks[index].block))
    }

    /// Run `f` over a block's contents and mark it dirty
    pub fn with_block_mut<R>(
        &self,
        store: &Arc<BlockStore>,
        block: BlockId,
        f: impl FnOnce(&mut Block) -> R,
    ) -> Result<R> {
        let (mut cache, index) = self.resident(store, block)?;
        let entry = &mut cache.blocks[index];
        entry.dirty = true;
        Ok(f(&mut entry.block))
    }

    /// Append a fresh block of `kind` to a store and cache it.
    ///
    /// The empty block is written through, so the file never holds a
    /// reachable block that is not a valid block of its kind.
    pub fn allocate_block(&self, store: &Arc<BlockStore>, kind: BlockKind) -> Result<BlockId> {
        let block = store.allocate_block()?;
        let fresh = Block::new(kind);
        store.write_block(block, &fresh)?;

        let mut cache = self.cache.lock();
        cache.make_room()?;
        cache.blocks.insert(
            BlockKey {
                store: store.id(),
                block,
            },
            CachedBlock {
                block: fresh,
                dirty: false,
                store: store.clone(),
            },
        );
        Ok(block)
    }

    /// Write back every dirty block of one store
    pub fn flush_store(&self, store_id: u32) -> Result<()> {
        let mut cache = self.cache.lock();
        for (key, entry) in cache.blocks.iter_mut() {
            if key.store == store_id {
                entry.write_back(key.block)?;
            }
        }
        Ok(())
    }

    /// Write back every dirty block
    pub fn flush_all(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        for (key, entry) in cache.blocks.iter_mut() {
            entry.write_back(key.block)?;
        }
        Ok(())
    }

    /// Forget a store's blocks without writing them
    pub fn discard_store(&self, store_id: u32) {
        let mut cache = self.cache.lock();
        cache.blocks.retain(|key, _| key.store != store_id);
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            capacity: cache.capacity,
            resident: cache.blocks.len(),
            hits: cache.hits,
            misses: cache.misses,
            evictions: cache.evictions,
        }
    }
}

fn blocks_for(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}
