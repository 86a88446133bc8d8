//! Fixed-size blocks
//!
//! Every table file is a sequence of `BLOCK_SIZE` blocks. Block 0 holds the
//! table header (see `block_store`); the rest are slotted row blocks chained
//! through a `next` pointer.
//!
//! Row block layout:
//!
//! ```text
//! +--------+-------+-------------+------+----------+-----------------+-------+
//! | next:4 | n:2   | free_off:2  | kind | reserved | slots (4 bytes) | ... rows |
//! +--------+-------+-------------+------+----------+-----------------+-------+
//! ```
//!
//! A slot holds the row offset and size. Size 0 marks a deleted row.

use byteorder::{ByteOrder, LittleEndian};

/// Size of every block in bytes (8 KiB)
pub const BLOCK_SIZE: usize = 8192;

/// Row block header size
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Slot directory entry size
pub const SLOT_SIZE: usize = 4;

/// Largest row that fits in an empty block
pub const MAX_ROW_SIZE: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE - SLOT_SIZE;

/// Block index inside a table file
pub type BlockId = u32;

/// Marks the end of a block chain
pub const INVALID_BLOCK: BlockId = u32::MAX;

/// Block holding the table header
pub const HEADER_BLOCK: BlockId = 0;

const NEXT_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 4;
const FREE_OFFSET: usize = 6;
const KIND_OFFSET: usize = 8;

/// What a block stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    Free = 0,
    Header = 1,
    Row = 2,
}

impl BlockKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(BlockKind::Free),
            1 => Some(BlockKind::Header),
            2 => Some(BlockKind::Row),
            _ => None,
        }
    }
}

/// One block's bytes
#[derive(Debug, Clone)]
pub struct Block {
    data: Box<[u8]>,
}

impl Block {
    /// Create a zeroed block of the given kind
    pub fn new(kind: BlockKind) -> Self {
        let mut block = Self {
            data: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
        };
        if kind == BlockKind::Row {
            block.set_next(INVALID_BLOCK);
            block.set_free_offset(BLOCK_SIZE);
        }
        block.data[KIND_OFFSET] = kind as u8;
        block
    }

    /// Wrap bytes read from storage
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = vec![0u8; BLOCK_SIZE];
        let len = bytes.len().min(BLOCK_SIZE);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            data: data.into_boxed_slice(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn kind(&self) -> Option<BlockKind> {
        BlockKind::from_byte(self.data[KIND_OFFSET])
    }

    /// Next block in the chain
    pub fn next(&self) -> BlockId {
        LittleEndian::read_u32(&self.data[NEXT_OFFSET..])
    }

    pub fn set_next(&mut self, next: BlockId) {
        LittleEndian::write_u32(&mut self.data[NEXT_OFFSET..], next);
    }

    /// Number of slots, including deleted ones
    pub fn slot_count(&self) -> u16 {
        LittleEndian::read_u16(&self.data[COUNT_OFFSET..])
    }

    fn set_slot_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.data[COUNT_OFFSET..], count);
    }

    fn free_offset(&self) -> usize {
        LittleEndian::read_u16(&self.data[FREE_OFFSET..]) as usize
    }

    fn set_free_offset(&mut self, offset: usize) {
        LittleEndian::write_u16(&mut self.data[FREE_OFFSET..], offset as u16);
    }

    fn slots_end(&self) -> usize {
        BLOCK_HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE
    }

    /// Contiguous bytes between the slot directory and the row area
    pub fn free_space(&self) -> usize {
        self.free_offset().saturating_sub(self.slots_end())
    }

    /// Bytes held by live rows
    pub fn live_bytes(&self) -> usize {
        (0..self.slot_count()).map(|slot| self.slot(slot).1).sum()
    }

    /// Free bytes once deleted rows are compacted away
    fn reclaimable_space(&self) -> usize {
        BLOCK_SIZE.saturating_sub(self.slots_end() + self.live_bytes())
    }

    fn slot(&self, slot: u16) -> (usize, usize) {
        let at = BLOCK_HEADER_SIZE + slot as usize * SLOT_SIZE;
        let offset = LittleEndian::read_u16(&self.data[at..]) as usize;
        let size = LittleEndian::read_u16(&self.data[at + 2..]) as usize;
        (offset, size)
    }

    fn set_slot(&mut self, slot: u16, offset: usize, size: usize) {
        let at = BLOCK_HEADER_SIZE + slot as usize * SLOT_SIZE;
        LittleEndian::write_u16(&mut self.data[at..], offset as u16);
        LittleEndian::write_u16(&mut self.data[at + 2..], size as u16);
    }

    fn dead_slot(&self) -> Option<u16> {
        (0..self.slot_count()).find(|&slot| self.slot(slot).1 == 0)
    }

    /// Copy `row` below the row area and point `slot` at it. The caller has
    /// checked that it fits.
    fn write_row(&mut self, slot: u16, row: &[u8]) {
        let offset = self.free_offset() - row.len();
        self.data[offset..offset + row.len()].copy_from_slice(row);
        self.set_slot(slot, offset, row.len());
        self.set_free_offset(offset);
    }

    /// Pack live rows against the end of the block. Slots keep their
    /// numbers, so row ids stay valid.
    pub fn compact(&mut self) {
        let mut live: Vec<(u16, usize, usize)> = (0..self.slot_count())
            .map(|slot| {
                let (offset, size) = self.slot(slot);
                (slot, offset, size)
            })
            .filter(|&(_, _, size)| size > 0)
            .collect();
        // Highest offset first so a row never overwrites one not yet moved
        live.sort_by(|a, b| b.1.cmp(&a.1));

        let mut end = BLOCK_SIZE;
        for (slot, offset, size) in live {
            let target = end - size;
            self.data.copy_within(offset..offset + size, target);
            self.set_slot(slot, target, size);
            end = target;
        }
        self.set_free_offset(end);
    }

    /// Store a row, reusing a deleted slot when there is one. Returns the
    /// slot, or `None` when the block is full even after compaction.
    pub fn insert_row(&mut self, row: &[u8]) -> Option<u16> {
        if row.is_empty() {
            return None;
        }
        let reuse = self.dead_slot();
        let needed = row.len() + if reuse.is_some() { 0 } else { SLOT_SIZE };
        if self.free_space() < needed {
            if self.reclaimable_space() < needed {
                return None;
            }
            self.compact();
        }

        let slot = match reuse {
            Some(slot) => slot,
            None => {
                let slot = self.slot_count();
                self.set_slot_count(slot + 1);
                slot
            }
        };
        self.write_row(slot, row);
        Some(slot)
    }

    /// Replace a row, compacting the block if the new image is larger.
    /// Fails, leaving the row untouched, when it does not fit.
    pub fn update_row(&mut self, slot: u16, row: &[u8]) -> bool {
        if slot >= self.slot_count() || row.is_empty() {
            return false;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 {
            return false;
        }

        if row.len() <= size {
            self.data[offset..offset + row.len()].copy_from_slice(row);
            self.set_slot(slot, offset, row.len());
            return true;
        }

        if self.free_space() < row.len() {
            if self.reclaimable_space() + size < row.len() {
                return false;
            }
            self.set_slot(slot, offset, 0);
            self.compact();
        }
        self.write_row(slot, row);
        true
    }

    /// Mark a row deleted
    pub fn delete_row(&mut self, slot: u16) -> bool {
        if slot >= self.slot_count() {
            return false;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 {
            return false;
        }
        self.set_slot(slot, offset, 0);
        true
    }

    /// Row bytes, or `None` for a deleted or missing slot
    pub fn row(&self, slot: u16) -> Option<&[u8]> {
        if slot >= self.slot_count() {
            return None;
        }
        let (offset, size) = self.slot(slot);
        if size == 0 || offset + size > BLOCK_SIZE {
            return None;
        }
        Some(&self.data[offset..offset + size])
    }

    /// Live rows with their slots
    pub fn rows(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        (0..self.slot_count()).filter_map(move |slot| self.row(slot).map(|row| (slot, row)))
    }

    /// Clear all rows, keeping the chain pointer
    pub fn reset_rows(&mut self) {
        let next = self.next();
        *self = Block::new(BlockKind::Row);
        self.set_next(next);
    }

    /// Check the slot directory against the block bounds
    pub fn is_consistent(&self) -> bool {
        let slots_end = self.slots_end();
        let free_offset = self.free_offset();
        if free_offset == 0 || free_offset > BLOCK_SIZE || slots_end > free_offset {
            return false;
        }
        (0..self.slot_count()).all(|slot| {
            let (offset, size) = self.slot(slot);
            size == 0 || (offset >= free_offset && offset + size <= BLOCK_SIZE)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_row_block() {
        let block = Block::new(BlockKind::Row);
        assert_eq!(block.kind(), Some(BlockKind::Row));
        assert_eq!(block.next(), INVALID_BLOCK);
        assert_eq!(block.slot_count(), 0);
        assert_eq!(block.free_space(), BLOCK_SIZE - BLOCK_HEADER_SIZE);
        assert!(block.is_consistent());
    }

    #[test]
    fn test_insert_delete_row() {
        let mut block = Block::new(BlockKind::Row);
        let first = block.insert_row(b"alpha").unwrap();
        let second = block.insert_row(b"beta").unwrap();

        assert_eq!(block.row(first), Some(&b"alpha"[..]));
        assert!(block.delete_row(first));
        assert!(!block.delete_row(first));
        assert_eq!(block.row(first), None);

        let rows: Vec<_> = block.rows().collect();
        assert_eq!(rows, vec![(second, &b"beta"[..])]);
    }

    #[test]
    fn test_update_row_grows() {
        let mut block = Block::new(BlockKind::Row);
        let slot = block.insert_row(b"ab").unwrap();
        assert!(block.update_row(slot, b"abcdef"));
        assert_eq!(block.row(slot), Some(&b"abcdef"[..]));
        assert!(block.update_row(slot, b"x"));
        assert_eq!(block.row(slot), Some(&b"x"[..]));
    }

    #[test]
    fn test_block_fills_up() {
        let mut block = Block::new(BlockKind::Row);
        let row = vec![7u8; 1000];
        let mut inserted = 0;
        while block.insert_row(&row).is_some() {
            inserted += 1;
        }
        assert_eq!(inserted, (BLOCK_SIZE - BLOCK_HEADER_SIZE) / (1000 + SLOT_SIZE));
        assert!(block.is_consistent());

        let max = vec![1u8; MAX_ROW_SIZE];
        assert!(Block::new(BlockKind::Row).insert_row(&max).is_some());
    }

    #[test]
    fn test_deleted_space_is_reused() {
        let mut block = Block::new(BlockKind::Row);
        let row = vec![3u8; 1000];
        let mut slots = Vec::new();
        while let Some(slot) = block.insert_row(&row) {
            slots.push(slot);
        }
        let full = slots.len();

        // Free two rows in the middle; both come back without new slots
        assert!(block.delete_row(slots[2]));
        assert!(block.delete_row(slots[4]));
        let bigger = vec![9u8; 1500];
        assert_eq!(block.insert_row(&bigger), Some(slots[2]));
        assert_eq!(block.slot_count() as usize, full);
        assert!(block.insert_row(&bigger).is_none());
        assert_eq!(block.insert_row(&row[..400]), Some(slots[4]));

        assert_eq!(block.row(slots[2]), Some(&bigger[..]));
        assert_eq!(block.row(slots[5]), Some(&row[..]));
        assert!(block.is_consistent());
    }

    #[test]
    fn test_churn_stays_in_one_block() {
        let mut block = Block::new(BlockKind::Row);
        let row = vec![5u8; 60];
        for _ in 0..5000 {
            let slot = block.insert_row(&row).unwrap();
            assert!(block.delete_row(slot));
        }
        assert_eq!(block.slot_count(), 1);
        assert_eq!(block.live_bytes(), 0);
    }

    #[test]
    fn test_update_row_compacts() {
        let mut block = Block::new(BlockKind::Row);
        let row = vec![1u8; 2000];
        let first = block.insert_row(&row).unwrap();
        let second = block.insert_row(&row).unwrap();
        let third = block.insert_row(&row).unwrap();
        assert!(block.delete_row(second));

        let grown = vec![2u8; 3500];
        assert!(block.update_row(third, &grown));
        assert_eq!(block.row(third), Some(&grown[..]));
        assert_eq!(block.row(first), Some(&row[..]));

        // Too large even after compaction: the old image survives
        let huge = vec![4u8; 7000];
        assert!(!block.update_row(first, &huge));
        assert_eq!(block.row(first), Some(&row[..]));
        assert!(block.is_consistent());
    }

    #[test]
    fn test_zeroed_block_is_inconsistent() {
        let zeroed = Block::from_bytes(&[0u8; BLOCK_SIZE]);
        assert!(!zeroed.is_consistent());
        assert_eq!(zeroed.free_space(), 0);
    }

    #[test]
    fn test_round_trip_bytes() {
        let mut block = Block::new(BlockKind::Row);
        block.set_next(42);
        block.insert_row(b"row").unwrap();

        let copy = Block::from_bytes(block.data());
        assert_eq!(copy.next(), 42);
        assert_eq!(copy.row(0), Some(&b"row"[..]));
    }
}
