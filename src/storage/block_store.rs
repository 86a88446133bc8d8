//! Block storage for one table
//!
//! A table lives in `<dir>/<name>.db`, a whole number of `BLOCK_SIZE` blocks.
//! Databases without a directory keep the same block images in memory.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use super::block::{Block, BlockId, BlockKind, BLOCK_SIZE, HEADER_BLOCK, INVALID_BLOCK};
use crate::error::{Error, Result};

/// File magic at the start of the header block
pub const MAGIC: &[u8; 8] = b"BlockDB\0";

/// Format written by this version
pub const FORMAT_VERSION: u16 = 1;

/// Oldest format this version can read
pub const MIN_FORMAT_VERSION: u16 = 1;

/// Extension of table files
pub const TABLE_EXTENSION: &str = "db";

/// Header fields start after the magic and the block kind byte.
const HEADER_FIELDS_OFFSET: usize = 9;

/// Path of a table's file inside a database directory
pub fn table_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, TABLE_EXTENSION))
}

/// Contents of block 0
#[derive(Debug, Clone, PartialEq)]
pub struct TableHeader {
    pub name: String,
    pub first_block: BlockId,
    pub last_block: BlockId,
    pub block_count: u32,
    pub auto_increment: i64,
    pub row_count: u64,
    /// CREATE TABLE statement that rebuilds the schema
    pub create_sql: String,
}

impl TableHeader {
    pub fn new(name: impl Into<String>, create_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            first_block: INVALID_BLOCK,
            last_block: INVALID_BLOCK,
            block_count: 1,
            auto_increment: 0,
            row_count: 0,
            create_sql: create_sql.into(),
        }
    }

    /// Serialize into a header block
    pub fn encode(&self) -> Result<Block> {
        let mut block = Block::new(BlockKind::Header);
        block.data_mut()[..MAGIC.len()].copy_from_slice(MAGIC);

        let mut fields = Vec::new();
        fields.write_u16::<LittleEndian>(FORMAT_VERSION)?;
        fields.write_u16::<LittleEndian>(self.name.len() as u16)?;
        fields.write_all(self.name.as_bytes())?;
        fields.write_u32::<LittleEndian>(self.first_block)?;
        fields.write_u32::<LittleEndian>(self.last_block)?;
        fields.write_u32::<LittleEndian>(self.block_count)?;
        fields.write_i64::<LittleEndian>(self.auto_increment)?;
        fields.write_u64::<LittleEndian>(self.row_count)?;
        fields.write_u32::<LittleEndian>(self.create_sql.len() as u32)?;
        fields.write_all(self.create_sql.as_bytes())?;

        if HEADER_FIELDS_OFFSET + fields.len() > BLOCK_SIZE {
            return Err(Error::StorageError(format!(
                "header for table '{}' does not fit in one block",
                self.name
            )));
        }
        block.data_mut()[HEADER_FIELDS_OFFSET..HEADER_FIELDS_OFFSET + fields.len()]
            .copy_from_slice(&fields);
        Ok(block)
    }

    /// Parse a header block, reporting any damage as corruption of `table`
    pub fn decode(block: &Block, table: &str) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptTable {
            table: table.to_string(),
            reason,
        };

        if &block.data()[..MAGIC.len()] != MAGIC {
            return Err(corrupt("bad file magic".to_string()));
        }
        if block.kind() != Some(BlockKind::Header) {
            return Err(corrupt("block 0 is not a header block".to_string()));
        }

        let mut cursor = Cursor::new(&block.data()[HEADER_FIELDS_OFFSET..]);
        let truncated = |_| corrupt("truncated header".to_string());

        let version = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(corrupt(format!(
                "format version {} is not supported (expected {}..={})",
                version, MIN_FORMAT_VERSION, FORMAT_VERSION
            )));
        }

        let name_len = cursor.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let name = read_string(&mut cursor, name_len).map_err(corrupt)?;
        let first_block = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let last_block = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let block_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let auto_increment = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
        let row_count = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
        let sql_len = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let create_sql = read_string(&mut cursor, sql_len).map_err(corrupt)?;

        Ok(Self {
            name,
            first_block,
            last_block,
            block_count,
            auto_increment,
            row_count,
            create_sql,
        })
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>, len: usize) -> std::result::Result<String, String> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(format!("string of {} bytes overruns the header", len));
    }
    let mut bytes = vec![0u8; len];
    cursor
        .read_exact(&mut bytes)
        .map_err(|e| format!("truncated header: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "header string is not UTF-8".to_string())
}

#[derive(Debug)]
enum Backing {
    File(File),
    Memory(Vec<Box<[u8]>>),
    Removed,
}

/// The blocks of one table
#[derive(Debug)]
pub struct BlockStore {
    id: u32,
    name: String,
    path: Option<PathBuf>,
    backing: Mutex<Backing>,
}

impl BlockStore {
    /// Create a new store holding a zeroed header block.
    ///
    /// Fails if the file already exists.
    pub fn create(id: u32, name: impl Into<String>, path: Option<PathBuf>) -> Result<Self> {
        let backing = match &path {
            Some(path) => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(path)?;
                file.write_all(&[0u8; BLOCK_SIZE])?;
                Backing::File(file)
            }
            None => Backing::Memory(vec![vec![0u8; BLOCK_SIZE].into_boxed_slice()]),
        };

        Ok(Self {
            id,
            name: name.into(),
            path,
            backing: Mutex::new(backing),
        })
    }

    /// Open an existing table file
    pub fn open(id: u32, name: impl Into<String>, path: PathBuf) -> Result<Self> {
        let name = name.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len < BLOCK_SIZE as u64 || len % BLOCK_SIZE as u64 != 0 {
            return Err(Error::CorruptTable {
                table: name,
                reason: format!("file length {} is not a whole number of blocks", len),
            });
        }

        Ok(Self {
            id,
            name,
            path: Some(path),
            backing: Mutex::new(Backing::File(file)),
        })
    }

    /// Identifier unique within one block manager
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of blocks, header included
    pub fn block_count(&self) -> Result<u32> {
        match &*self.backing.lock() {
            Backing::File(file) => Ok((file.metadata()?.len() / BLOCK_SIZE as u64) as u32),
            Backing::Memory(blocks) => Ok(blocks.len() as u32),
            Backing::Removed => Err(self.removed()),
        }
    }

    /// Read one block
    pub fn read_block(&self, block: BlockId) -> Result<Block> {
        let mut backing = self.backing.lock();
        match &mut *backing {
            Backing::File(file) => {
                let len = file.metadata()?.len();
                let offset = block as u64 * BLOCK_SIZE as u64;
                if offset + BLOCK_SIZE as u64 > len {
                    return Err(Error::BlockOutOfRange(block));
                }
                let mut data = vec![0u8; BLOCK_SIZE];
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut data)?;
                Ok(Block::from_bytes(&data))
            }
            Backing::Memory(blocks) => blocks
                .get(block as usize)
                .map(|data| Block::from_bytes(data))
                .ok_or(Error::BlockOutOfRange(block)),
            Backing::Removed => Err(self.removed()),
        }
    }

    /// Write one block
    pub fn write_block(&self, block: BlockId, data: &Block) -> Result<()> {
        let mut backing = self.backing.lock();
        match &mut *backing {
            Backing::File(file) => {
                file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
                file.write_all(data.data())?;
                Ok(())
            }
            Backing::Memory(blocks) => {
                let slot = blocks
                    .get_mut(block as usize)
                    .ok_or(Error::BlockOutOfRange(block))?;
                slot.copy_from_slice(data.data());
                Ok(())
            }
            Backing::Removed => Err(self.removed()),
        }
    }

    /// Extend the store by one zeroed block
    pub fn allocate_block(&self) -> Result<BlockId> {
        let mut backing = self.backing.lock();
        match &mut *backing {
            Backing::File(file) => {
                let len = file.metadata()?.len();
                let block = (len / BLOCK_SIZE as u64) as BlockId;
                file.seek(SeekFrom::End(0))?;
                file.write_all(&[0u8; BLOCK_SIZE])?;
                Ok(block)
            }
            Backing::Memory(blocks) => {
                blocks.push(vec![0u8; BLOCK_SIZE].into_boxed_slice());
                Ok((blocks.len() - 1) as BlockId)
            }
            Backing::Removed => Err(self.removed()),
        }
    }

    /// Read and decode the header block
    pub fn read_header(&self) -> Result<TableHeader> {
        let block = self.read_block(HEADER_BLOCK)?;
        TableHeader::decode(&block, &self.name)
    }

    /// Encode and write the header block
    pub fn write_header(&self, header: &TableHeader) -> Result<()> {
        self.write_block(HEADER_BLOCK, &header.encode()?)
    }

    /// Push written blocks to the device
    pub fn sync(&self) -> Result<()> {
        if let Backing::File(file) = &mut *self.backing.lock() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Drop all blocks and delete the file
    pub fn remove(&self) -> Result<()> {
        let mut backing = self.backing.lock();
        *backing = Backing::Removed;
        if let Some(path) = &self.path {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    pub fn is_removed(&self) -> bool {
        matches!(&*self.backing.lock(), Backing::Removed)
    }

    fn removed(&self) -> Error {
        Error::StorageError(format!("table '{}' has been removed", self.name))
    }
}
