use std::fmt::Debug;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::debug;

use super::DUPTBLSIZE;
use crate::filesystem::BlockCache;
use crate::structs::{Bitmap, Block, BLOCK_SIZE};
use crate::{Error, Result};

/// Scratch blocks kept in memory
const SCRATCH_LINES: usize = 16;

/// What phase 1 learned about an inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeState {
    Unallocated = 0,
    File = 1,
    Directory = 2,
    /// Marked for clearing: bad or duplicate blocks
    Clear = 3,
}

impl InodeState {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::Unallocated,
            1 => Self::File,
            2 => Self::Directory,
            _ => Self::Clear,
        }
    }
}

/// Per-block and per-inode bookkeeping of one check
pub trait CheckerTables: Debug {
    fn block_used(&mut self, blk: u32) -> Result<bool>;
    fn set_block_used(&mut self, blk: u32, used: bool) -> Result<()>;
    fn block_free(&mut self, blk: u32) -> Result<bool>;
    fn set_block_free(&mut self, blk: u32, free: bool) -> Result<()>;
    /// Start the free list map as a copy of the block map
    fn seed_free_map(&mut self) -> Result<()>;
    fn state(&mut self, ino: u32) -> Result<InodeState>;
    fn set_state(&mut self, ino: u32, state: InodeState) -> Result<()>;
    /// References still expected for `ino`
    fn link_count(&mut self, ino: u32) -> Result<i16>;
    fn set_link_count(&mut self, ino: u32, count: i16) -> Result<()>;

    fn decrement_link_count(&mut self, ino: u32) -> Result<()> {
        let count = self.link_count(ino)?;
        self.set_link_count(ino, count.wrapping_sub(1))
    }
}

/// Sizes of the tables for a filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    /// Blocks covered by the block maps
    pub blocks: u32,
    /// Inode slots, index 0 unused
    pub inodes: u32,
}

fn round_even(n: u64) -> u64 {
    (n + 1) & !1
}

impl TableLayout {
    pub fn new(blocks: u32, inodes: u32) -> Self {
        Self { blocks, inodes }
    }

    fn map_bytes(&self) -> u64 {
        round_even(Bitmap::<Block>::byte_size(self.blocks as u64))
    }

    fn state_bytes(&self) -> u64 {
        round_even((self.inodes as u64 + 3) / 4)
    }

    fn link_bytes(&self) -> u64 {
        self.inodes as u64 * 2
    }

    /// Bytes needed by all tables together
    pub fn memory_bytes(&self) -> u64 {
        2 * self.map_bytes() + self.state_bytes() + self.link_bytes()
    }

    /// Size of a scratch file holding the tables
    pub fn scratch_blocks(&self) -> u64 {
        let blocks = |bytes: u64| (bytes + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
        2 * blocks(self.map_bytes()) + blocks(self.state_bytes()) + blocks(self.link_bytes())
    }

    pub fn in_memory(&self) -> MemoryTables {
        MemoryTables {
            used: Bitmap::new(self.blocks as u64),
            free: Bitmap::new(self.blocks as u64),
            states: vec![0; self.state_bytes() as usize],
            links: vec![0; self.inodes as usize],
            inodes: self.inodes,
        }
    }

    /// Tables in a scratch file at `path`, or an anonymous temporary file
    pub fn on_scratch(&self, path: Option<&Path>) -> Result<ScratchTables> {
        let (file, path) = match path {
            Some(path) => {
                let file = File::options()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|source| Error::Open {
                        path: path.to_path_buf(),
                        source,
                    })?;
                (file, Some(path.to_path_buf()))
            }
            None => (tempfile::tempfile()?, None),
        };
        let blocks = |bytes: u64| (bytes + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
        let used_at = 0;
        let free_at = used_at + blocks(self.map_bytes());
        let state_at = free_at + blocks(self.map_bytes());
        let links_at = state_at + blocks(self.state_bytes());
        debug!("Scratch tables: free map at {free_at}, states at {state_at}, links at {links_at}");
        Ok(ScratchTables {
            cache: BlockCache::new(file, SCRATCH_LINES, BLOCK_SIZE),
            layout: *self,
            used_at,
            free_at,
            state_at,
            links_at,
            path,
        })
    }
}

fn check_inode(ino: u32, inodes: u32) -> Result<()> {
    if ino >= inodes {
        return Err(Error::OutOfRange {
            what: "inode",
            value: ino as u64,
        });
    }
    Ok(())
}

#[derive(Debug)]
pub struct MemoryTables {
    used: Bitmap<Block>,
    free: Bitmap<Block>,
    /// Two bits per inode
    states: Vec<u8>,
    links: Vec<i16>,
    inodes: u32,
}

impl CheckerTables for MemoryTables {
    fn block_used(&mut self, blk: u32) -> Result<bool> {
        self.used.get(blk as u64)
    }

    fn set_block_used(&mut self, blk: u32, used: bool) -> Result<()> {
        self.used.set(blk as u64, used)
    }

    fn block_free(&mut self, blk: u32) -> Result<bool> {
        self.free.get(blk as u64)
    }

    fn set_block_free(&mut self, blk: u32, free: bool) -> Result<()> {
        self.free.set(blk as u64, free)
    }

    fn seed_free_map(&mut self) -> Result<()> {
        self.free.copy_from(&self.used);
        Ok(())
    }

    fn state(&mut self, ino: u32) -> Result<InodeState> {
        check_inode(ino, self.inodes)?;
        let shift = (ino % 4) * 2;
        Ok(InodeState::from_bits(self.states[ino as usize / 4] >> shift))
    }

    fn set_state(&mut self, ino: u32, state: InodeState) -> Result<()> {
        check_inode(ino, self.inodes)?;
        let shift = (ino % 4) * 2;
        let byte = &mut self.states[ino as usize / 4];
        *byte = (*byte & !(3 << shift)) | ((state as u8) << shift);
        Ok(())
    }

    fn link_count(&mut self, ino: u32) -> Result<i16> {
        check_inode(ino, self.inodes)?;
        Ok(self.links[ino as usize])
    }

    fn set_link_count(&mut self, ino: u32, count: i16) -> Result<()> {
        check_inode(ino, self.inodes)?;
        self.links[ino as usize] = count;
        Ok(())
    }
}

/// Tables paged through a scratch file
#[derive(Debug)]
pub struct ScratchTables {
    cache: BlockCache<File>,
    layout: TableLayout,
    used_at: u64,
    free_at: u64,
    state_at: u64,
    links_at: u64,
    /// Named scratch file, removed when done
    path: Option<PathBuf>,
}

impl ScratchTables {
    fn byte(&mut self, base: u64, offset: u64) -> Result<u8> {
        let line = self.cache.get(base + offset / BLOCK_SIZE as u64)?;
        Ok(line.data()[(offset % BLOCK_SIZE as u64) as usize])
    }

    fn set_byte(&mut self, base: u64, offset: u64, value: u8) -> Result<()> {
        let line = self.cache.get(base + offset / BLOCK_SIZE as u64)?;
        let at = (offset % BLOCK_SIZE as u64) as usize;
        if line.data()[at] != value {
            line.data_mut()[at] = value;
        }
        Ok(())
    }

    fn check_block(&self, blk: u32) -> Result<()> {
        if blk >= self.layout.blocks {
            return Err(Error::OutOfRange {
                what: "bitmap index",
                value: blk as u64,
            });
        }
        Ok(())
    }

    fn bit(&mut self, base: u64, blk: u32) -> Result<bool> {
        self.check_block(blk)?;
        Ok(self.byte(base, blk as u64 / 8)? & (1 << (blk % 8)) != 0)
    }

    fn set_bit(&mut self, base: u64, blk: u32, value: bool) -> Result<()> {
        self.check_block(blk)?;
        let byte = self.byte(base, blk as u64 / 8)?;
        let mask = 1 << (blk % 8);
        let byte = if value { byte | mask } else { byte & !mask };
        self.set_byte(base, blk as u64 / 8, byte)
    }
}

impl CheckerTables for ScratchTables {
    fn block_used(&mut self, blk: u32) -> Result<bool> {
        self.bit(self.used_at, blk)
    }

    fn set_block_used(&mut self, blk: u32, used: bool) -> Result<()> {
        self.set_bit(self.used_at, blk, used)
    }

    fn block_free(&mut self, blk: u32) -> Result<bool> {
        self.bit(self.free_at, blk)
    }

    fn set_block_free(&mut self, blk: u32, free: bool) -> Result<()> {
        self.set_bit(self.free_at, blk, free)
    }

    fn seed_free_map(&mut self) -> Result<()> {
        for i in 0..self.free_at - self.used_at {
            let data = self.cache.get(self.used_at + i)?.data().to_vec();
            self.cache
                .get_empty(self.free_at + i)?
                .data_mut()
                .copy_from_slice(&data);
        }
        Ok(())
    }

    fn state(&mut self, ino: u32) -> Result<InodeState> {
        check_inode(ino, self.layout.inodes)?;
        let byte = self.byte(self.state_at, ino as u64 / 4)?;
        Ok(InodeState::from_bits(byte >> ((ino % 4) * 2)))
    }

    fn set_state(&mut self, ino: u32, state: InodeState) -> Result<()> {
        check_inode(ino, self.layout.inodes)?;
        let shift = (ino % 4) * 2;
        let byte = self.byte(self.state_at, ino as u64 / 4)?;
        self.set_byte(
            self.state_at,
            ino as u64 / 4,
            (byte & !(3 << shift)) | ((state as u8) << shift),
        )
    }

    fn link_count(&mut self, ino: u32) -> Result<i16> {
        check_inode(ino, self.layout.inodes)?;
        let at = ino as u64 * 2;
        let low = self.byte(self.links_at, at)?;
        let high = self.byte(self.links_at, at + 1)?;
        Ok(i16::from_le_bytes([low, high]))
    }

    fn set_link_count(&mut self, ino: u32, count: i16) -> Result<()> {
        check_inode(ino, self.layout.inodes)?;
        let at = ino as u64 * 2;
        let [low, high] = count.to_le_bytes();
        self.set_byte(self.links_at, at, low)?;
        self.set_byte(self.links_at, at + 1, high)
    }
}

impl Drop for ScratchTables {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            debug!("Removing scratch file {}", path.display());
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Blocks claimed more than once. The first `distinct` entries hold one
/// copy of every duplicated block; the rest hold further claims.
#[derive(Debug, Default)]
pub(crate) struct DupTable {
    entries: Vec<u32>,
    distinct: usize,
}

impl DupTable {
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= DUPTBLSIZE
    }

    /// Note another claim on `blk`
    pub(crate) fn record(&mut self, blk: u32) {
        if self.entries[..self.distinct].contains(&blk) {
            self.entries.push(blk);
            return;
        }
        self.entries.push(blk);
        let last = self.entries.len() - 1;
        self.entries.swap(self.distinct, last);
        self.distinct += 1;
    }

    /// Take `blk` out of the distinct set, returning whether that set is now empty
    pub(crate) fn take_distinct(&mut self, blk: u32) -> Option<bool> {
        let at = self.entries[..self.distinct].iter().position(|&b| b == blk)?;
        self.distinct -= 1;
        self.entries.swap(at, self.distinct);
        Some(self.distinct == 0)
    }

    /// Drop one claim on `blk`, returning whether there was one
    pub(crate) fn release(&mut self, blk: u32) -> bool {
        match self.entries.iter().position(|&b| b == blk) {
            Some(at) => {
                self.entries.remove(at);
                self.distinct = self.distinct.min(self.entries.len());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(tables: &mut dyn CheckerTables) {
        tables.set_block_used(5, true).unwrap();
        tables.set_block_used(1999, true).unwrap();
        assert_eq![tables.block_used(5).unwrap(), true];
        assert_eq![tables.block_used(6).unwrap(), false];
        assert![tables.block_used(2000).is_err()];

        tables.seed_free_map().unwrap();
        assert_eq![tables.block_free(1999).unwrap(), true];
        tables.set_block_free(7, true).unwrap();
        assert_eq![tables.block_used(7).unwrap(), false];

        tables.set_state(3, InodeState::Directory).unwrap();
        tables.set_state(4, InodeState::Clear).unwrap();
        tables.set_state(3, InodeState::File).unwrap();
        assert_eq![tables.state(3).unwrap(), InodeState::File];
        assert_eq![tables.state(4).unwrap(), InodeState::Clear];
        assert_eq![tables.state(5).unwrap(), InodeState::Unallocated];

        tables.set_link_count(300, 2).unwrap();
        tables.decrement_link_count(300).unwrap();
        tables.decrement_link_count(300).unwrap();
        tables.decrement_link_count(300).unwrap();
        assert_eq![tables.link_count(300).unwrap(), -1];
        assert![tables.state(400).is_err()];
    }

    #[test]
    fn memory_tables() {
        exercise(&mut TableLayout::new(2000, 400).in_memory());
    }

    #[test]
    fn scratch_tables() {
        exercise(&mut TableLayout::new(2000, 400).on_scratch(None).unwrap());
    }

    #[test]
    fn named_scratch_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch");
        let mut tables = TableLayout::new(20_000, 5000).on_scratch(Some(&path)).unwrap();
        tables.set_block_used(19_999, true).unwrap();
        tables.set_link_count(4999, 7).unwrap();
        assert_eq![tables.link_count(4999).unwrap(), 7];
        assert![path.exists()];
        drop(tables);
        assert![!path.exists()];
    }

    #[test]
    fn layout_sizes() {
        let layout = TableLayout::new(8000, 1000);
        assert_eq![layout.memory_bytes(), 2 * 1000 + 250 + 2000];
        assert_eq![layout.scratch_blocks(), 2 + 1 + 2];
    }

    #[test]
    fn duplicate_claims() {
        let mut dups = DupTable::default();
        dups.record(10);
        dups.record(20);
        dups.record(10);
        assert_eq![dups.entries, vec![10, 20, 10]];
        assert_eq![dups.take_distinct(20), Some(false)];
        assert_eq![dups.take_distinct(20), None];
        assert_eq![dups.take_distinct(10), Some(true)];
        assert![dups.release(10)];
        assert![dups.release(10)];
        assert![dups.release(20)];
        assert![!dups.release(20)];
        assert![dups.is_empty()];
    }
}
