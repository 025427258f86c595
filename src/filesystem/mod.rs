use std::fmt::Debug;
use std::io::{Read, Seek, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::structs::*;
use crate::volume::{Volume, VolumeOptions};
use crate::{Error, Result};

mod cache;

pub use cache::{BackingStore, BlockCache, CacheLine};

pub trait BlockDevice: Read + Write + Seek + Debug {}

impl BlockDevice for std::fs::File {}

/// Cached filesystem blocks
pub const CACHE_LINES: usize = 16;

/// Filesystem blocks of one volume partition.
/// Each block is two sectors, translated one at a time.
#[derive(Debug)]
pub struct PartitionStore {
    pub(crate) volume: Volume,
    pub(crate) partition: usize,
    /// Blocks that reached the device
    pub(crate) writes: u64,
}

impl BackingStore for PartitionStore {
    fn load_block(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        let first = block_sector(index)?;
        for (i, sector) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            self.volume
                .read_sector(self.partition, first + i as u32, sector)?;
        }
        Ok(())
    }

    fn store_block(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        if !self.volume.writable {
            warn!("Read-only filesystem, block {index} not written");
            return Ok(());
        }
        let first = block_sector(index)?;
        for (i, sector) in buf.chunks(SECTOR_SIZE).enumerate() {
            self.volume
                .write_sector(self.partition, first + i as u32, sector)?;
        }
        self.writes += 1;
        Ok(())
    }
}

fn block_sector(index: u64) -> Result<u32> {
    u32::try_from(index * SECTORS_PER_BLOCK as u64).map_err(|_| Error::OutOfRange {
        what: "block",
        value: index,
    })
}

/// A System V filesystem inside a volume partition
#[derive(Debug)]
pub struct Filesystem {
    pub superblock: Superblock,
    /// Byte order of the filesystem's structures
    pub order: Endian,
    pub(crate) cache: BlockCache<PartitionStore>,
    pub(crate) superblock_modified: bool,
}

impl Filesystem {
    /// Open the filesystem partition of a volume, or a bare filesystem image
    pub fn open<P: AsRef<Path>>(path: P, writable: bool, options: &VolumeOptions) -> Result<Self> {
        let path = path.as_ref();
        let volume = match Volume::open(path, writable, options) {
            Ok(volume) => volume,
            Err(Error::BadMagic { .. }) | Err(Error::ShortRead { .. }) => {
                info!("No volume header in {}, trying a plain filesystem", path.display());
                let device = std::fs::File::options()
                    .read(true)
                    .write(writable)
                    .open(path)
                    .map_err(|source| Error::Open {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Volume::plain_image(Box::new(device), path, writable)?
            }
            Err(e) => return Err(e),
        };
        let partition = volume.fs_partition;
        Self::from_volume(volume, partition)
    }

    /// Load the superblock of `partition`
    pub fn from_volume(mut volume: Volume, partition: usize) -> Result<Self> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        volume.read_sector(partition, (SUPERBLOCK_OFFSET / SECTOR_SIZE as u64) as u32, &mut raw)?;
        let (superblock, order) = Superblock::parse(&raw)?;
        if !superblock.is_1k() {
            return Err(Error::StructuralCorruption(format!(
                "filesystem type {} is not supported",
                superblock.fs_type
            )));
        }
        debug!(
            "Filesystem of {} blocks, {} inode blocks, {order}",
            superblock.fsize, superblock.isize
        );
        Ok(Self {
            superblock,
            order,
            cache: BlockCache::new(
                PartitionStore {
                    volume,
                    partition,
                    writes: 0,
                },
                CACHE_LINES,
                BLOCK_SIZE,
            ),
            superblock_modified: false,
        })
    }

    pub fn volume(&self) -> &Volume {
        &self.cache.store.volume
    }

    pub fn is_writable(&self) -> bool {
        self.cache.store.volume.writable
    }

    /// Whether any write reached the device
    pub fn was_modified(&self) -> bool {
        self.cache.store.writes > 0
    }

    pub fn block_count(&self) -> u32 {
        self.superblock.fsize.max(0) as u32
    }

    /// Load block with index
    pub fn load_block(&mut self, index: u64) -> Result<Block> {
        let line = self.cache.get(index)?;
        Ok(Block {
            index,
            data: line.data().to_vec(),
        })
    }

    /// Partition sectors from `sector` on, read past the cache
    pub fn read_sectors(&mut self, sector: u32, buf: &mut [u8]) -> Result<()> {
        let store = &mut self.cache.store;
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            store
                .volume
                .read_sector(store.partition, sector + i as u32, chunk)?;
        }
        Ok(())
    }

    /// Store block through the cache
    pub fn flush_block(&mut self, block: &Block) -> Result<()> {
        let line = self.cache.get(block.index)?;
        if line.data() != &block.data[..] {
            let len = block.data.len().min(BLOCK_SIZE);
            line.data_mut()[..len].copy_from_slice(&block.data[..len]);
        }
        Ok(())
    }

    /// Zero a block without reading it first
    pub fn clear_block(&mut self, index: u64) -> Result<()> {
        self.cache.get_empty(index)?;
        Ok(())
    }

    pub fn inode(&mut self, ino: u32) -> Result<DiskInode> {
        let order = self.order;
        let line = self.cache.get(inode_block(ino) as u64)?;
        Ok(DiskInode::decode(
            &line.data()[inode_slot(ino) * INODE_SIZE..],
            order,
        ))
    }

    pub fn write_inode(&mut self, ino: u32, inode: &DiskInode) -> Result<()> {
        let raw = inode.encode(self.order);
        let line = self.cache.get(inode_block(ino) as u64)?;
        let at = inode_slot(ino) * INODE_SIZE;
        if line.data()[at..at + INODE_SIZE] != raw[..] {
            line.data_mut()[at..at + INODE_SIZE].copy_from_slice(&raw);
        }
        Ok(())
    }

    /// Directory entry `slot` of directory block `index`
    pub fn dir_entry(&mut self, index: u64, slot: usize) -> Result<DirEntry> {
        let order = self.order;
        let line = self.cache.get(index)?;
        Ok(DirEntry::decode(&line.data()[slot * DIRENT_SIZE..], order))
    }

    pub fn write_dir_entry(&mut self, index: u64, slot: usize, entry: &DirEntry) -> Result<()> {
        let raw = entry.encode(self.order);
        let line = self.cache.get(index)?;
        let at = slot * DIRENT_SIZE;
        line.data_mut()[at..at + DIRENT_SIZE].copy_from_slice(&raw);
        Ok(())
    }

    pub fn free_block(&mut self, index: u64) -> Result<FreeBlock> {
        let order = self.order;
        let line = self.cache.get(index)?;
        Ok(FreeBlock::decode(line.data(), order))
    }

    /// Write a free list block, zeroing the rest of it
    pub fn write_free_block(&mut self, index: u64, list: &FreeBlock) -> Result<()> {
        let raw = list.encode(self.order);
        let line = self.cache.get_empty(index)?;
        line.data_mut()[..raw.len()].copy_from_slice(&raw);
        Ok(())
    }

    pub fn mark_superblock(&mut self) {
        self.superblock_modified = true;
    }

    /// Write dirty cache lines and the superblock
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush_all()?;
        if self.superblock_modified {
            let raw = self.superblock.serialize(self.order);
            let store = &mut self.cache.store;
            if store.volume.writable {
                debug!("Writing superblock");
                store.volume.write_sector(
                    store.partition,
                    (SUPERBLOCK_OFFSET / SECTOR_SIZE as u64) as u32,
                    &raw,
                )?;
                store.writes += 1;
            } else {
                warn!("Read-only filesystem, superblock not written");
            }
            self.superblock_modified = false;
        }
        self.cache.store.volume.flush()
    }

    /// Forget cached blocks and pending superblock changes
    pub fn discard(&mut self) {
        self.cache.discard();
        self.superblock_modified = false;
    }

    pub fn into_volume(self) -> Volume {
        self.cache.into_store().volume
    }
}
