use std::fmt::Debug;
use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, trace};

use crate::{Error, Result};

/// Storage addressed in fixed-size blocks
pub trait BackingStore: Debug {
    fn load_block(&mut self, index: u64, buf: &mut [u8]) -> Result<()>;
    fn store_block(&mut self, index: u64, buf: &[u8]) -> Result<()>;
}

fn load_seekable<T: Read + Seek>(store: &mut T, index: u64, buf: &mut [u8]) -> Result<()> {
    let offset = index * buf.len() as u64;
    store
        .seek(SeekFrom::Start(offset))
        .map_err(|source| Error::Seek { offset, source })?;
    let mut got = 0;
    while got < buf.len() {
        match store.read(&mut buf[got..])? {
            0 => break,
            n => got += n,
        }
    }
    // Blocks past the end of a sparse store read as zeros
    buf[got..].fill(0);
    Ok(())
}

fn store_seekable<T: Write + Seek>(store: &mut T, index: u64, buf: &[u8]) -> Result<()> {
    let offset = index * buf.len() as u64;
    store
        .seek(SeekFrom::Start(offset))
        .map_err(|source| Error::Seek { offset, source })?;
    store.write_all(buf)?;
    Ok(())
}

impl BackingStore for std::fs::File {
    fn load_block(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        load_seekable(self, index, buf)
    }

    fn store_block(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        store_seekable(self, index, buf)
    }
}

impl BackingStore for std::io::Cursor<Vec<u8>> {
    fn load_block(&mut self, index: u64, buf: &mut [u8]) -> Result<()> {
        load_seekable(self, index, buf)
    }

    fn store_block(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        store_seekable(self, index, buf)
    }
}

#[derive(Debug)]
pub struct CacheLine {
    pub(crate) index: u64,
    pub(crate) data: Vec<u8>,
    pub(crate) modified: bool,
}

impl CacheLine {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access, marking the line dirty
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.modified = true;
        &mut self.data
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Fixed capacity write-back cache, most recently used line first
#[derive(Debug)]
pub struct BlockCache<S: BackingStore> {
    pub(crate) store: S,
    lines: Vec<CacheLine>,
    capacity: usize,
    block_size: usize,
}

impl<S: BackingStore> BlockCache<S> {
    pub fn new(store: S, capacity: usize, block_size: usize) -> Self {
        Self {
            store,
            lines: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Line holding `index`, loading it and evicting the least recently used line if needed
    pub fn get(&mut self, index: u64) -> Result<&mut CacheLine> {
        if let Some(pos) = self.lines.iter().position(|l| l.index == index) {
            if pos != 0 {
                let line = self.lines.remove(pos);
                self.lines.insert(0, line);
            }
            return Ok(&mut self.lines[0]);
        }
        if self.lines.len() >= self.capacity {
            if let Some(mut victim) = self.lines.pop() {
                trace!("Evict block {}", victim.index);
                self.write_back(&mut victim)?;
            }
        }
        let mut data = vec![0u8; self.block_size];
        self.store.load_block(index, &mut data)?;
        self.lines.insert(
            0,
            CacheLine {
                index,
                data,
                modified: false,
            },
        );
        Ok(&mut self.lines[0])
    }

    /// Line for `index` with zeroed contents, skipping the read
    pub fn get_empty(&mut self, index: u64) -> Result<&mut CacheLine> {
        if let Some(pos) = self.lines.iter().position(|l| l.index == index) {
            let mut line = self.lines.remove(pos);
            line.data.fill(0);
            line.modified = true;
            self.lines.insert(0, line);
            return Ok(&mut self.lines[0]);
        }
        if self.lines.len() >= self.capacity {
            if let Some(mut victim) = self.lines.pop() {
                self.write_back(&mut victim)?;
            }
        }
        self.lines.insert(
            0,
            CacheLine {
                index,
                data: vec![0u8; self.block_size],
                modified: true,
            },
        );
        Ok(&mut self.lines[0])
    }

    fn write_back(&mut self, line: &mut CacheLine) -> Result<()> {
        if line.modified {
            self.store.store_block(line.index, &line.data)?;
            line.modified = false;
        }
        Ok(())
    }

    /// Write every dirty line to the store
    pub fn flush_all(&mut self) -> Result<()> {
        let dirty = self.lines.iter().filter(|l| l.modified).count();
        if dirty > 0 {
            debug!("Flushing {dirty} cached blocks");
        }
        for line in self.lines.iter_mut().filter(|l| l.modified) {
            self.store.store_block(line.index, &line.data)?;
            line.modified = false;
        }
        Ok(())
    }

    /// Drop every line without writing it back
    pub fn discard(&mut self) {
        self.lines.clear();
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn load_and_flush() {
        let mut cache = BlockCache::new(Cursor::new(vec![0u8; 64]), 2, 16);
        cache.get(1).unwrap().data_mut()[0] = 7;
        assert_eq![cache.store.get_ref()[16], 0];
        cache.flush_all().unwrap();
        assert_eq![cache.store.get_ref()[16], 7];
        assert![!cache.get(1).unwrap().is_modified()];
    }

    #[test]
    fn eviction_writes_back_least_recent() {
        let mut cache = BlockCache::new(Cursor::new(vec![0u8; 64]), 2, 16);
        cache.get(0).unwrap().data_mut()[0] = 1;
        cache.get(1).unwrap().data_mut()[0] = 2;
        // Touching 0 makes 1 the eviction victim
        cache.get(0).unwrap();
        cache.get(2).unwrap();
        assert_eq![cache.store.get_ref()[16], 2];
        assert_eq![cache.store.get_ref()[0], 0];
        cache.flush_all().unwrap();
        assert_eq![cache.store.get_ref()[0], 1];
    }

    #[test]
    fn reads_past_end_are_zero() {
        let mut cache = BlockCache::new(Cursor::new(vec![9u8; 20]), 4, 16);
        let line = cache.get(1).unwrap();
        assert_eq![line.data()[..4], [9, 9, 9, 9]];
        assert_eq![line.data()[4..], [0u8; 12]];
        cache.get_empty(0).unwrap();
        cache.flush_all().unwrap();
        assert_eq![cache.store.get_ref()[..16], [0u8; 16]];
    }
}
