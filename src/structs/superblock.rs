use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::*;
use crate::{Error, Result};

const FREE_OFFSET: usize = 8;
const INODE_OFFSET: usize = 210;
const VINFO_OFFSET: usize = 418;
const MAGIC_OFFSET: usize = 496;

impl Superblock {
    /// Fresh superblock for a filesystem of `fsize` blocks with an i-list of `isize` blocks
    pub fn new(isize: u16, fsize: i32) -> Self {
        Self {
            isize,
            fsize,
            nfree: 0,
            free: [0; NICFREE],
            ninode: 0,
            inode: [0; NICINOD],
            flock: 0,
            ilock: 0,
            fmod: 0,
            ronly: 0,
            time: 0,
            vinfo: [0; 4],
            tfree: 0,
            tinode: 0,
            fname: [0; 6],
            fpack: [0; 6],
            fill: [0; 52],
            magic: FS_MAGIC,
            fs_type: FS_TYPE_1K,
            fill2: [0; 8],
        }
    }

    /// Parse a superblock, detecting its byte order from the magic
    pub fn parse(bytes: &[u8]) -> Result<(Self, Endian)> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        let len = bytes.len().min(SUPERBLOCK_SIZE);
        raw[..len].copy_from_slice(&bytes[..len]);
        let magic = u32::from_ne_bytes([
            raw[MAGIC_OFFSET],
            raw[MAGIC_OFFSET + 1],
            raw[MAGIC_OFFSET + 2],
            raw[MAGIC_OFFSET + 3],
        ]);
        let order = if magic == FS_MAGIC {
            Endian::native()
        } else if magic.swap_bytes() == FS_MAGIC {
            Endian::native().swapped()
        } else {
            return Err(Error::BadMagic {
                what: "superblock",
                found: magic,
            });
        };
        Ok((Self::decode(&raw, order), order))
    }

    /// Decode a superblock stored in `order` without checking the magic
    pub fn decode(raw: &[u8], order: Endian) -> Self {
        let mut padded = [0u8; SUPERBLOCK_SIZE];
        let len = raw.len().min(SUPERBLOCK_SIZE);
        padded[..len].copy_from_slice(&raw[..len]);
        match order {
            Endian::Big => Self::decode_with::<BigEndian>(&padded),
            Endian::Little => Self::decode_with::<LittleEndian>(&padded),
        }
    }

    /// Serialize into `order`, always [`SUPERBLOCK_SIZE`] bytes
    pub fn serialize(&self, order: Endian) -> Vec<u8> {
        let mut raw = vec![0u8; SUPERBLOCK_SIZE];
        match order {
            Endian::Big => self.encode_with::<BigEndian>(&mut raw),
            Endian::Little => self.encode_with::<LittleEndian>(&mut raw),
        }
        raw
    }

    fn decode_with<B: ByteOrder>(raw: &[u8]) -> Self {
        let mut sb = Self::new(B::read_u16(&raw[0..2]), B::read_i32(&raw[2..6]));
        sb.nfree = B::read_i16(&raw[6..8]);
        for (i, free) in sb.free.iter_mut().enumerate() {
            let at = FREE_OFFSET + 4 * i;
            *free = B::read_i32(&raw[at..at + 4]);
        }
        sb.ninode = B::read_i16(&raw[208..210]);
        for (i, ino) in sb.inode.iter_mut().enumerate() {
            let at = INODE_OFFSET + 2 * i;
            *ino = B::read_u16(&raw[at..at + 2]);
        }
        sb.flock = raw[410];
        sb.ilock = raw[411];
        sb.fmod = raw[412];
        sb.ronly = raw[413];
        sb.time = B::read_i32(&raw[414..418]);
        for (i, v) in sb.vinfo.iter_mut().enumerate() {
            let at = VINFO_OFFSET + 2 * i;
            *v = B::read_i16(&raw[at..at + 2]);
        }
        sb.tfree = B::read_i32(&raw[426..430]);
        sb.tinode = B::read_u16(&raw[430..432]);
        sb.fname.copy_from_slice(&raw[432..438]);
        sb.fpack.copy_from_slice(&raw[438..444]);
        sb.fill.copy_from_slice(&raw[444..496]);
        sb.magic = B::read_u32(&raw[496..500]);
        sb.fs_type = B::read_i32(&raw[500..504]);
        sb.fill2.copy_from_slice(&raw[504..512]);
        sb
    }

    fn encode_with<B: ByteOrder>(&self, raw: &mut [u8]) {
        B::write_u16(&mut raw[0..2], self.isize);
        B::write_i32(&mut raw[2..6], self.fsize);
        B::write_i16(&mut raw[6..8], self.nfree);
        for (i, free) in self.free.iter().enumerate() {
            let at = FREE_OFFSET + 4 * i;
            B::write_i32(&mut raw[at..at + 4], *free);
        }
        B::write_i16(&mut raw[208..210], self.ninode);
        for (i, ino) in self.inode.iter().enumerate() {
            let at = INODE_OFFSET + 2 * i;
            B::write_u16(&mut raw[at..at + 2], *ino);
        }
        raw[410] = self.flock;
        raw[411] = self.ilock;
        raw[412] = self.fmod;
        raw[413] = self.ronly;
        B::write_i32(&mut raw[414..418], self.time);
        for (i, v) in self.vinfo.iter().enumerate() {
            let at = VINFO_OFFSET + 2 * i;
            B::write_i16(&mut raw[at..at + 2], *v);
        }
        B::write_i32(&mut raw[426..430], self.tfree);
        B::write_u16(&mut raw[430..432], self.tinode);
        raw[432..438].copy_from_slice(&self.fname);
        raw[438..444].copy_from_slice(&self.fpack);
        raw[444..496].copy_from_slice(&self.fill);
        B::write_u32(&mut raw[496..500], self.magic);
        B::write_i32(&mut raw[500..504], self.fs_type);
        raw[504..512].copy_from_slice(&self.fill2);
    }

    /// First data block
    pub fn first_data_block(&self) -> u32 {
        self.isize as u32
    }

    /// Number of inodes held by the i-list
    pub fn inode_count(&self) -> u32 {
        (self.isize as u32).saturating_sub(2) * INODES_PER_BLOCK
    }

    /// Whether the filesystem uses 1 KiB blocks
    pub fn is_1k(&self) -> bool {
        self.fs_type == FS_TYPE_1K
    }

    /// The free cache as a free list block
    pub fn free_cache(&self) -> FreeBlock {
        FreeBlock {
            nfree: self.nfree as i32,
            free: self.free,
        }
    }

    pub fn set_free_cache(&mut self, list: &FreeBlock) {
        self.nfree = list.nfree as i16;
        self.free = list.free;
    }

    pub fn name(&self) -> String {
        fixed_name(&self.fname)
    }

    pub fn pack(&self) -> String {
        fixed_name(&self.fpack)
    }
}

impl std::fmt::Display for Superblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Superblock:")?;
        writeln!(f, "  s_isize  {:10}  inode blocks + 2", self.isize)?;
        writeln!(f, "  s_fsize  {:10}  blocks in volume", self.fsize)?;
        writeln!(f, "  s_nfree  {:10}  entries in s_free", self.nfree)?;
        write!(f, "  s_free  ")?;
        for (i, free) in self.free.iter().enumerate() {
            if i > 0 && i % 10 == 0 {
                write!(f, "\n          ")?;
            }
            write!(f, " {free:6}")?;
        }
        writeln!(f)?;
        writeln!(f, "  s_ninode {:10}  entries in s_inode", self.ninode)?;
        write!(f, "  s_inode ")?;
        for (i, ino) in self.inode.iter().enumerate() {
            if i > 0 && i % 10 == 0 {
                write!(f, "\n          ")?;
            }
            write!(f, " {ino:6}")?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "  s_flock {} s_ilock {} s_fmod {} s_ronly {}",
            self.flock, self.ilock, self.fmod, self.ronly
        )?;
        writeln!(f, "  s_time   {:10}", self.time)?;
        writeln!(
            f,
            "  s_vinfo  {} {} {} {}  (gap, cylinder)",
            self.vinfo[0], self.vinfo[1], self.vinfo[2], self.vinfo[3]
        )?;
        writeln!(f, "  s_tfree  {:10}  free blocks", self.tfree)?;
        writeln!(f, "  s_tinode {:10}  free inodes", self.tinode)?;
        writeln!(f, "  s_fname  '{}'", self.name())?;
        writeln!(f, "  s_fpack  '{}'", self.pack())?;
        writeln!(f, "  s_magic  0x{:08x}", self.magic)?;
        write!(
            f,
            "  s_type   {:10}  {}",
            self.fs_type,
            if self.is_1k() { "1K blocks" } else { "512 byte blocks" }
        )
    }
}
