mod bitmap;
mod block;
mod header;
mod inode;
mod superblock;

use std::marker::PhantomData;

use bytemuck::{Pod, Zeroable};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub use block::*;
pub use header::*;
pub use inode::*;

/// Filesystem block size in bytes
pub const BLOCK_SIZE: usize = 1024;
/// Physical sector size assumed for import, export and transfer
pub const SECTOR_SIZE: usize = 512;
/// Sectors per filesystem block
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / SECTOR_SIZE) as u32;

pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;
pub const POINTERS_PER_INDIRECT: usize = BLOCK_SIZE / 4;
pub const ADDR_BYTES: usize = 40;
/// Block pointers held by one inode
pub const NADDR: usize = 13;
/// Direct pointers among [`NADDR`]
pub const NDADDR: usize = 10;
pub const DIRSIZ: usize = 14;
pub const DIRENT_SIZE: usize = 16;
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;
pub const LINKS_PER_BLOCK: usize = BLOCK_SIZE / 2;
pub const NICFREE: usize = 50;
pub const NICINOD: usize = 100;
pub const FREE_BLOCK_SIZE: usize = 4 + 4 * NICFREE;
pub const ROOT_INODE: u32 = 2;

pub const SUPERBLOCK_OFFSET: u64 = 512;
pub const SUPERBLOCK_SIZE: usize = 512;
pub const FS_MAGIC: u32 = 0xfd18_7e20;
/// `s_type` of a filesystem with 512-byte blocks
pub const FS_TYPE_512: i32 = 1;
/// `s_type` of a filesystem with 1024-byte blocks
pub const FS_TYPE_1K: i32 = 2;

pub const VOLUME_MAGIC: u32 = 0x5551_5651;
pub const VOLUME_HEADER_SIZE: usize = 790;
/// Bytes read and written for the home block
pub const VOLUME_HEADER_AREA: usize = 1024;
pub const MAX_SLICES: usize = 16;
pub const RESMAP_SLOTS: usize = 8;
pub const MOUNT_NAME_SIZE: usize = 40;

pub const BAD_BLOCK_ENTRIES: usize = 512 / 8;
pub const BAD_BLOCK_TABLE_SIZE: usize = 1024;
/// `cyl` and `badblk` of entry 0 when remapping is disabled
pub const NO_BAD_BLOCK_CHECKSUM: u16 = 0xffff;

pub const FLOPPY_NAME: &[u8; 6] = b"Floppy";

pub const LOADER_PARTITION: usize = 0;
pub const PAGING_PARTITION: usize = 1;
pub const FLOPPY_FS_PARTITION: usize = 1;
pub const DISK_FS_PARTITION: usize = 2;

pub const RES_LOADER: usize = 0;
pub const RES_BAD_BLOCK_TABLE: usize = 1;
pub const RES_DUMP: usize = 2;
pub const RES_DOWNLOAD: usize = 3;
pub const RES_BOOT: usize = 4;

pub const FLAG_FP_DENSITY: u8 = 0x01;
pub const FLAG_FP_MIXED_DENSITY: u8 = 0x02;
pub const FLAG_HITECH: u8 = 0x04;
pub const FLAG_NEW_PARTITION_TABLE: u8 = 0x08;

pub const S_IFMT: u16 = 0o170000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFIFO: u16 = 0o010000;

/// Byte order of an on-disk structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    pub const fn swapped(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }

    /// Whether data in this order has to be flipped on this host
    pub fn needs_swap(self) -> bool {
        self != Self::native()
    }

    /// Indirect block pointer stored in this order
    pub fn read_i32(self, raw: &[u8]) -> i32 {
        match self {
            Self::Big => BigEndian::read_i32(raw),
            Self::Little => LittleEndian::read_i32(raw),
        }
    }

    pub fn write_i32(self, raw: &mut [u8], value: i32) {
        match self {
            Self::Big => BigEndian::write_i32(raw, value),
            Self::Little => LittleEndian::write_i32(raw, value),
        }
    }

    /// Parse `-be` / `-le` style arguments
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-be" | "be" | "big" => Some(Self::Big),
            "-le" | "le" | "little" => Some(Self::Little),
            _ => None,
        }
    }
}

impl std::fmt::Display for Endian {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Little => write!(f, "little-endian"),
            Self::Big => write!(f, "big-endian"),
        }
    }
}

/// Marker for things tracked by a [`Bitmap`]
pub trait AsBitmap {}

/// Raw filesystem block in disk byte order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block's index within the filesystem
    pub index: u64,
    /// Raw data as bytes
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Bitmap<T: AsBitmap> {
    /// Bits mapping to indexes
    pub bitfield: Vec<usize>,
    /// Number of valid indexes
    pub count: u64,
    #[doc(hidden)]
    __type: PhantomData<T>,
}

/// One cell of the bad block table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BadBlockEntry {
    /// Cylinder holding the bad sector
    pub cyl: u16,
    /// Physical sector of the bad sector within `cyl`
    pub badblk: u16,
    /// Track whose spare sector replaces it
    pub altblk: u16,
    /// Next cell on the same cylinder
    pub nxtind: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DiskInode {
    pub mode: u16,
    pub nlink: i16,
    pub uid: u16,
    pub gid: u16,
    pub size: i32,
    /// 13 packed 3-byte block pointers
    pub addr: [u8; ADDR_BYTES],
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct DirEntry {
    pub ino: u16,
    pub name: [u8; DIRSIZ],
}

/// Free list chain block, also the layout of the superblock's free cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct FreeBlock {
    pub nfree: i32,
    pub free: [i32; NICFREE],
}

impl Default for DiskInode {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Default for FreeBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// One partition slice, in tracks, with its derived sector positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Partition {
    pub start_track: u32,
    pub tracks: u32,
    /// Physical sectors in the slice
    pub pblks: u32,
    /// Logical sectors in the slice
    pub lblks: u32,
    /// First physical sector
    pub partpba: u32,
    /// First logical sector
    pub partlba: u32,
    /// Byte offset of the first sector
    pub partoff: u64,
}

/// A reserved area of partition 0, in 1 KiB logical blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservedArea {
    pub blkstart: i32,
    pub nblocks: u16,
}

/// Volume home block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub magic: u32,
    pub chksum: i32,
    pub name: [u8; 6],
    pub cyls: u16,
    pub heads: u16,
    pub psectrk: u16,
    pub pseccyl: u16,
    pub flags: u8,
    pub step: u8,
    pub sectorsz: u16,
    /// Start track per slice
    pub partab: [u32; MAX_SLICES],
    pub resmap: [ReservedArea; RESMAP_SLOTS],
    pub fpulled: u8,
    pub pad: u8,
    pub mntname: [[u8; MOUNT_NAME_SIZE]; MAX_SLICES],
    pub time: i32,
    pub cpio_magic: i16,
    pub set_magic: i16,
    pub cpio_vol: i16,
}

/// Filesystem super block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Size of the i-list in blocks, counting boot and super blocks
    pub isize: u16,
    /// Size of the filesystem in blocks
    pub fsize: i32,
    pub nfree: i16,
    pub free: [i32; NICFREE],
    pub ninode: i16,
    pub inode: [u16; NICINOD],
    pub flock: u8,
    pub ilock: u8,
    pub fmod: u8,
    pub ronly: u8,
    pub time: i32,
    /// Free list gap and cylinder size
    pub vinfo: [i16; 4],
    pub tfree: i32,
    pub tinode: u16,
    pub fname: [u8; 6],
    pub fpack: [u8; 6],
    pub(crate) fill: [u8; 52],
    pub magic: u32,
    pub fs_type: i32,
    pub(crate) fill2: [u8; 8],
}

/// Render a fixed-size, NUL padded name
pub fn fixed_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Copy `name` into a fixed-size NUL padded field, truncating if needed
pub fn set_fixed_name(raw: &mut [u8], name: &str) {
    raw.fill(0);
    let bytes = name.as_bytes();
    let len = bytes.len().min(raw.len());
    raw[..len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes() {
        assert_eq![std::mem::size_of::<DiskInode>(), INODE_SIZE];
        assert_eq![std::mem::size_of::<DirEntry>(), DIRENT_SIZE];
        assert_eq![std::mem::size_of::<FreeBlock>(), FREE_BLOCK_SIZE];
        assert_eq![std::mem::size_of::<BadBlockEntry>(), 8];
    }

    #[test]
    fn fixed_names() {
        let mut raw = [0u8; 6];
        set_fixed_name(&mut raw, "WINCHESTER");
        assert_eq![&raw, b"WINCHE"];
        assert_eq![fixed_name(&raw), "WINCHE"];
        set_fixed_name(&mut raw, "/");
        assert_eq![fixed_name(&raw), "/"];
    }

    #[test]
    fn endian_flags() {
        assert_eq![Endian::from_flag("-be"), Some(Endian::Big)];
        assert_eq![Endian::from_flag("-le"), Some(Endian::Little)];
        assert_eq![Endian::from_flag("-x"), None];
        assert![!Endian::native().needs_swap()];
        assert![Endian::native().swapped().needs_swap()];
    }
}
