//! Creation of an empty filesystem image.

use log::{debug, info, warn};

use crate::dump::now;
use crate::filesystem::BlockDevice;
use crate::fsck::{build_free_list, CYLSIZE, STEPSIZE};
use crate::structs::*;
use crate::volume::{read_exact_at, write_all_at};
use crate::{Error, Result};

/// Largest accepted cylinder size, in sectors
pub const MAX_CYLINDER: i32 = 1500;
/// Most inodes an i-list may hold
pub const MAX_INODES: u32 = 65500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub order: Endian,
    /// Size of the filesystem in 512-byte sectors
    pub sectors: u32,
    /// Inodes wanted, a quarter of the blocks when absent
    pub inodes: Option<u32>,
    /// Free list gap and cylinder size in sectors
    pub gap: Option<i32>,
    pub cylinder: Option<i32>,
}

impl Params {
    pub fn new(sectors: u32) -> Self {
        Self {
            order: Endian::native(),
            sectors,
            inodes: None,
            gap: None,
            cylinder: None,
        }
    }

    /// Parse "size" or "size:inodes"
    pub fn parse_size(arg: &str) -> Result<(u32, Option<u32>)> {
        let number = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| Error::Aborted(format!("expected numbers, not '{arg}'")))
        };
        match arg.split_once(':') {
            Some((size, inodes)) => Ok((number(size)?, Some(number(inodes)?))),
            None => Ok((number(arg)?, None)),
        }
    }

    /// Free list gap and cylinder size in blocks, as stored in the superblock
    fn spacing(&self, fsize: i32) -> (i32, i32) {
        let (mut gap, mut cyl) = (STEPSIZE, CYLSIZE);
        if let (Some(g), Some(c)) = (self.gap, self.cylinder) {
            cyl = if c <= 0 || c >= MAX_CYLINDER { CYLSIZE } else { c };
            gap = if g <= 0 || g > cyl { STEPSIZE } else { g };
        }
        let per_block = SECTORS_PER_BLOCK as i32;
        let cyl = (cyl / per_block).min(fsize / 4).max(1);
        let gap = (gap + per_block - 1) / per_block;
        (gap, cyl)
    }
}

/// Write a fresh filesystem with an empty root directory onto `device`
pub fn make_filesystem(device: &mut dyn BlockDevice, params: &Params) -> Result<Superblock> {
    let order = params.order;
    let nb = params.sectors / SECTORS_PER_BLOCK;
    let fsize = nb as i32 - 2;
    let mut inode_blocks = params.inodes.unwrap_or(nb / 4) / INODES_PER_BLOCK;
    inode_blocks = inode_blocks.max(1);
    if inode_blocks > MAX_INODES / INODES_PER_BLOCK {
        warn!(
            "Too many inode blocks, {} max",
            MAX_INODES / INODES_PER_BLOCK
        );
        inode_blocks = MAX_INODES / INODES_PER_BLOCK;
    }
    let isize = inode_blocks + 2;
    if isize as i32 >= fsize {
        return Err(Error::Aborted(format!(
            "{fsize}/{inode_blocks}: bad file blocks/inode blks ratio"
        )));
    }

    let (gap, cyl) = params.spacing(fsize);
    let mut sb = Superblock::new(isize as u16, fsize);
    sb.vinfo[0] = gap as i16;
    sb.vinfo[1] = cyl as i16;
    sb.time = now();
    info!("Making a {order} filesystem of {fsize} blocks, {inode_blocks} inode blocks");

    let zero = Block::new(0);
    for blk in 2..isize {
        write_block(device, blk, &zero.data)?;
        sb.tinode += INODES_PER_BLOCK as u16;
    }
    // Give the image its full length
    write_block(device, nb - 1, &zero.data)?;

    let (list, count) = build_free_list(
        isize,
        fsize as u32,
        gap as u32,
        cyl as u32,
        |_| Ok(false),
        |blk, list| {
            let mut block = Block::new(blk as u64);
            block.set_record(0, list, order);
            write_block(device, blk, &block.data)
        },
    )?;
    sb.set_free_cache(&list);
    sb.tfree = count as i32;
    debug!("{count} free blocks, gap {gap} cylinder {cyl}");

    let mut inodes = Block::new(inode_block(1) as u64);
    let time = sb.time;
    let stamp = |mode: u16, nlink: i16| DiskInode {
        mode,
        nlink,
        atime: time,
        mtime: time,
        ctime: time,
        ..Default::default()
    };
    // Inode 1 was the bad block file
    inodes.set_record(inode_slot(1) * INODE_SIZE, &stamp(S_IFREG, 0), order);
    sb.tinode -= 1;

    let dir = alloc(device, &mut sb, order)?;
    let mut block = Block::new(dir as u64);
    for (slot, name) in [".", ".."].into_iter().enumerate() {
        let mut entry = DirEntry {
            ino: ROOT_INODE as u16,
            ..Default::default()
        };
        set_fixed_name(&mut entry.name, name);
        block.set_record(slot * DIRENT_SIZE, &entry, order);
    }
    write_block(device, dir, &block.data)?;

    let mut root = stamp(S_IFDIR | 0o777, 2);
    root.size = 2 * DIRENT_SIZE as i32;
    root.set_block_pointer(0, dir, order);
    inodes.set_record(inode_slot(ROOT_INODE) * INODE_SIZE, &root, order);
    sb.tinode -= 1;
    write_block(device, inodes.index as u32, &inodes.data)?;

    write_all_at(device, SUPERBLOCK_OFFSET, &sb.serialize(order))?;
    device.flush()?;
    Ok(sb)
}

/// Take a block off the free list cached in `sb`
fn alloc(device: &mut dyn BlockDevice, sb: &mut Superblock, order: Endian) -> Result<u32> {
    sb.nfree -= 1;
    let blk = sb
        .free
        .get(sb.nfree.max(0) as usize)
        .copied()
        .unwrap_or_default();
    if blk == 0 || sb.nfree < 0 {
        return Err(Error::Aborted("out of free space".into()));
    }
    sb.tfree -= 1;
    if sb.nfree == 0 {
        let mut raw = vec![0u8; BLOCK_SIZE];
        read_exact_at(device, blk as u64 * BLOCK_SIZE as u64, &mut raw)?;
        sb.set_free_cache(&FreeBlock::decode(&raw, order));
    }
    Ok(blk as u32)
}

fn write_block(device: &mut dyn BlockDevice, blk: u32, data: &[u8]) -> Result<()> {
    write_all_at(device, blk as u64 * BLOCK_SIZE as u64, data)
}
