use std::mem::size_of;

use bytemuck::Pod;

use super::*;

/// Largest block number a listing treats as plausible
pub const PLAUSIBLE_BLOCK: i32 = 20000;

/// What a block holds, deciding how it is byte swapped and shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Unknown,
    Super,
    Inode,
    Indirect,
    Directory,
    LinkCount,
    Free,
    Raw,
    VolumeHeader,
    BadBlockTable,
}

impl BlockKind {
    pub const ALL: [BlockKind; 10] = [
        Self::Unknown,
        Self::Super,
        Self::Inode,
        Self::Indirect,
        Self::Directory,
        Self::LinkCount,
        Self::Free,
        Self::Raw,
        Self::VolumeHeader,
        Self::BadBlockTable,
    ];
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Super => "super",
            Self::Inode => "inode",
            Self::Indirect => "index",
            Self::Directory => "dir",
            Self::LinkCount => "linkcnt",
            Self::Free => "free",
            Self::Raw => "raw",
            Self::VolumeHeader => "vhbd",
            Self::BadBlockTable => "bbt",
        };
        f.write_str(name)
    }
}

/// Typed contents of a block in host byte order
#[derive(Debug, Clone, PartialEq)]
pub enum BlockView {
    Unknown(Vec<u8>),
    Raw(Vec<u8>),
    Super(Box<Superblock>),
    Inode(Vec<DiskInode>),
    Indirect(Vec<i32>),
    Directory(Vec<DirEntry>),
    LinkCount(Vec<i16>),
    Free(FreeBlock),
    VolumeHeader(Box<VolumeHeader>),
    BadBlockTable(Vec<BadBlockEntry>),
}

/// Fixed-size record with a known on-disk layout
pub trait DiskRecord: Pod {
    /// Flip every multi-byte field of one record
    fn swap(raw: &mut [u8]);

    /// Read a record stored in `order`; short input is zero padded
    fn decode(raw: &[u8], order: Endian) -> Self {
        let mut buffer = vec![0u8; size_of::<Self>()];
        let len = raw.len().min(buffer.len());
        buffer[..len].copy_from_slice(&raw[..len]);
        if order.needs_swap() {
            Self::swap(&mut buffer);
        }
        bytemuck::pod_read_unaligned(&buffer)
    }

    /// Bytes of this record in `order`
    fn encode(&self, order: Endian) -> Vec<u8> {
        let mut buffer = bytemuck::bytes_of(self).to_vec();
        if order.needs_swap() {
            Self::swap(&mut buffer);
        }
        buffer
    }
}

fn swap16(raw: &mut [u8], at: usize) {
    if let Some(field) = raw.get_mut(at..at + 2) {
        field.reverse();
    }
}

fn swap32(raw: &mut [u8], at: usize) {
    if let Some(field) = raw.get_mut(at..at + 4) {
        field.reverse();
    }
}

impl DiskRecord for DiskInode {
    fn swap(raw: &mut [u8]) {
        for at in [0, 2, 4, 6] {
            swap16(raw, at);
        }
        // addr is a byte array in filesystem order
        for at in [8, 52, 56, 60] {
            swap32(raw, at);
        }
    }
}

impl DiskRecord for DirEntry {
    fn swap(raw: &mut [u8]) {
        swap16(raw, 0);
    }
}

impl DiskRecord for FreeBlock {
    fn swap(raw: &mut [u8]) {
        for at in (0..FREE_BLOCK_SIZE).step_by(4) {
            swap32(raw, at);
        }
    }
}

impl DiskRecord for BadBlockEntry {
    fn swap(raw: &mut [u8]) {
        for at in [0, 2, 4, 6] {
            swap16(raw, at);
        }
    }
}

fn swap_superblock(raw: &mut [u8]) {
    swap16(raw, 0);
    swap32(raw, 2);
    swap16(raw, 6);
    for at in (8..208).step_by(4) {
        swap32(raw, at);
    }
    swap16(raw, 208);
    for at in (210..410).step_by(2) {
        swap16(raw, at);
    }
    swap32(raw, 414);
    for at in (418..426).step_by(2) {
        swap16(raw, at);
    }
    swap32(raw, 426);
    swap16(raw, 430);
    swap32(raw, 496);
    swap32(raw, 500);
}

fn swap_volume_header(raw: &mut [u8]) {
    swap32(raw, 0);
    swap32(raw, 4);
    for at in [14, 16, 18, 20, 24] {
        swap16(raw, at);
    }
    for at in (26..90).step_by(4) {
        swap32(raw, at);
    }
    for slot in 0..RESMAP_SLOTS {
        swap32(raw, 90 + 6 * slot);
        swap16(raw, 94 + 6 * slot);
    }
    swap32(raw, 780);
    for at in [784, 786, 788] {
        swap16(raw, at);
    }
}

fn swap_bad_block_table(raw: &mut [u8]) {
    for entry in raw.chunks_exact_mut(8).take(BAD_BLOCK_ENTRIES) {
        if entry[0] == 0 && entry[1] == 0 {
            break;
        }
        BadBlockEntry::swap(entry);
    }
}

/// Flip every multi-byte field of a block holding `kind`
pub fn swap_in_place(raw: &mut [u8], kind: BlockKind) {
    let end = raw.len().min(BLOCK_SIZE);
    match kind {
        BlockKind::Unknown | BlockKind::Raw => {}
        BlockKind::Super => swap_superblock(raw),
        BlockKind::Inode => raw[..end]
            .chunks_mut(INODE_SIZE)
            .for_each(DiskInode::swap),
        BlockKind::Indirect => raw[..end].chunks_exact_mut(4).for_each(|w| w.reverse()),
        BlockKind::Directory => raw[..end]
            .chunks_mut(DIRENT_SIZE)
            .for_each(DirEntry::swap),
        BlockKind::LinkCount => raw[..end].chunks_exact_mut(2).for_each(|w| w.reverse()),
        BlockKind::Free => FreeBlock::swap(raw),
        BlockKind::VolumeHeader => swap_volume_header(raw),
        BlockKind::BadBlockTable => swap_bad_block_table(raw),
    }
}

fn records<T: DiskRecord>(raw: &[u8], count: usize) -> Vec<T> {
    (0..count)
        .map(|i| T::decode(raw.get(i * size_of::<T>()..).unwrap_or_default(), Endian::native()))
        .collect()
}

/// Decode a block already in host byte order
pub fn decode_view(raw: &[u8], kind: BlockKind) -> BlockView {
    let native = Endian::native();
    match kind {
        BlockKind::Unknown => BlockView::Unknown(raw.to_vec()),
        BlockKind::Raw => BlockView::Raw(raw.to_vec()),
        BlockKind::Super => BlockView::Super(Box::new(Superblock::decode(raw, native))),
        BlockKind::Inode => BlockView::Inode(records(raw, INODES_PER_BLOCK as usize)),
        BlockKind::Indirect => BlockView::Indirect(
            (0..POINTERS_PER_INDIRECT)
                .map(|i| word(raw, 4 * i, |b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]])))
                .collect(),
        ),
        BlockKind::Directory => BlockView::Directory(records(raw, DIRENTS_PER_BLOCK)),
        BlockKind::LinkCount => BlockView::LinkCount(
            (0..LINKS_PER_BLOCK)
                .map(|i| word(raw, 2 * i, |b| i16::from_ne_bytes([b[0], b[1]])))
                .collect(),
        ),
        BlockKind::Free => BlockView::Free(FreeBlock::decode(raw, native)),
        BlockKind::VolumeHeader => {
            BlockView::VolumeHeader(Box::new(VolumeHeader::decode(raw, native)))
        }
        BlockKind::BadBlockTable => BlockView::BadBlockTable(records(raw, BAD_BLOCK_ENTRIES)),
    }
}

fn word<T: Default>(raw: &[u8], at: usize, read: impl Fn(&[u8]) -> T) -> T {
    let width = size_of::<T>();
    raw.get(at..at + width).map(read).unwrap_or_default()
}

impl BlockView {
    /// Render the view, reading inode pointers in `order`
    pub fn describe(&self, order: Endian) -> String {
        let mut out = String::new();
        match self {
            Self::Unknown(raw) | Self::Raw(raw) => {
                let mut text = Vec::new();
                if crate::dump::hexdump(&mut text, raw, crate::dump::DEFAULT_WIDTH, 0).is_ok() {
                    out.push_str(&String::from_utf8_lossy(&text));
                }
            }
            Self::Super(sb) => out.push_str(&format!("{sb}\n")),
            Self::Inode(inodes) => {
                for (slot, inode) in inodes.iter().enumerate() {
                    out.push_str(&format!("[{slot:2}] "));
                    out.push_str(&inode.describe(slot as u32, order));
                }
            }
            Self::Indirect(pointers) => {
                out.push_str("Indirect block:\n");
                list_blocks(&mut out, pointers);
            }
            Self::Directory(entries) => {
                out.push_str("Directory:\n");
                for entry in entries.iter().filter(|e| e.ino != 0) {
                    out.push_str(&format!("  {:5} {}\n", entry.ino, fixed_name(&entry.name)));
                }
            }
            Self::LinkCount(counts) => {
                out.push_str("Link counts:\n");
                for (i, count) in counts.iter().enumerate().filter(|(_, c)| **c != 0) {
                    out.push_str(&format!("  {i:5} {count}\n"));
                }
            }
            Self::Free(list) => {
                out.push_str(&format!("Free list block: nfree {}\n", list.nfree));
                let count = (list.nfree.max(0) as usize).min(NICFREE);
                list_blocks(&mut out, &list.free[..count]);
            }
            Self::VolumeHeader(header) => {
                out.push_str(&format!(
                    "Volume '{}' cyls {} heads {} psectrk {} pseccyl {} sectorsz {}\n",
                    header.name(),
                    header.cyls,
                    header.heads,
                    header.psectrk,
                    header.pseccyl,
                    header.sectorsz
                ));
            }
            Self::BadBlockTable(entries) => {
                out.push_str("Bad block table:\n");
                for (i, e) in entries.iter().enumerate() {
                    if e.cyl == 0 {
                        break;
                    }
                    out.push_str(&format!(
                        "  [{i:2}] cyl {:5} badblk {:5} altblk {:5} nxtind {:3}\n",
                        e.cyl, e.badblk, e.altblk, e.nxtind
                    ));
                }
            }
        }
        out
    }
}

fn list_blocks(out: &mut String, pointers: &[i32]) {
    for (i, p) in pointers.iter().enumerate() {
        if !(0..=PLAUSIBLE_BLOCK).contains(p) {
            out.push_str(&format!("\n  implausible block {p} at {i}, stopping"));
            break;
        }
        if i % 10 == 0 {
            out.push_str("\n ");
        }
        out.push_str(&format!(" {p:6}"));
    }
    out.push('\n');
}

impl std::fmt::Display for BlockView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe(Endian::native()))
    }
}

impl AsBitmap for Block {}

impl Block {
    /// Zero-filled block
    pub fn new(index: u64) -> Self {
        Self {
            index,
            data: vec![0; BLOCK_SIZE],
        }
    }

    /// Read a record at byte `position`
    pub fn record<T: DiskRecord>(&self, position: usize, order: Endian) -> T {
        T::decode(self.data.get(position..).unwrap_or_default(), order)
    }

    /// Write a record at byte `position`, dropping whatever exceeds the block
    pub fn set_record<T: DiskRecord>(&mut self, position: usize, record: &T, order: Endian) {
        let raw = record.encode(order);
        if position >= self.data.len() {
            return;
        }
        let end = (position + raw.len()).min(self.data.len());
        self.data[position..end].copy_from_slice(&raw[..end - position]);
    }

    /// Host-order view of the block as `kind`
    pub fn view(&self, kind: BlockKind, order: Endian) -> BlockView {
        let mut raw = self.data.clone();
        if order.needs_swap() {
            swap_in_place(&mut raw, kind);
        }
        decode_view(&raw, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_is_an_involution() {
        let raw: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 7 + 3) as u8).collect();
        for kind in BlockKind::ALL {
            let mut swapped = raw.clone();
            swap_in_place(&mut swapped, kind);
            swap_in_place(&mut swapped, kind);
            assert_eq![swapped, raw, "{kind:?}"];
        }
    }

    #[test]
    fn swap_tolerates_short_buffers() {
        for kind in BlockKind::ALL {
            for len in [0, 1, 3, 7, 63, 205, 511] {
                let mut raw = vec![0xa5u8; len];
                swap_in_place(&mut raw, kind);
            }
        }
    }

    #[test]
    fn raw_kinds_are_untouched() {
        let raw: Vec<u8> = (0..BLOCK_SIZE).map(|i| i as u8).collect();
        for kind in [BlockKind::Raw, BlockKind::Unknown] {
            let mut copy = raw.clone();
            swap_in_place(&mut copy, kind);
            assert_eq![copy, raw];
        }
    }

    #[test]
    fn header_swap_matches_codec() {
        let header = super::super::header::tests::sample();
        let mut raw = header.serialize(Endian::Big);
        swap_in_place(&mut raw, BlockKind::VolumeHeader);
        assert_eq![raw, header.serialize(Endian::Little)];
    }

    #[test]
    fn superblock_swap_matches_codec() {
        let mut sb = Superblock::new(10, 500);
        sb.nfree = 2;
        sb.free[1] = 499;
        sb.inode[99] = 0x1234;
        sb.vinfo = [4, 200, 1, 2];
        sb.tinode = 77;
        let mut raw = sb.serialize(Endian::Big);
        swap_in_place(&mut raw, BlockKind::Super);
        assert_eq![raw, sb.serialize(Endian::Little)];
    }

    #[test]
    fn records_follow_order() {
        let mut block = Block::new(5);
        let entry = DirEntry {
            ino: 0x0102,
            name: *b"lost+found\0\0\0\0",
        };
        block.set_record(32, &entry, Endian::Big);
        assert_eq![block.data[32..34], [0x01, 0x02]];
        assert_eq![block.record::<DirEntry>(32, Endian::Big), entry];
        block.set_record(BLOCK_SIZE - 8, &entry, Endian::Big);
        assert_eq![block.data[BLOCK_SIZE - 8..BLOCK_SIZE - 6], [0x01, 0x02]];
    }

    #[test]
    fn bad_block_table_swap_stops_at_end() {
        let mut raw = vec![0u8; BAD_BLOCK_TABLE_SIZE];
        raw[0..2].copy_from_slice(&[0x12, 0x34]);
        raw[8..10].copy_from_slice(&[0x00, 0x03]);
        raw[10..12].copy_from_slice(&[0x00, 0x14]);
        raw[24..26].copy_from_slice(&[0x00, 0x07]);
        swap_in_place(&mut raw, BlockKind::BadBlockTable);
        assert_eq![raw[0..2], [0x34, 0x12]];
        assert_eq![raw[8..12], [0x03, 0x00, 0x14, 0x00]];
        assert_eq![raw[24..26], [0x00, 0x07]];
    }

    #[test]
    fn view_decodes_foreign_order() {
        let mut block = Block::new(9);
        let foreign = Endian::native().swapped();
        let list = FreeBlock {
            nfree: 2,
            free: {
                let mut free = [0; NICFREE];
                free[1] = 123;
                free
            },
        };
        block.set_record(0, &list, foreign);
        match block.view(BlockKind::Free, foreign) {
            BlockView::Free(decoded) => assert_eq![decoded, list],
            other => panic!("unexpected {other:?}"),
        }
        assert![block.view(BlockKind::Free, foreign).describe(foreign).contains("123")];
    }
}
