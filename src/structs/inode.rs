use super::*;
use crate::dump::format_time;

/// Largest inode size shown as plausible
pub const PLAUSIBLE_FILE_SIZE: i32 = 2 * 1024 * 1024;

/// Decode a 3-byte block pointer stored in `order`
pub fn unpack_block_pointer(raw: [u8; 3], order: Endian) -> u32 {
    match order {
        Endian::Big => (raw[0] as u32) << 16 | (raw[1] as u32) << 8 | raw[2] as u32,
        Endian::Little => (raw[2] as u32) << 16 | (raw[1] as u32) << 8 | raw[0] as u32,
    }
}

/// Encode the low 24 bits of `value` as a block pointer in `order`
pub fn pack_block_pointer(value: u32, order: Endian) -> [u8; 3] {
    let bytes = [(value >> 16) as u8, (value >> 8) as u8, value as u8];
    match order {
        Endian::Big => bytes,
        Endian::Little => [bytes[2], bytes[1], bytes[0]],
    }
}

/// Block holding inode `ino`
pub fn inode_block(ino: u32) -> u32 {
    (ino + 2 * INODES_PER_BLOCK - 1) / INODES_PER_BLOCK
}

/// Slot of inode `ino` within its block
pub fn inode_slot(ino: u32) -> usize {
    ((ino + 2 * INODES_PER_BLOCK - 1) % INODES_PER_BLOCK) as usize
}

impl DiskInode {
    pub fn file_type(&self) -> u16 {
        self.mode & S_IFMT
    }

    pub fn is_allocated(&self) -> bool {
        self.file_type() != 0
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == S_IFIFO
    }

    /// Block and character devices carry no data blocks
    pub fn is_special(&self) -> bool {
        matches!(self.file_type(), S_IFBLK | S_IFCHR)
    }

    /// Whether the type bits name a known file type
    pub fn has_known_type(&self) -> bool {
        matches!(
            self.file_type(),
            S_IFREG | S_IFDIR | S_IFBLK | S_IFCHR | S_IFIFO
        )
    }

    /// Pointer number `index`, zero when out of range
    pub fn block_pointer(&self, index: usize, order: Endian) -> u32 {
        if index >= NADDR {
            return 0;
        }
        let at = 3 * index;
        unpack_block_pointer([self.addr[at], self.addr[at + 1], self.addr[at + 2]], order)
    }

    pub fn set_block_pointer(&mut self, index: usize, value: u32, order: Endian) {
        if index >= NADDR {
            return;
        }
        let at = 3 * index;
        self.addr[at..at + 3].copy_from_slice(&pack_block_pointer(value, order));
    }

    /// All 13 pointers: direct, then single, double and triple indirect
    pub fn addresses(&self, order: Endian) -> [u32; NADDR] {
        let mut addresses = [0u32; NADDR];
        for (i, a) in addresses.iter_mut().enumerate() {
            *a = self.block_pointer(i, order);
        }
        addresses
    }

    pub fn set_addresses(&mut self, addresses: &[u32], order: Endian) {
        for (i, a) in addresses.iter().take(NADDR).enumerate() {
            self.set_block_pointer(i, *a, order);
        }
    }

    /// Type letter as listed by `ls`
    pub fn type_char(&self) -> char {
        match self.file_type() {
            S_IFDIR => 'd',
            S_IFREG => '-',
            S_IFCHR => 'c',
            S_IFBLK => 'b',
            S_IFIFO => 'p',
            0 => ' ',
            _ => '?',
        }
    }

    /// Render with pointers in `order`
    pub fn describe(&self, ino: u32, order: Endian) -> String {
        let mut out = format!(
            "inode {ino:5}: {}{:04o} links {} uid {} gid {} size {}\n",
            self.type_char(),
            self.mode & 0o7777,
            self.nlink,
            self.uid,
            self.gid,
            self.size
        );
        if !(0..=PLAUSIBLE_FILE_SIZE).contains(&self.size) {
            out.push_str("             implausible size, addresses not shown\n");
            return out;
        }
        out.push_str("             addr");
        for a in self.addresses(order) {
            out.push_str(&format!(" {a}"));
        }
        out.push('\n');
        out.push_str(&format!(
            "             atime {}\n             mtime {}\n             ctime {}\n",
            format_time(self.atime),
            format_time(self.mtime),
            format_time(self.ctime)
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_orders() {
        assert_eq![unpack_block_pointer([0x01, 0x02, 0x03], Endian::Big), 0x010203];
        assert_eq![unpack_block_pointer([0x01, 0x02, 0x03], Endian::Little), 0x030201];
        assert_eq![pack_block_pointer(0x010203, Endian::Big), [0x01, 0x02, 0x03]];
        assert_eq![pack_block_pointer(0x010203, Endian::Little), [0x03, 0x02, 0x01]];
        assert_eq![pack_block_pointer(0xff_ffffff, Endian::Big), [0xff, 0xff, 0xff]];
    }

    #[test]
    fn inode_placement() {
        assert_eq![inode_block(1), 2];
        assert_eq![inode_slot(1), 0];
        assert_eq![inode_block(2), 2];
        assert_eq![inode_slot(2), 1];
        assert_eq![inode_block(16), 2];
        assert_eq![inode_slot(16), 15];
        assert_eq![inode_block(17), 3];
        assert_eq![inode_slot(17), 0];
    }

    #[test]
    fn addresses() {
        let mut inode = DiskInode::default();
        inode.mode = S_IFDIR | 0o755;
        let addresses = [10, 11, 12, 0, 0, 0, 0, 0, 0, 0, 300, 70000, 0];
        inode.set_addresses(&addresses, Endian::Big);
        assert_eq![inode.addresses(Endian::Big), addresses];
        assert_eq![inode.addr[0..3], [0, 0, 10]];
        assert_eq![inode.block_pointer(13, Endian::Big), 0];
        assert![inode.is_dir()];
        assert![inode.is_allocated()];
        assert![inode.has_known_type()];
        assert![!inode.is_special()];
        inode.mode = 0o070000;
        assert![!inode.has_known_type()];
    }
}
