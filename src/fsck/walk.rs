//! Traversal of an inode's blocks and of directory entries.

use std::ops::BitOr;

use super::{Checker, InodeState};
use crate::structs::*;
use crate::Result;

/// Outcome of visiting a block or a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow(u8);

impl Flow {
    pub const STOP: Flow = Flow(1);
    pub const SKIP: Flow = Flow(2);
    pub const KEEPON: Flow = Flow(4);
    /// The entry was changed and has to be written back
    pub const ALTERED: Flow = Flow(8);

    pub fn contains(self, other: Flow) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Flow {
    type Output = Flow;

    fn bitor(self, rhs: Flow) -> Flow {
        Flow(self.0 | rhs.0)
    }
}

/// Work done on every block address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPass {
    Pass1,
    Pass1b,
    Pass4,
}

/// Work done on every directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPass {
    Pass2,
    /// Look up a name, leaving its inode in `parentdir`
    FindIno(&'static str),
    /// Enter `orphan` into the first free slot
    MakeEntry,
    /// Point ".." at lost+found
    ChangeDotDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Addr(BlockPass),
    Data(DirPass),
    /// Validate directory blocks
    Check,
}

/// Name stored in an entry, up to its first NUL
pub(crate) fn entry_name(entry: &DirEntry) -> &[u8] {
    let end = entry
        .name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(DIRSIZ);
    &entry.name[..end]
}

impl Checker<'_> {
    /// Visit every block of an inode; device inodes have none
    pub(crate) fn ckinode(&mut self, dp: &DiskInode, walk: Walk) -> Result<Flow> {
        if dp.is_special() {
            return Ok(Flow::KEEPON);
        }
        let addrs = dp.addresses(self.order);
        for (i, &blk) in addrs[..NDADDR].iter().enumerate() {
            if blk == 0 {
                continue;
            }
            let ret = self.visit(walk, blk, i == 0)?;
            if ret.contains(Flow::STOP) && walk != Walk::Check {
                return Ok(ret);
            }
        }
        for (level, &blk) in addrs[NDADDR..].iter().enumerate() {
            if blk == 0 {
                continue;
            }
            let ret = self.indirect(blk, level as u32 + 1, walk)?;
            if ret.contains(Flow::STOP) && walk != Walk::Check {
                return Ok(ret);
            }
        }
        Ok(Flow::KEEPON)
    }

    fn indirect(&mut self, blk: u32, level: u32, walk: Walk) -> Result<Flow> {
        if let Walk::Addr(pass) = walk {
            let ret = self.block_pass(pass, blk)?;
            if !ret.contains(Flow::KEEPON) {
                return Ok(ret);
            }
        }
        if self.out_of_range(blk) {
            return Ok(Flow::SKIP);
        }
        let Some(block) = self.read_block(blk)? else {
            return Ok(Flow::SKIP);
        };
        let order = self.order;
        let pointers: Vec<u32> = block
            .data
            .chunks_exact(4)
            .map(|raw| order.read_i32(raw) as u32)
            .collect();
        for blk in pointers {
            if blk == 0 {
                continue;
            }
            let ret = if level > 1 {
                self.indirect(blk, level - 1, walk)?
            } else {
                self.visit(walk, blk, false)?
            };
            if ret.contains(Flow::STOP) && walk != Walk::Check {
                return Ok(ret);
            }
        }
        Ok(Flow::KEEPON)
    }

    fn visit(&mut self, walk: Walk, blk: u32, first: bool) -> Result<Flow> {
        match walk {
            Walk::Addr(pass) => self.block_pass(pass, blk),
            Walk::Data(pass) => self.dirscan(blk, pass),
            Walk::Check => self.check_dir_block(blk, first),
        }
    }

    fn block_pass(&mut self, pass: BlockPass, blk: u32) -> Result<Flow> {
        match pass {
            BlockPass::Pass1 => self.pass1_block(blk),
            BlockPass::Pass1b => self.pass1b_block(blk),
            BlockPass::Pass4 => self.pass4_block(blk),
        }
    }

    /// Run `pass` over the entries of a directory block while `filsize` lasts
    fn dirscan(&mut self, blk: u32, pass: DirPass) -> Result<Flow> {
        if self.out_of_range(blk) {
            self.filsize -= BLOCK_SIZE as i64;
            return Ok(Flow::SKIP);
        }
        for slot in 0..DIRENTS_PER_BLOCK {
            if self.filsize <= 0 {
                break;
            }
            let mut entry = match self.fs.dir_entry(blk as u64, slot) {
                Ok(entry) => entry,
                Err(e) if super::is_device_error(&e) => {
                    self.read_failed("READ", blk)?;
                    self.filsize -= ((DIRENTS_PER_BLOCK - slot) * DIRENT_SIZE) as i64;
                    return Ok(Flow::SKIP);
                }
                Err(e) => return Err(e),
            };
            let ret = match pass {
                DirPass::Pass2 => self.pass2_entry(&mut entry)?,
                DirPass::FindIno(name) => self.find_ino(&entry, name),
                DirPass::MakeEntry => self.make_entry(&mut entry),
                DirPass::ChangeDotDot => self.change_dotdot(&mut entry),
            };
            if ret.contains(Flow::ALTERED) {
                self.fs.write_dir_entry(blk as u64, slot, &entry)?;
            }
            if ret.contains(Flow::STOP) {
                return Ok(ret);
            }
            self.filsize -= DIRENT_SIZE as i64;
        }
        Ok(if self.filsize > 0 {
            Flow::KEEPON
        } else {
            Flow::STOP
        })
    }

    /// Sanity of the names in one directory block, and of "." and ".." in the first
    fn check_dir_block(&mut self, blk: u32, first: bool) -> Result<Flow> {
        if self.out_of_range(blk) {
            return Ok(Flow::SKIP);
        }
        let Some(block) = self.read_block(blk)? else {
            return Ok(Flow::SKIP);
        };
        let mut baddir = 0;
        let mut dotcnt = 0;
        for slot in 0..DIRENTS_PER_BLOCK {
            let entry: DirEntry = block.record(slot * DIRENT_SIZE, self.order);
            let name = entry_name(&entry);
            if first && (name == b"." || name == b"..") {
                dotcnt += 1;
                if name == b"." && entry.ino as u32 != self.inum {
                    writeln!(self.out, "NO VALID '.' in DIR I = {}", self.inum)?;
                    baddir += 1;
                } else if name == b".." && entry.ino == 0 {
                    writeln!(self.out, "NO VALID '..' in DIR I = {}", self.inum)?;
                    baddir += 1;
                }
                continue;
            }
            let garbage_after_nul = entry.name[name.len()..].iter().any(|&c| c != 0);
            let nameless = name.is_empty() && entry.ino != 0;
            if garbage_after_nul || nameless || name.contains(&b'/') {
                baddir += 1;
            }
        }
        let complaint = if first && dotcnt < 2 {
            "MISSING '.' or '..' in DIR"
        } else if baddir > 0 {
            "BAD DIR ENTRY"
        } else {
            return Ok(Flow::KEEPON);
        };
        writeln!(self.out, "{complaint} I = {}", self.inum)?;
        write!(self.out, "BLK {blk} ")?;
        self.pinode()?;
        writeln!(self.out, "\nDIR={}\n", self.path_string())?;
        Ok(Flow::STOP)
    }

    fn find_ino(&mut self, entry: &DirEntry, name: &str) -> Flow {
        if entry.ino == 0 {
            return Flow::KEEPON;
        }
        if entry_name(entry) == name.as_bytes() {
            let ino = entry.ino as u32;
            if (ROOT_INODE..=self.imax).contains(&ino) {
                self.parentdir = ino;
            }
            return Flow::STOP;
        }
        Flow::KEEPON
    }

    fn make_entry(&mut self, entry: &mut DirEntry) -> Flow {
        if entry.ino != 0 {
            return Flow::KEEPON;
        }
        entry.ino = self.orphan as u16;
        set_fixed_name(&mut entry.name, &format!("{:06}", self.orphan % 1_000_000));
        Flow::ALTERED | Flow::STOP
    }

    fn change_dotdot(&mut self, entry: &mut DirEntry) -> Flow {
        if entry_name(entry) != b".." {
            return Flow::KEEPON;
        }
        entry.ino = self.lfdir as u16;
        Flow::ALTERED | Flow::STOP
    }

    /// Count one more reference to the current inode
    pub(crate) fn count_reference(&mut self) -> Result<()> {
        self.tables.decrement_link_count(self.inum)
    }

    pub(crate) fn is_directory_state(&mut self, ino: u32) -> Result<bool> {
        Ok(self.tables.state(ino)? == InodeState::Directory)
    }
}
