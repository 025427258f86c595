use std::io::Write;

use super::walk::entry_name;
use super::{Checker, DirPass, Flow, InodeState, Walk, EMPT, MAXPATH};
use crate::structs::*;
use crate::{Error, Result};

/// Whether a directory holds anything besides "." and ".."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Emptiness {
    Empty,
    NotEmpty,
    /// Its blocks could not be looked at
    Unknown,
}

impl Checker<'_> {
    /// Walk the tree from the root, counting references
    pub(crate) fn pass2(&mut self) -> Result<()> {
        writeln!(self.out, "** Phase 2 - Check Pathnames")?;
        self.inum = ROOT_INODE;
        self.path.clear();
        self.thisname = 0;
        match self.tables.state(ROOT_INODE)? {
            InodeState::Unallocated => {
                writeln!(self.out, "ROOT INODE UNALLOCATED. TERMINATING.")?;
                return Err(Error::Aborted("root inode unallocated".into()));
            }
            InodeState::File => {
                write!(self.out, "ROOT INODE NOT DIRECTORY")?;
                if !self.reply("FIX")? {
                    return Err(self.abort("root inode not a directory"));
                }
                let Some(mut dp) = self.ginode()? else {
                    return Err(self.abort("root inode unreadable"));
                };
                dp.mode = (dp.mode & !S_IFMT) | S_IFDIR;
                self.put_inode(ROOT_INODE, &dp)?;
                self.tables.set_state(ROOT_INODE, InodeState::Directory)?;
            }
            InodeState::Clear => {
                writeln!(self.out, "DUPS/BAD IN ROOT INODE")?;
                self.continue_or_abort("bad root inode")?;
                self.tables.set_state(ROOT_INODE, InodeState::Directory)?;
            }
            InodeState::Directory => {}
        }
        self.descend()
    }

    /// Enter the current directory, scanning its entries with phase 2
    pub(crate) fn descend(&mut self) -> Result<()> {
        self.tables.set_state(self.inum, InodeState::File)?;
        let Some(dp) = self.ginode()? else {
            return Ok(());
        };
        if self.options.dir_check && !self.pass2_done {
            self.ckinode(&dp, Walk::Check)?;
        }
        let saved_name = self.thisname;
        let saved_size = self.filsize;
        self.path.push(b'/');
        self.filsize = dp.size as i64;
        self.ckinode(&dp, Walk::Data(DirPass::Pass2))?;
        self.thisname = saved_name;
        self.path.pop();
        self.filsize = saved_size;
        Ok(())
    }

    pub(crate) fn pass2_entry(&mut self, entry: &mut DirEntry) -> Result<Flow> {
        self.poll()?;
        self.inum = entry.ino as u32;
        if self.inum == 0 {
            return Ok(Flow::KEEPON);
        }
        self.thisname = self.path.len();
        let name = entry_name(entry);
        if self.path.len() + name.len() > MAXPATH {
            writeln!(self.out, "DIR pathname too deep")?;
            writeln!(self.out, "DIR pathname is <{}>", self.path_string())?;
            return Err(Error::Aborted("pathname too deep".into()));
        }
        self.path.extend_from_slice(name);

        let remove = if self.inum > self.imax || self.inum < ROOT_INODE {
            self.dir_error("I OUT OF RANGE")?
        } else {
            self.reference()?
        };
        self.path.truncate(self.thisname);
        if !remove {
            return Ok(Flow::KEEPON);
        }
        entry.ino = 0;
        Ok(Flow::KEEPON | Flow::ALTERED)
    }

    /// Count a reference to the current inode; true if the entry should go
    fn reference(&mut self) -> Result<bool> {
        loop {
            match self.tables.state(self.inum)? {
                InodeState::Unallocated => return self.dir_error("UNALLOCATED"),
                InodeState::Clear => {
                    if self.dir_error("DUP/BAD")? {
                        return Ok(true);
                    }
                    let Some(dp) = self.ginode()? else {
                        return Ok(false);
                    };
                    let state = if dp.is_dir() {
                        InodeState::Directory
                    } else {
                        InodeState::File
                    };
                    self.tables.set_state(self.inum, state)?;
                }
                InodeState::File => {
                    self.count_reference()?;
                    return Ok(false);
                }
                InodeState::Directory => {
                    self.count_reference()?;
                    self.descend()?;
                    return Ok(false);
                }
            }
        }
    }

    /// Complain about the entry at `path`; true if it should be removed
    pub(crate) fn dir_error(&mut self, what: &str) -> Result<bool> {
        write!(self.out, "{what} ")?;
        self.pinode()?;
        let dp = self.ginode()?;
        match dp {
            Some(dp) if dp.has_known_type() => {
                write!(
                    self.out,
                    "\n{}={}",
                    if dp.is_dir() { "DIR" } else { "FILE" },
                    self.path_string()
                )?;
                if dp.is_dir() {
                    let emptiness = if dp.size > EMPT {
                        self.check_empty(&dp)?
                    } else {
                        Emptiness::Empty
                    };
                    match emptiness {
                        Emptiness::NotEmpty => writeln!(self.out, " (NOT EMPTY)")?,
                        Emptiness::Empty => {
                            if self.removed_as_empty()? {
                                return Ok(true);
                            }
                        }
                        Emptiness::Unknown => {}
                    }
                } else if dp.is_regular() && dp.size == 0 && self.removed_as_empty()? {
                    return Ok(true);
                }
            }
            Some(dp) => {
                write!(self.out, "\nNAME={}", self.path_string())?;
                if dp.size == 0 {
                    if self.removed_as_empty()? {
                        return Ok(true);
                    }
                } else {
                    writeln!(self.out, " (NOT EMPTY)")?;
                }
            }
            None => writeln!(self.out, "\nNAME={}", self.path_string())?,
        }
        self.reply("REMOVE")
    }

    /// Report an empty inode, removing it unless nothing may be written
    pub(crate) fn removed_as_empty(&mut self) -> Result<bool> {
        write!(self.out, " (EMPTY)")?;
        if self.options.no {
            writeln!(self.out)?;
            return Ok(false);
        }
        writeln!(self.out, " -- REMOVED")?;
        Ok(true)
    }

    /// Look through the direct blocks of a directory for entries besides "." and ".."
    pub(crate) fn check_empty(&mut self, dp: &DiskInode) -> Result<Emptiness> {
        let mut size = dp.size.min((NDADDR * BLOCK_SIZE) as i32) as i64;
        let addrs = dp.addresses(self.order);
        for &blk in &addrs[..NDADDR] {
            if size <= 0 {
                break;
            }
            if blk == 0 {
                continue;
            }
            if self.out_of_range(blk) {
                writeln!(self.out, "chkempt: blk {blk} out of range")?;
                return Ok(Emptiness::Unknown);
            }
            let Some(block) = self.read_block(blk)? else {
                writeln!(self.out, "chkempt: Can't find blk {blk}")?;
                return Ok(Emptiness::Unknown);
            };
            for slot in 0..DIRENTS_PER_BLOCK {
                if size <= 0 {
                    break;
                }
                let entry: DirEntry = block.record(slot * DIRENT_SIZE, self.order);
                let name = entry_name(&entry);
                if name != b"." && name != b".." && entry.ino != 0 {
                    return Ok(Emptiness::NotEmpty);
                }
                size -= DIRENT_SIZE as i64;
            }
        }
        Ok(if size <= 0 {
            Emptiness::Empty
        } else {
            Emptiness::NotEmpty
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use crate::filesystem::tests::{image, open_image};
    use crate::structs::*;

    #[test]
    fn dangling_entries_are_removed() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        add_root_entry(&mut fs, 2, &entry(9, "ghost"));
        add_root_entry(&mut fs, 3, &entry(60_000, "far"));
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        assert![out.contains("UNALLOCATED  I=9")];
        assert![out.contains("NAME=/ghost")];
        assert![out.contains("I OUT OF RANGE  I=60000")];
        assert![out.contains("NAME=/far")];
        assert![report.unwrap().modified];

        let root = fs.inode(ROOT_INODE).unwrap();
        let blk = root.block_pointer(0, fs.order) as u64;
        assert_eq![fs.dir_entry(blk, 2).unwrap().ino, 0];
        assert_eq![fs.dir_entry(blk, 3).unwrap().ino, 0];
    }

    #[test]
    fn root_must_be_a_directory() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        let mut root = fs.inode(ROOT_INODE).unwrap();
        root.mode = S_IFREG | 0o755;
        fs.write_inode(ROOT_INODE, &root).unwrap();
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![out.contains("ROOT INODE NOT DIRECTORY\nFIX?  no")];
        assert![matches![report, Err(crate::Error::Aborted(_))]];
    }

    #[test]
    fn directory_blocks_are_validated() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let root = fs.inode(ROOT_INODE).unwrap();
        let blk = root.block_pointer(0, fs.order);
        fs.write_dir_entry(blk as u64, 1, &entry(2, "..x")).unwrap();
        add_root_entry(&mut fs, 2, &entry(0, "a/b"));
        let (report, out) = run_check(&mut fs, &options(&["-n", "-D"]));
        assert![report.is_ok()];
        assert![out.contains("MISSING '.' or '..' in DIR I = 2")];
        assert![out.contains(&format!("BLK {blk}  I=2"))];
        assert![out.contains("\nDIR=\n\n")];
    }
}
