use super::pass2::Emptiness;
use super::pass3::Linkup;
use super::{BlockPass, Checker, Flow, InodeState, Walk, EMPT, LOST_AND_FOUND};
use crate::structs::*;
use crate::Result;

/// How [`Checker::clri`] treats the inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Clri {
    /// Describe it, then ask
    Report,
    /// Ask without describing
    Ask,
    /// Clear without a word
    Remove,
}

impl Checker<'_> {
    /// Compare link counts with the references phase 2 found
    pub(crate) fn pass4(&mut self) -> Result<()> {
        writeln!(self.out, "** Phase 4 - Check Reference Counts")?;
        for ino in ROOT_INODE..=self.lastino {
            self.poll()?;
            self.inum = ino;
            match self.tables.state(ino)? {
                InodeState::File => {
                    let count = self.tables.link_count(ino)?;
                    if count != 0 {
                        self.adjust(count)?;
                    } else if self.zero_links.contains(&ino) {
                        let size = self.ginode()?.map_or(0, |dp| dp.size);
                        if size != 0 {
                            self.unreferenced()?;
                        } else {
                            self.clri("UNREF", Clri::Report)?;
                        }
                    }
                }
                InodeState::Directory => self.clri("UNREF", Clri::Report)?,
                InodeState::Clear => self.clri("BAD/DUP", Clri::Report)?,
                InodeState::Unallocated => {}
            }
        }

        let free_inodes = self.imax as i64 - self.files;
        if free_inodes != self.fs.superblock.tinode as i64 {
            write!(self.out, "FREE INODE COUNT WRONG IN SUPERBLK")?;
            if self.options.quiet {
                writeln!(self.out, "\nFIXED")?;
                self.set_free_inodes(free_inodes);
            } else if self.reply("FIX")? {
                self.set_free_inodes(free_inodes);
            }
        }
        Ok(())
    }

    fn set_free_inodes(&mut self, count: i64) {
        self.fs.superblock.tinode = count as u16;
        self.fs.mark_superblock();
    }

    /// Offer the current inode to lost+found, clearing it if that fails
    fn unreferenced(&mut self) -> Result<()> {
        match self.linkup()? {
            Linkup::No => self.clri("UNREF", Clri::Ask),
            Linkup::Removed => self.clri("UNREF", Clri::Remove),
            Linkup::Connected => Ok(()),
        }
    }

    /// Fix a link count that is `lcnt` too high
    fn adjust(&mut self, lcnt: i16) -> Result<()> {
        let Some(mut dp) = self.ginode()? else {
            return Ok(());
        };
        if dp.nlink == lcnt {
            return self.unreferenced();
        }
        let kind = if self.lfdir == self.inum {
            LOST_AND_FOUND
        } else if dp.is_dir() {
            "DIR"
        } else {
            "FILE"
        };
        write!(self.out, "LINK COUNT {kind}")?;
        self.pinode()?;
        write!(
            self.out,
            "\nCOUNT {} SHOULD BE {}",
            dp.nlink,
            dp.nlink.wrapping_sub(lcnt)
        )?;
        if self.reply("ADJUST")? {
            dp.nlink = dp.nlink.wrapping_sub(lcnt);
            self.put_inode(self.inum, &dp)?;
        }
        Ok(())
    }

    /// Offer to clear the current inode after complaining with `what`
    pub(crate) fn clri(&mut self, what: &str, how: Clri) -> Result<()> {
        let Some(dp) = self.ginode()? else {
            return Ok(());
        };
        if how == Clri::Report {
            let no = self.options.no;
            if !dp.is_fifo() || !self.options.quiet || no {
                write!(self.out, "{what} {}", if dp.is_dir() { "DIR" } else { "FILE" })?;
                self.pinode()?;
            }
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
                            return self.clear_inode(&dp);
                        }
                    }
                    Emptiness::Unknown => {}
                }
            }
            if dp.is_regular() {
                if dp.size == 0 {
                    if self.removed_as_empty()? {
                        return self.clear_inode(&dp);
                    }
                } else {
                    writeln!(self.out, " (NOT EMPTY)")?;
                }
            }
            if dp.is_fifo() && !no {
                if !self.options.quiet {
                    write!(self.out, " -- CLEARED")?;
                }
                writeln!(self.out)?;
                return self.clear_inode(&dp);
            }
        }
        if how == Clri::Remove || self.reply("CLEAR")? {
            self.clear_inode(&dp)?;
        }
        Ok(())
    }

    /// Release the blocks of the current inode and zero it
    fn clear_inode(&mut self, dp: &DiskInode) -> Result<()> {
        self.files -= 1;
        self.ckinode(dp, Walk::Addr(BlockPass::Pass4))?;
        self.zap_inode()
    }

    pub(crate) fn pass4_block(&mut self, blk: u32) -> Result<Flow> {
        if self.out_of_range(blk) {
            return Ok(Flow::SKIP);
        }
        if self.tables.block_used(blk)? && !self.dups.release(blk) {
            self.tables.set_block_used(blk, false)?;
            self.blocks -= 1;
        }
        Ok(Flow::KEEPON)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use crate::filesystem::tests::{image, open_image};
    use crate::structs::*;

    #[test]
    fn link_counts_are_adjusted() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        let blk = take_block(&mut fs);
        fs.write_inode(3, &inode(S_IFREG | 0o644, 3, 10, blk, order)).unwrap();
        add_root_entry(&mut fs, 2, &entry(3, "a"));
        add_root_entry(&mut fs, 3, &entry(3, "b"));
        fs.superblock.tinode -= 1;
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        assert![report.unwrap().modified];
        assert![out.contains("LINK COUNT FILE I=3 ")];
        assert![out.contains("\nCOUNT 3 SHOULD BE 2\nADJUST?  yes")];
        assert_eq![fs.inode(3).unwrap().nlink, 2];
    }

    #[test]
    fn unreferenced_directory_without_contents() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        let order = fs.order;
        let blk = take_block(&mut fs);
        fs.write_inode(3, &inode(S_IFDIR | 0o755, 2, 32, blk, order)).unwrap();
        write_dir(&mut fs, blk, &[entry(3, "."), entry(2, "..")]);
        fs.superblock.tinode -= 1;
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![report.is_ok()];
        assert![out.contains("UNREF DIR  I=3")];
        assert![out.contains(" (EMPTY)\n")];
        assert![!out.contains("REMOVED")];
    }
}
