use log::trace;

use super::{BlockPass, Checker, Flow, InodeState, Walk, MAXBAD, MAXDUP, MAXLNCNT};
use crate::Result;

impl Checker<'_> {
    /// Claim every block of every allocated inode, noting bad and duplicate ones
    pub(crate) fn pass1(&mut self) -> Result<()> {
        writeln!(self.out, "** Phase 1 - Check Blocks and Sizes")?;
        for inum in 1..=self.imax {
            self.poll()?;
            self.inum = inum;
            let Some(dp) = self.ginode()? else {
                continue;
            };
            if !dp.is_allocated() {
                if dp.mode != 0 {
                    write!(self.out, "PARTIALLY ALLOCATED INODE I={inum}")?;
                    if dp.size != 0 {
                        write!(self.out, " (NOT EMPTY)")?;
                    }
                    if self.reply("CLEAR")? {
                        self.zap_inode()?;
                    }
                }
                continue;
            }
            trace!("{}", dp.describe(inum, self.order));
            self.lastino = inum;
            if !dp.has_known_type() {
                write!(self.out, "UNKNOWN FILE TYPE I={inum}")?;
                if dp.size != 0 {
                    write!(self.out, " (NOT EMPTY)")?;
                }
                if self.reply("CLEAR")? {
                    self.zap_inode()?;
                }
                continue;
            }
            self.files += 1;
            self.tables.set_link_count(inum, dp.nlink)?;
            if dp.nlink <= 0 {
                if self.zero_links.len() < MAXLNCNT {
                    self.zero_links.push(inum);
                } else {
                    write!(self.out, "LINK COUNT TABLE OVERFLOW")?;
                    self.continue_or_overflow("link count")?;
                }
            }
            let state = if dp.is_dir() {
                InodeState::Directory
            } else {
                InodeState::File
            };
            self.tables.set_state(inum, state)?;
            self.badblk = 0;
            self.dupblk = 0;
            self.filsize = 0;
            self.ckinode(&dp, Walk::Addr(BlockPass::Pass1))?;
            if matches!(
                self.tables.state(inum)?,
                InodeState::File | InodeState::Directory
            ) {
                self.size_check(&dp)?;
            }
        }
        Ok(())
    }

    pub(crate) fn pass1_block(&mut self, blk: u32) -> Result<Flow> {
        if self.out_of_range(blk) {
            self.block_error("BAD", blk)?;
            self.badblk += 1;
            if self.badblk >= MAXBAD {
                write!(self.out, "EXCESSIVE BAD BLKS I={}", self.inum)?;
                self.continue_or_overflow("bad block")?;
                return Ok(Flow::STOP);
            }
            return Ok(Flow::SKIP);
        }
        if self.tables.block_used(blk)? {
            self.block_error("DUP", blk)?;
            self.dupblk += 1;
            if self.dupblk >= MAXDUP {
                write!(self.out, "EXCESSIVE DUP BLKS I={}", self.inum)?;
                self.continue_or_overflow("duplicate")?;
                return Ok(Flow::STOP);
            }
            if self.dups.is_full() {
                write!(self.out, "DUP TABLE OVERFLOW.")?;
                self.continue_or_overflow("duplicate")?;
                return Ok(Flow::STOP);
            }
            self.dups.record(blk);
        } else {
            self.blocks += 1;
            self.tables.set_block_used(blk, true)?;
        }
        self.filsize += 1;
        Ok(Flow::KEEPON)
    }

    /// Find the earlier claimants of every duplicate block
    pub(crate) fn pass1b(&mut self) -> Result<()> {
        writeln!(self.out, "** Phase 1b - Rescan For More DUPS")?;
        for inum in 1..=self.lastino {
            self.poll()?;
            self.inum = inum;
            if self.tables.state(inum)? == InodeState::Unallocated {
                continue;
            }
            let Some(dp) = self.ginode()? else {
                continue;
            };
            if self
                .ckinode(&dp, Walk::Addr(BlockPass::Pass1b))?
                .contains(Flow::STOP)
            {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn pass1b_block(&mut self, blk: u32) -> Result<Flow> {
        if self.out_of_range(blk) {
            return Ok(Flow::SKIP);
        }
        match self.dups.take_distinct(blk) {
            Some(done) => {
                self.block_error("DUP", blk)?;
                Ok(if done { Flow::STOP } else { Flow::KEEPON })
            }
            None => Ok(Flow::KEEPON),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use crate::filesystem::tests::{image, open_image};
    use crate::structs::*;
    use crate::Error;

    #[test]
    fn bad_pointers_mark_inode() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        let order = fs.order;
        let mut bad = inode(S_IFREG | 0o644, 1, 2048, 5, order);
        bad.set_block_pointer(1, 40_000, order);
        fs.write_inode(3, &bad).unwrap();
        add_root_entry(&mut fs, 2, &entry(3, "bad"));
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![report.is_ok()];
        assert![out.contains("5 BAD I=3")];
        assert![out.contains("40000 BAD I=3")];
        assert![out.contains("DUP/BAD  I=3")];
        assert![out.contains("REMOVE?  no")];
    }

    #[test]
    fn partially_allocated_inode() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        fs.write_inode(7, &inode(0o644, 0, 0, 0, order)).unwrap();
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        assert![out.contains("PARTIALLY ALLOCATED INODE I=7\nCLEAR?  yes")];
        assert![report.unwrap().modified];
        assert_eq![fs.inode(7).unwrap().mode, 0];
    }

    #[test]
    fn size_mismatch_is_reported() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        let blk = take_block(&mut fs);
        fs.write_inode(3, &inode(S_IFREG | 0o644, 1, 5000, blk, order)).unwrap();
        add_root_entry(&mut fs, 2, &entry(3, "short"));
        fs.superblock.tinode -= 1;
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![report.is_ok()];
        assert![out.contains("POSSIBLE FILE SIZE ERROR I=3")];
        assert![!out.contains('?'), "{out}"];
    }

    #[test]
    fn zero_link_table_overflow() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        for ino in 3..=23 {
            fs.write_inode(ino, &inode(S_IFREG | 0o644, 0, 0, 0, order)).unwrap();
        }
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![out.contains("LINK COUNT TABLE OVERFLOW\nCONTINUE?  no")];
        assert![matches![
            report,
            Err(Error::CapacityExceeded { table: "link count" })
        ]];
    }

    #[test]
    fn excessive_bad_blocks() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        let order = fs.order;
        let mut bad = inode(S_IFREG | 0o644, 1, 10 * 1024, 0, order);
        for i in 0..10 {
            bad.set_block_pointer(i, 50_000 + i as u32, order);
        }
        fs.write_inode(3, &bad).unwrap();
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![out.contains("50009 BAD I=3")];
        assert![out.contains("EXCESSIVE BAD BLKS I=3\nCONTINUE?  no")];
        assert![matches![
            report,
            Err(Error::CapacityExceeded { table: "bad block" })
        ]];
    }

    #[test]
    fn excessive_duplicate_blocks() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        let root_block = fs.inode(ROOT_INODE).unwrap().block_pointer(0, order);
        let mut dup = inode(S_IFREG | 0o644, 1, 10 * 1024, 0, order);
        for i in 0..10 {
            dup.set_block_pointer(i, root_block, order);
        }
        fs.write_inode(3, &dup).unwrap();
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![out.contains(&format!("{root_block} DUP I=3"))];
        assert![out.contains("EXCESSIVE DUP BLKS I=3\nCONTINUE?  no")];
        assert![matches![
            report,
            Err(Error::CapacityExceeded { table: "duplicate" })
        ]];
    }
}
