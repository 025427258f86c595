use super::{Checker, Flow, DUPTBLSIZE, MAXBAD};
use crate::structs::*;
use crate::Result;

impl Checker<'_> {
    /// Walk the free list, comparing it against the blocks in use
    pub(crate) fn pass5(&mut self) -> Result<()> {
        write!(self.out, "** Phase 5 - Check Free List ")?;
        let salvage = self.options.salvage
            || (self.options.conditional_salvage && !self.prompter.asked());
        if salvage {
            writeln!(self.out, "(Ignored)")?;
            self.fix_free = true;
            return Ok(());
        }
        writeln!(self.out)?;

        self.tables.seed_free_map()?;
        self.badblk = 0;
        self.dupblk = 0;
        self.free_check()?;
        if self.badblk != 0 {
            writeln!(self.out, "{} BAD BLKS IN FREE LIST", self.badblk)?;
        }
        if self.dupblk != 0 {
            writeln!(self.out, "{} DUP BLKS IN FREE LIST", self.dupblk)?;
        }

        if !self.fix_free {
            let data_blocks = (self.f_max - self.f_min) as i64;
            if self.blocks + self.free != data_blocks {
                writeln!(
                    self.out,
                    "{} BLK(S) MISSING",
                    data_blocks - self.blocks - self.free
                )?;
                self.fix_free = true;
            } else if self.free != self.fs.superblock.tfree as i64 {
                write!(self.out, "FREE BLK COUNT WRONG IN SUPERBLK")?;
                if self.options.quiet {
                    writeln!(self.out, "\nFIXED")?;
                    self.set_free_blocks();
                } else if self.reply("FIX")? {
                    self.set_free_blocks();
                }
            }
        }
        if self.fix_free {
            write!(self.out, "BAD FREE LIST")?;
            if self.options.quiet && !self.options.salvage {
                writeln!(self.out, "\nSALVAGED")?;
            } else if !self.reply("SALVAGE")? {
                self.fix_free = false;
            }
        }
        Ok(())
    }

    fn set_free_blocks(&mut self) {
        self.fs.superblock.tfree = self.free as i32;
        self.fs.mark_superblock();
    }

    /// Follow the chain of free list blocks starting at the superblock cache
    fn free_check(&mut self) -> Result<()> {
        let mut list = self.fs.superblock.free_cache();
        if list.nfree == 0 {
            return Ok(());
        }
        loop {
            self.poll()?;
            if list.nfree <= 0 || list.nfree as usize > NICFREE {
                writeln!(self.out, "BAD FREEBLK COUNT")?;
                self.fix_free = true;
                return Ok(());
            }
            for i in (1..list.nfree as usize).rev() {
                if self.pass5_block(list.free[i] as u32)? == Flow::STOP {
                    return Ok(());
                }
            }
            let next = list.free[0] as u32;
            if next == 0 || self.pass5_block(next)? != Flow::KEEPON {
                return Ok(());
            }
            list = match self.fs.free_block(next as u64) {
                Ok(list) => list,
                Err(e) if super::is_device_error(&e) => {
                    self.read_failed("READ", next)?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
        }
    }

    fn pass5_block(&mut self, blk: u32) -> Result<Flow> {
        if self.out_of_range(blk) {
            self.fix_free = true;
            self.badblk += 1;
            if self.badblk >= MAXBAD {
                write!(self.out, "EXCESSIVE BAD BLKS IN FREE LIST.")?;
                self.continue_or_abort("too many bad blocks in the free list")?;
                return Ok(Flow::STOP);
            }
            return Ok(Flow::SKIP);
        }
        if self.tables.block_free(blk)? {
            self.fix_free = true;
            self.dupblk += 1;
            if self.dupblk as usize >= DUPTBLSIZE {
                write!(self.out, "EXCESSIVE DUP BLKS IN FREE LIST.")?;
                self.continue_or_abort("too many duplicate blocks in the free list")?;
                return Ok(Flow::STOP);
            }
        } else {
            self.free += 1;
            self.tables.set_block_free(blk, true)?;
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
    fn used_block_on_free_list() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        let root = fs.inode(ROOT_INODE).unwrap();
        let used = root.block_pointer(0, order) as i32;
        fs.superblock.free[1] = used;
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![out.contains("1 DUP BLKS IN FREE LIST")];
        assert![!out.contains("MISSING")];
        assert![out.contains("BAD FREE LIST\nSALVAGE?  no")];
        assert_eq![report.unwrap().free, 1958];
    }

    #[test]
    fn out_of_range_free_block() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        fs.superblock.free[1] = 5000;
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        assert![out.contains("1 BAD BLKS IN FREE LIST")];
        assert![out.contains("BAD FREE LIST\nSALVAGE?  yes")];
        assert![out.contains("** Phase 6 - Salvage Free List")];
        assert_eq![report.unwrap().free, 1960];
    }
}
