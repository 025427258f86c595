use super::pass2::Emptiness;
use super::{Checker, DirPass, Flow, InodeState, Walk, EMPT, LOST_AND_FOUND};
use crate::structs::*;
use crate::Result;

/// Outcome of offering an unreferenced inode to lost+found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Linkup {
    No,
    Connected,
    /// Empty, to be cleared without asking
    Removed,
}

impl Checker<'_> {
    /// Reconnect directories that phase 2 never reached
    pub(crate) fn pass3(&mut self) -> Result<()> {
        writeln!(self.out, "** Phase 3 - Check Connectivity")?;
        for ino in ROOT_INODE..=self.lastino {
            self.poll()?;
            if !self.is_directory_state(ino)? {
                continue;
            }
            self.inum = ino;
            // Climb ".." to the top of the detached subtree
            let mut hops = 0;
            loop {
                self.orphan = self.inum;
                let Some(dp) = self.ginode()? else {
                    break;
                };
                self.filsize = dp.size as i64;
                self.parentdir = 0;
                self.ckinode(&dp, Walk::Data(DirPass::FindIno("..")))?;
                self.inum = self.parentdir;
                hops += 1;
                if self.inum == 0 || hops > self.imax || !self.is_directory_state(self.inum)? {
                    break;
                }
            }
            self.inum = self.orphan;
            if self.linkup()? == Linkup::Connected {
                self.path.clear();
                self.path.push(b'?');
                self.thisname = 0;
                self.descend()?;
            }
        }
        Ok(())
    }

    /// Offer the current inode to lost+found
    pub(crate) fn linkup(&mut self) -> Result<Linkup> {
        let Some(dp) = self.ginode()? else {
            return Ok(Linkup::No);
        };
        let lostdir = dp.is_dir();
        let pdir = self.parentdir;
        let no = self.options.no;
        if !dp.is_fifo() || !self.options.quiet || no {
            write!(self.out, "UNREF {} ", if lostdir { "DIR" } else { "FILE" })?;
            self.pinode()?;
        }
        let mut must_connect = false;
        if lostdir {
            let emptiness = if dp.size > EMPT {
                self.check_empty(&dp)?
            } else {
                Emptiness::Empty
            };
            match emptiness {
                Emptiness::NotEmpty => {
                    write!(self.out, " (NOT EMPTY)")?;
                    if no {
                        writeln!(self.out)?;
                    } else {
                        writeln!(self.out, " MUST reconnect")?;
                        must_connect = true;
                    }
                }
                Emptiness::Empty => {
                    write!(self.out, " (EMPTY)")?;
                    if !no {
                        writeln!(self.out, " Cleared")?;
                        return Ok(Linkup::Removed);
                    }
                    writeln!(self.out)?;
                }
                Emptiness::Unknown => {}
            }
        }
        if !must_connect {
            if dp.is_regular() {
                if dp.size == 0 {
                    write!(self.out, " (EMPTY)")?;
                    if !no {
                        writeln!(self.out, " Cleared")?;
                        return Ok(Linkup::Removed);
                    }
                    writeln!(self.out)?;
                } else {
                    writeln!(self.out, " (NOT EMPTY)")?;
                }
            }
            if dp.is_fifo() {
                if no {
                    return Ok(Linkup::No);
                }
                if !self.options.quiet {
                    write!(self.out, " -- REMOVED")?;
                }
                writeln!(self.out)?;
                return Ok(Linkup::Removed);
            }
            if !self.reply("RECONNECT")? {
                return Ok(Linkup::No);
            }
        }
        self.connect(lostdir, pdir)
    }

    fn connect(&mut self, lostdir: bool, pdir: u32) -> Result<Linkup> {
        self.orphan = self.inum;
        if self.lfdir == 0 {
            self.inum = ROOT_INODE;
            let Some(root) = self.ginode()? else {
                self.inum = self.orphan;
                return Ok(Linkup::No);
            };
            self.filsize = root.size as i64;
            self.parentdir = 0;
            self.ckinode(&root, Walk::Data(DirPass::FindIno(LOST_AND_FOUND)))?;
            self.inum = self.orphan;
            self.lfdir = self.parentdir;
            if self.lfdir == 0 {
                writeln!(self.out, "SORRY. NO {LOST_AND_FOUND} DIRECTORY\n")?;
                return Ok(Linkup::No);
            }
        }
        self.inum = self.lfdir;
        let lf = match self.ginode()? {
            Some(lf) if lf.is_dir() && self.tables.state(self.lfdir)? == InodeState::File => lf,
            _ => {
                self.inum = self.orphan;
                writeln!(self.out, "SORRY. NO {LOST_AND_FOUND} DIRECTORY\n")?;
                return Ok(Linkup::No);
            }
        };
        let mut lf = lf;
        let mask = BLOCK_SIZE as i32 - 1;
        if lf.size & mask != 0 {
            lf.size = (lf.size + mask) & !mask;
            self.put_inode(self.lfdir, &lf)?;
        }
        self.filsize = lf.size as i64;
        self.inum = self.orphan;
        if !self
            .ckinode(&lf, Walk::Data(DirPass::MakeEntry))?
            .contains(Flow::ALTERED)
        {
            writeln!(self.out, "SORRY. NO SPACE IN {LOST_AND_FOUND} DIRECTORY\n")?;
            return Ok(Linkup::No);
        }
        self.count_reference()?;

        let Some(mut dp) = self.ginode()? else {
            return Ok(Linkup::Connected);
        };
        if dp.nlink == 0 {
            dp.nlink += 1;
            self.put_inode(self.inum, &dp)?;
            let count = self.tables.link_count(self.inum)?;
            self.tables.set_link_count(self.inum, count + 1)?;
            if lostdir {
                let inum = self.inum;
                if let Some(slot) = self.zero_links.iter_mut().find(|i| **i == inum) {
                    *slot = 0;
                }
            }
        }
        if lostdir {
            self.filsize = dp.size as i64;
            self.ckinode(&dp, Walk::Data(DirPass::ChangeDotDot))?;
            self.inum = self.lfdir;
            if let Some(mut lf) = self.ginode()? {
                lf.nlink += 1;
                self.put_inode(self.lfdir, &lf)?;
                let count = self.tables.link_count(self.lfdir)?;
                self.tables.set_link_count(self.lfdir, count + 1)?;
            }
            self.inum = self.orphan;
            writeln!(
                self.out,
                "DIR I={} CONNECTED. PARENT WAS I={pdir}\n",
                self.orphan
            )?;
        }
        Ok(Linkup::Connected)
    }
}
