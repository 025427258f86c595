//! Consistency checker and repairer for System V filesystems.
//!
//! A check runs in phases over one [`Filesystem`]:
//! blocks and sizes (1, with 1b for duplicates), pathnames (2),
//! connectivity (3), reference counts (4), the free list (5) and,
//! when that list is bad, a rebuild of it (6).

use std::io::{BufRead, Write};
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::dump::now;
use crate::filesystem::Filesystem;
use crate::structs::*;
use crate::{Error, Result};

mod pass1;
mod pass2;
mod pass3;
mod pass4;
mod pass5;
mod pass6;
mod prompt;
mod tables;
mod walk;

pub use pass6::{build_free_list, interleave};
pub use prompt::{Answer, Prompter};
pub use tables::{CheckerTables, InodeState, MemoryTables, ScratchTables, TableLayout};
pub use walk::{BlockPass, DirPass, Flow, Walk};

use tables::DupTable;

/// Bad blocks tolerated in one inode or in the free list
pub const MAXBAD: u32 = 10;
/// Duplicate blocks tolerated in one inode
pub const MAXDUP: u32 = 10;
pub const DUPTBLSIZE: usize = 100;
/// Inodes with a zero link count remembered by phase 1
pub const MAXLNCNT: usize = 20;
pub const MAXPATH: usize = 1500;
/// Size of a directory holding only "." and ".."
pub const EMPT: i32 = 2 * DIRENT_SIZE as i32;
/// Free list spacing used when neither the options nor the superblock give one
pub const STEPSIZE: i32 = 7;
pub const CYLSIZE: i32 = 400;
pub const MAXCYL: i32 = 1000;
pub const DEFAULT_MEMORY_LIMIT: u64 = 64 << 20;
/// Environment override for [`Options::memory_limit`], in bytes
pub const MEMORY_ENV: &str = "S4FSCK_MEMORY";
pub const LOST_AND_FOUND: &str = "lost+found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Scratch file for the tables when they exceed [`Options::memory_limit`]
    pub scratch: Option<PathBuf>,
    /// Rebuild the free list unconditionally
    pub salvage: bool,
    /// Rebuild the free list only if nothing else was questioned
    pub conditional_salvage: bool,
    pub no: bool,
    pub yes: bool,
    /// Fix counts and FIFOs without asking, and keep quiet about sizes
    pub quiet: bool,
    /// Validate directory blocks in phase 2
    pub dir_check: bool,
    pub debug: u32,
    /// Skip phases 2 to 4
    pub fast: bool,
    pub cylinder_size: i32,
    pub step_size: i32,
    pub memory_limit: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scratch: None,
            salvage: false,
            conditional_salvage: false,
            no: false,
            yes: false,
            quiet: false,
            dir_check: false,
            debug: 0,
            fast: false,
            cylinder_size: 0,
            step_size: 0,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl Options {
    /// Parse flags, returning the options and the filesystems to check
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<(Self, Vec<String>)> {
        let mut options = Self::default();
        if let Ok(limit) = std::env::var(MEMORY_ENV) {
            match limit.trim().parse() {
                Ok(limit) => options.memory_limit = limit,
                Err(_) => warn!("Ignoring {MEMORY_ENV}={limit}"),
            }
        }
        let mut targets = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let Some(flag) = arg.strip_prefix('-') else {
                targets.push(arg);
                continue;
            };
            let mut chars = flag.chars();
            match chars.next() {
                Some('t' | 'T') => {
                    let path = match args.next() {
                        Some(path) if !path.starts_with('-') => PathBuf::from(path),
                        _ => return Err(Error::Aborted("Bad -t option".into())),
                    };
                    if let Ok(meta) = std::fs::metadata(&path) {
                        if !meta.is_file() {
                            return Err(Error::Aborted(format!(
                                "Illegal scratch file <{}>",
                                path.display()
                            )));
                        }
                    }
                    options.scratch = Some(path);
                }
                Some('s') => {
                    options.set_spacing(chars.as_str());
                    options.salvage = true;
                }
                Some('S') => {
                    options.set_spacing(chars.as_str());
                    options.conditional_salvage = true;
                }
                Some('n' | 'N') => {
                    options.no = true;
                    options.yes = false;
                }
                Some('y' | 'Y') => {
                    options.yes = true;
                    options.no = false;
                }
                Some('q') => options.quiet = true,
                Some('D') => options.dir_check = true,
                Some('d') => options.debug += 1,
                Some('f' | 'F') => options.fast = true,
                Some(c) => return Err(Error::Aborted(format!("{c} option?"))),
                None => return Err(Error::Aborted("- option?".into())),
            }
        }
        if options.no && options.salvage {
            return Err(Error::Aborted("Incompatible options: -n and -s".into()));
        }
        if options.no && options.quiet {
            return Err(Error::Aborted("Incompatible options: -n and -q".into()));
        }
        if options.salvage && options.conditional_salvage {
            options.salvage = false;
        }
        if options.conditional_salvage {
            options.no = true;
        }
        Ok((options, targets))
    }

    /// Free list spacing: "3" and "4" name the 3B1 drives, otherwise "cyl:step"
    pub fn set_spacing(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        let (cyl, step) = match value {
            "3" => (200, 5),
            "4" => (418, 7),
            _ => match value.split_once(':') {
                Some((cyl, step)) => (leading_number(cyl), leading_number(step)),
                None => (0, 0),
            },
        };
        if cyl <= 0 || step <= 0 || step > cyl {
            warn!("Invalid free list spacing {value}, using the defaults");
            self.cylinder_size = 0;
            self.step_size = 0;
            return;
        }
        self.cylinder_size = cyl;
        self.step_size = step;
    }

    /// Whether the filesystem gets opened for writing at all
    pub fn writable(&self) -> bool {
        !self.no || self.conditional_salvage
    }
}

/// Value of the leading digits, zero if there are none
fn leading_number(s: &str) -> i32 {
    let digits: String = s.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Totals of a finished check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub files: i64,
    /// Blocks in use, in 512-byte units
    pub blocks: i64,
    /// Free blocks, in 512-byte units
    pub free: i64,
    pub modified: bool,
}

/// Whether an error came from the device rather than from the checker
pub(crate) fn is_device_error(e: &Error) -> bool {
    matches!(
        e,
        Error::ShortRead { .. } | Error::ShortWrite { .. } | Error::Seek { .. } | Error::Io(_)
    )
}

/// Check and repair one filesystem, writing the dialogue to `out`
pub fn check(
    fs: &mut Filesystem,
    name: &str,
    options: &Options,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<Report> {
    if fs.order.needs_swap() {
        writeln!(out, "{name} is a byte-swapped filesystem")?;
    }
    write!(out, "\n{name}")?;
    if (options.no && !options.conditional_salvage) || !fs.is_writable() {
        write!(out, " (NO WRITE)")?;
    }
    writeln!(out)?;
    let mut checker = Checker::new(fs, options, input, out)?;
    checker.run()
}

pub struct Checker<'a> {
    pub(crate) fs: &'a mut Filesystem,
    pub(crate) options: &'a Options,
    pub(crate) out: &'a mut dyn Write,
    pub(crate) prompter: Prompter<'a>,
    pub(crate) tables: Box<dyn CheckerTables>,
    pub(crate) order: Endian,
    /// Highest inode number
    pub(crate) imax: u32,
    /// First data block
    pub(crate) f_min: u32,
    /// First block past the filesystem
    pub(crate) f_max: u32,
    /// Inode being worked on
    pub(crate) inum: u32,
    /// Highest allocated inode seen by phase 1
    pub(crate) lastino: u32,
    pub(crate) parentdir: u32,
    pub(crate) lfdir: u32,
    pub(crate) orphan: u32,
    pub(crate) files: i64,
    pub(crate) blocks: i64,
    pub(crate) free: i64,
    pub(crate) badblk: u32,
    pub(crate) dupblk: u32,
    /// Blocks, or bytes while scanning a directory, left in the current inode
    pub(crate) filsize: i64,
    pub(crate) dups: DupTable,
    /// Inodes found with no links in phase 1
    pub(crate) zero_links: Vec<u32>,
    pub(crate) path: Vec<u8>,
    /// Start of the last component of `path`
    pub(crate) thisname: usize,
    pub(crate) fix_free: bool,
    pub(crate) pass2_done: bool,
}

impl std::fmt::Debug for Checker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("imax", &self.imax)
            .field("f_min", &self.f_min)
            .field("f_max", &self.f_max)
            .field("inum", &self.inum)
            .field("files", &self.files)
            .field("blocks", &self.blocks)
            .field("free", &self.free)
            .finish()
    }
}

impl<'a> Checker<'a> {
    /// Validate the superblock sizes and set up the tables
    pub fn new(
        fs: &'a mut Filesystem,
        options: &'a Options,
        input: &'a mut dyn BufRead,
        out: &'a mut dyn Write,
    ) -> Result<Self> {
        let sb = &fs.superblock;
        let f_min = sb.isize as u32;
        let f_max = sb.fsize.max(0) as u32;
        if f_min < 2 || f_min >= f_max {
            let message = format!("Size check: fsize {} isize {}", sb.fsize, sb.isize);
            writeln!(out, "{message}")?;
            return Err(Error::StructuralCorruption(message));
        }
        let imax = sb.inode_count();
        writeln!(
            out,
            "File System: {} Volume: {}\n",
            fixed_name(&sb.fname),
            fixed_name(&sb.fpack)
        )?;

        let layout = TableLayout::new(f_max, imax + 1);
        let tables: Box<dyn CheckerTables> = if layout.memory_bytes() > options.memory_limit {
            writeln!(out, "\nNEED SCRATCH FILE ({} BLKS)", layout.scratch_blocks())?;
            Box::new(layout.on_scratch(options.scratch.as_deref())?)
        } else {
            Box::new(layout.in_memory())
        };
        debug!("Tables for {imax} inodes and {f_max} blocks: {tables:?}");

        let answer = if options.no || !fs.is_writable() {
            Answer::No
        } else if options.yes {
            Answer::Yes
        } else {
            Answer::Ask
        };
        let order = fs.order;
        Ok(Self {
            fs,
            options,
            out,
            prompter: Prompter::new(answer, input),
            tables,
            order,
            imax,
            f_min,
            f_max,
            inum: 0,
            lastino: 0,
            parentdir: 0,
            lfdir: 0,
            orphan: 0,
            files: 0,
            blocks: 0,
            free: 0,
            badblk: 0,
            dupblk: 0,
            filsize: 0,
            dups: DupTable::default(),
            zero_links: Vec::with_capacity(MAXLNCNT),
            path: Vec::with_capacity(MAXPATH),
            thisname: 0,
            fix_free: false,
            pass2_done: false,
        })
    }

    /// Run every phase and write the summary
    pub fn run(&mut self) -> Result<Report> {
        self.pass1()?;
        if !self.dups.is_empty() {
            self.pass1b()?;
        }
        if !self.options.fast {
            self.pass2()?;
            self.pass2_done = true;
            self.pass3()?;
            self.pass4()?;
        }
        self.pass5()?;
        if self.fix_free {
            writeln!(self.out, "** Phase 6 - Salvage Free List")?;
            self.pass6()?;
            self.free = self.fs.superblock.tfree as i64;
        }
        self.fs.flush()?;

        let scale = if self.fs.superblock.is_1k() { 2 } else { 1 };
        let report = Report {
            files: self.files,
            blocks: self.blocks * scale,
            free: self.free * scale,
            modified: self.fs.was_modified(),
        };
        writeln!(
            self.out,
            "{} files {} blocks {} free",
            report.files, report.blocks, report.free
        )?;
        if report.modified {
            self.fs.superblock.time = now();
            self.fs.mark_superblock();
            self.fs.flush()?;
            writeln!(self.out, "\n***** FILE SYSTEM WAS MODIFIED *****")?;
        }
        info!(
            "{} files, {} blocks used, {} free{}",
            report.files,
            report.blocks,
            report.free,
            if report.modified { ", modified" } else { "" }
        );
        Ok(report)
    }

    pub(crate) fn reply(&mut self, question: &str) -> Result<bool> {
        self.prompter.reply(self.out, question)
    }

    /// Stop the check with `reason` after ending the current line
    pub(crate) fn abort(&mut self, reason: &str) -> Error {
        let _ = writeln!(self.out);
        Error::Aborted(reason.into())
    }

    /// Ask whether to go on; a no ends the check
    pub(crate) fn continue_or_abort(&mut self, reason: &str) -> Result<()> {
        if self.reply("CONTINUE")? {
            return Ok(());
        }
        Err(self.abort(reason))
    }

    /// Ask whether to go on past a full table; a no ends the check
    pub(crate) fn continue_or_overflow(&mut self, table: &'static str) -> Result<()> {
        if self.reply("CONTINUE")? {
            return Ok(());
        }
        writeln!(self.out)?;
        Err(Error::CapacityExceeded { table })
    }

    /// Report a device failure on `blk` and offer to carry on
    pub(crate) fn read_failed(&mut self, what: &str, blk: u32) -> Result<()> {
        write!(self.out, "\nCAN NOT {what}: BLK {blk}")?;
        self.continue_or_abort("Program terminated")
    }

    /// Stop on a pending termination signal
    pub(crate) fn poll(&self) -> Result<()> {
        match crate::signal::pending() {
            Some(signal) => Err(Error::Interrupted(signal)),
            None => Ok(()),
        }
    }

    pub(crate) fn out_of_range(&self, blk: u32) -> bool {
        blk < self.f_min || blk >= self.f_max
    }

    pub(crate) fn path_string(&self) -> String {
        String::from_utf8_lossy(&self.path).into_owned()
    }

    /// Inode `ino`, or nothing if it cannot be read
    pub(crate) fn inode_at(&mut self, ino: u32) -> Result<Option<DiskInode>> {
        if ino == 0 || ino > self.imax {
            return Ok(None);
        }
        match self.fs.inode(ino) {
            Ok(inode) => Ok(Some(inode)),
            Err(e) if is_device_error(&e) => {
                debug!("Inode {ino}: {e}");
                self.read_failed("READ", inode_block(ino))?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The current inode
    pub(crate) fn ginode(&mut self) -> Result<Option<DiskInode>> {
        self.inode_at(self.inum)
    }

    pub(crate) fn put_inode(&mut self, ino: u32, inode: &DiskInode) -> Result<()> {
        self.fs.write_inode(ino, inode)
    }

    pub(crate) fn read_block(&mut self, blk: u32) -> Result<Option<Block>> {
        match self.fs.load_block(blk as u64) {
            Ok(block) => Ok(Some(block)),
            Err(e) if is_device_error(&e) => {
                debug!("Block {blk}: {e}");
                self.read_failed("READ", blk)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Describe the current inode
    pub(crate) fn pinode(&mut self) -> Result<()> {
        write!(self.out, " I={} ", self.inum)?;
        let Some(dp) = self.ginode()? else {
            return Ok(());
        };
        writeln!(self.out, " OWNER={} MODE={:o}", dp.uid, dp.mode)?;
        write!(self.out, "SIZE={} ", dp.size)?;
        let time = crate::dump::format_time(dp.mtime);
        write!(
            self.out,
            "MTIME={} {} ",
            time.get(4..16).unwrap_or_default(),
            time.get(20..24).unwrap_or_default()
        )?;
        Ok(())
    }

    /// Mark the current inode for clearing after a bad or duplicate block
    pub(crate) fn block_error(&mut self, what: &str, blk: u32) -> Result<()> {
        writeln!(self.out, "{blk} {what} I={}", self.inum)?;
        self.tables.set_state(self.inum, InodeState::Clear)
    }

    /// Zero the current inode
    pub(crate) fn zap_inode(&mut self) -> Result<()> {
        self.put_inode(self.inum, &DiskInode::default())
    }

    /// Compare a size with the blocks phase 1 counted for it
    pub(crate) fn size_check(&mut self, dp: &DiskInode) -> Result<()> {
        let per_indirect = POINTERS_PER_INDIRECT as i64;
        let mut size = (dp.size as i64 + BLOCK_SIZE as i64 - 1) / BLOCK_SIZE as i64;
        let mut nblks = size;
        size -= NDADDR as i64;
        while size > 0 {
            nblks += (size + per_indirect - 1) / per_indirect;
            size -= 1;
            size /= per_indirect;
        }
        if self.options.quiet {
            return Ok(());
        }
        let dir = self.tables.state(self.inum)? == InodeState::Directory;
        if nblks != self.filsize {
            writeln!(
                self.out,
                "POSSIBLE {} SIZE ERROR I={}\n",
                if dir { "DIR" } else { "FILE" },
                self.inum
            )?;
        }
        if dir && dp.size % DIRENT_SIZE as i32 != 0 {
            writeln!(self.out, "DIRECTORY MISALIGNED I={}\n", self.inum)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::filesystem::tests::{image, into_image, open_image};

    pub(crate) fn options(flags: &[&str]) -> Options {
        Options::parse(flags.iter().map(|s| s.to_string())).unwrap().0
    }

    pub(crate) fn run_check(fs: &mut Filesystem, options: &Options) -> (Result<Report>, String) {
        let mut out = Vec::new();
        let result = check(fs, "fs", options, &mut std::io::empty(), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    /// Take the next block off the free list, as the kernel would
    pub(crate) fn take_block(fs: &mut Filesystem) -> u32 {
        fs.superblock.nfree -= 1;
        let blk = fs.superblock.free[fs.superblock.nfree as usize] as u32;
        assert_ne![blk, 0];
        if fs.superblock.nfree == 0 {
            let list = fs.free_block(blk as u64).unwrap();
            fs.superblock.set_free_cache(&list);
        }
        fs.superblock.tfree -= 1;
        fs.mark_superblock();
        blk
    }

    pub(crate) fn entry(ino: u16, name: &str) -> DirEntry {
        let mut entry = DirEntry {
            ino,
            ..Default::default()
        };
        set_fixed_name(&mut entry.name, name);
        entry
    }

    pub(crate) fn inode(mode: u16, nlink: i16, size: i32, blk: u32, order: Endian) -> DiskInode {
        let mut inode = DiskInode {
            mode,
            nlink,
            size,
            ..Default::default()
        };
        inode.set_block_pointer(0, blk, order);
        inode
    }

    pub(crate) fn write_dir(fs: &mut Filesystem, blk: u32, entries: &[DirEntry]) {
        let mut block = Block::new(blk as u64);
        for (slot, entry) in entries.iter().enumerate() {
            block.set_record(slot * DIRENT_SIZE, entry, fs.order);
        }
        fs.flush_block(&block).unwrap();
    }

    pub(crate) fn add_root_entry(fs: &mut Filesystem, slot: usize, entry: &DirEntry) {
        let mut root = fs.inode(ROOT_INODE).unwrap();
        let blk = root.block_pointer(0, fs.order) as u64;
        fs.write_dir_entry(blk, slot, entry).unwrap();
        root.size = root.size.max(((slot + 1) * DIRENT_SIZE) as i32);
        fs.write_inode(ROOT_INODE, &root).unwrap();
    }

    fn reopen(fs: Filesystem, writable: bool) -> Filesystem {
        open_image(into_image(fs), writable)
    }

    #[test]
    fn fresh_filesystem_is_clean() {
        let mut fs = open_image(image(2000, Endian::Big), false);
        let (report, out) = run_check(&mut fs, &options(&["-n", "-D"]));
        let report = report.unwrap();
        assert![out.contains("\nfs (NO WRITE)\nFile System:  Volume: \n")];
        for phase in ["Phase 1 ", "Phase 2 ", "Phase 3 ", "Phase 4 ", "Phase 5 "] {
            assert![out.contains(phase), "{phase} missing from {out}"];
        }
        assert![!out.contains("Phase 1b")];
        assert![!out.contains('?'), "{out}"];
        assert![out.contains("2 files 2 blocks 1960 free")];
        assert_eq![
            report,
            Report {
                files: 2,
                blocks: 2,
                free: 1960,
                modified: false
            }
        ];
    }

    #[test]
    fn foreign_order_is_announced() {
        let order = Endian::native().swapped();
        let mut fs = open_image(image(1000, order), false);
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![report.is_ok()];
        assert![out.starts_with("fs is a byte-swapped filesystem\n")];
    }

    #[test]
    fn size_check_failure() {
        let mut fs = open_image(image(1000, Endian::Little), false);
        fs.superblock.isize = 600;
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![matches![report, Err(Error::StructuralCorruption(_))]];
        assert![out.contains("Size check: fsize 498 isize 600")];
    }

    #[test]
    fn fast_check_skips_pathnames() {
        let mut fs = open_image(image(1000, Endian::Little), false);
        let (report, out) = run_check(&mut fs, &options(&["-n", "-f"]));
        assert![report.is_ok()];
        assert![!out.contains("Phase 2")];
        assert![out.contains("Phase 5")];
    }

    #[test]
    fn scratch_tables_give_the_same_answer() {
        let mut fs = open_image(image(2000, Endian::Big), false);
        let mut opts = options(&["-n"]);
        opts.memory_limit = 0;
        let (report, out) = run_check(&mut fs, &opts);
        assert![out.contains("NEED SCRATCH FILE (")];
        assert_eq![report.unwrap().free, 1960];
    }

    #[test]
    fn duplicate_blocks_are_cleared() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        let order = fs.order;
        let blk = take_block(&mut fs);
        fs.write_inode(3, &inode(S_IFREG | 0o644, 1, 1024, blk, order)).unwrap();
        fs.write_inode(4, &inode(S_IFREG | 0o644, 1, 1024, blk, order)).unwrap();
        add_root_entry(&mut fs, 2, &entry(3, "a"));
        add_root_entry(&mut fs, 3, &entry(4, "b"));
        fs.flush().unwrap();

        let mut fs = reopen(fs, true);
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        let report = report.unwrap();
        assert![out.contains(&format!("{blk} DUP I=4"))];
        assert![out.contains("** Phase 1b - Rescan For More DUPS")];
        assert![out.contains(&format!("{blk} DUP I=3"))];
        assert![out.contains("DUP/BAD  I=3")];
        assert![out.contains("BAD/DUP FILE I=4")];
        assert![out.contains("1 BLK(S) MISSING")];
        assert![out.contains("** Phase 6 - Salvage Free List")];
        assert![out.contains("***** FILE SYSTEM WAS MODIFIED *****")];
        assert_eq![report.files, 2];
        assert_eq![report.free, 1960];

        let mut fs = reopen(fs, false);
        assert![!fs.inode(3).unwrap().is_allocated()];
        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![!out.contains('?'), "{out}"];
        assert![!report.unwrap().modified];
    }

    #[test]
    fn orphans_go_to_lost_and_found() {
        let mut fs = open_image(image(2000, Endian::Little), true);
        let order = fs.order;
        let lf = take_block(&mut fs);
        let data = take_block(&mut fs);
        let dir = take_block(&mut fs);
        fs.write_inode(3, &inode(S_IFDIR | 0o777, 2, 1024, lf, order)).unwrap();
        write_dir(&mut fs, lf, &[entry(3, "."), entry(2, "..")]);
        add_root_entry(&mut fs, 2, &entry(3, LOST_AND_FOUND));
        let mut root = fs.inode(ROOT_INODE).unwrap();
        root.nlink = 3;
        fs.write_inode(ROOT_INODE, &root).unwrap();

        // A lost file and a lost directory holding one empty file
        fs.write_inode(4, &inode(S_IFREG | 0o600, 1, 100, data, order)).unwrap();
        fs.write_inode(5, &inode(S_IFDIR | 0o755, 2, 48, dir, order)).unwrap();
        write_dir(&mut fs, dir, &[entry(5, "."), entry(2, ".."), entry(6, "f")]);
        fs.write_inode(6, &inode(S_IFREG | 0o600, 1, 0, 0, order)).unwrap();
        fs.superblock.tinode -= 4;
        fs.mark_superblock();
        fs.flush().unwrap();

        let mut fs = reopen(fs, true);
        let (report, out) = run_check(&mut fs, &options(&["-y"]));
        let report = report.unwrap();
        assert![out.contains("UNREF DIR  I=5"), "{out}"];
        assert![out.contains(" (NOT EMPTY) MUST reconnect")];
        assert![out.contains("DIR I=5 CONNECTED. PARENT WAS I=2")];
        assert![out.contains("UNREF FILE  I=4")];
        assert![out.contains("RECONNECT?  yes")];
        assert![report.modified];
        assert_eq![report.files, 6];

        let mut fs = reopen(fs, false);
        assert_eq![fs.dir_entry(lf as u64, 2).unwrap(), entry(5, "000005")];
        assert_eq![fs.dir_entry(lf as u64, 3).unwrap(), entry(4, "000004")];
        assert_eq![fs.dir_entry(dir as u64, 1).unwrap().ino, 3];
        assert_eq![fs.inode(3).unwrap().nlink, 3];

        let (report, out) = run_check(&mut fs, &options(&["-n"]));
        assert![!out.contains('?'), "{out}"];
        assert![!report.unwrap().modified];
    }

    #[test]
    fn wrong_counts_are_fixed_quietly() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        fs.superblock.tinode += 5;
        fs.superblock.tfree -= 3;
        fs.mark_superblock();
        fs.flush().unwrap();

        let mut fs = reopen(fs, true);
        let (report, out) = run_check(&mut fs, &options(&["-q"]));
        assert![out.contains("FREE INODE COUNT WRONG IN SUPERBLK\nFIXED")];
        assert![out.contains("FREE BLK COUNT WRONG IN SUPERBLK\nFIXED")];
        assert![report.unwrap().modified];
        let fs = reopen(fs, false);
        assert_eq![fs.superblock.tfree, 980];
        assert_eq![fs.superblock.tinode, 238];
    }

    #[test]
    fn salvage_rebuilds_free_list() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        fs.superblock.nfree = 0;
        fs.superblock.tfree = 0;
        fs.mark_superblock();
        fs.flush().unwrap();

        let mut fs = reopen(fs, true);
        let (report, out) = run_check(&mut fs, &options(&["-s4", "-y"]));
        assert![out.contains("** Phase 5 - Check Free List (Ignored)")];
        assert![out.contains("** Phase 6 - Salvage Free List")];
        assert_eq![report.unwrap().free, 1960];

        let mut fs = reopen(fs, false);
        assert_eq![fs.superblock.vinfo[..2], [7, 418]];
        let (report, _) = run_check(&mut fs, &options(&["-n"]));
        assert_eq![report.unwrap().free, 1960];
    }

    #[test]
    fn operator_declines_repairs() {
        let mut fs = open_image(image(2000, Endian::Big), true);
        fs.superblock.tinode += 1;
        fs.mark_superblock();
        fs.flush().unwrap();

        let mut fs = reopen(fs, true);
        let mut input = Cursor::new(b"n\n".to_vec());
        let mut out = Vec::new();
        let report = check(&mut fs, "fs", &options(&[]), &mut input, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert![out.contains("FREE INODE COUNT WRONG IN SUPERBLK\nFIX? ")];
        assert![!report.modified];
    }

    #[test]
    fn option_parsing() {
        let (opts, targets) =
            Options::parse(["-y", "/dev/a", "-s3", "-D", "b"].map(String::from)).unwrap();
        assert![opts.yes && opts.salvage && opts.dir_check];
        assert_eq![(opts.cylinder_size, opts.step_size), (200, 5)];
        assert_eq![targets, vec!["/dev/a", "b"]];

        let (opts, _) = Options::parse(["-S400:9", "-s"].map(String::from)).unwrap();
        assert![!opts.salvage && opts.conditional_salvage && opts.no];
        assert![opts.writable()];
        assert_eq![(opts.cylinder_size, opts.step_size), (400, 9)];

        let (opts, _) = Options::parse(["-s9:400".to_string()]).unwrap();
        assert_eq![(opts.cylinder_size, opts.step_size), (0, 0)];

        assert![Options::parse(["-n", "-s"].map(String::from)).is_err()];
        assert![Options::parse(["-q", "-n"].map(String::from)).is_err()];
        assert![Options::parse(["-x".to_string()]).is_err()];
        assert![Options::parse(["-t".to_string()]).is_err()];
        assert![!options(&["-n"]).writable()];
    }
}
