//! Interactive browser over the blocks of a filesystem.

use std::io::{BufRead, Write};

use log::debug;

use crate::dump::{hexdump, DEFAULT_WIDTH};
use crate::filesystem::Filesystem;
use crate::structs::*;
use crate::Result;

/// How typed addresses are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// 512-byte sectors from the start of the filesystem
    Sector,
    /// Filesystem blocks
    Block,
    /// Inode numbers
    Inode,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sector => "LBAR",
            Self::Block => "FBLK",
            Self::Inode => "INO",
        })
    }
}

/// Kinds shown by the "all formats" view
const FS_KINDS: [BlockKind; 6] = [
    BlockKind::Super,
    BlockKind::Inode,
    BlockKind::Indirect,
    BlockKind::Directory,
    BlockKind::LinkCount,
    BlockKind::Free,
];

const HELP: &str = "\
NEWLINE:  next address
<number>: specific address
-<number>: backwards address(es)

a:        show all formats
s:        superblock
i:        inode
d:        directory
x:        indirect index
k:        linkcount
f:        freelist
r:        raw disk dump

b:        Address as 512 byte blocks
B:        Address as FS-size blocks
I:        Address Inode number

D:        Goto directory block from inode
j:        jump to inode from dir, dir from inodes
q:        quit
";

#[derive(Debug)]
pub struct Explorer {
    fs: Filesystem,
    unit: Unit,
    kind: BlockKind,
    current: i64,
    /// Address whose block is in `buffer`
    last: Option<i64>,
    buffer: Block,
}

impl Explorer {
    pub fn new(fs: Filesystem) -> Self {
        Self {
            fs,
            unit: Unit::Sector,
            kind: BlockKind::Super,
            current: 1,
            last: None,
            buffer: Block::new(0),
        }
    }

    /// Show the superblock, then serve commands until `q` or end of input
    pub fn run(&mut self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<()> {
        write!(out, "{}", self.fs.superblock)?;
        writeln!(out)?;
        while let Some(line) = self.prompt(input, out)? {
            if !self.execute(line.trim_end_matches(['\n', '\r']), input, out)? {
                break;
            }
        }
        Ok(())
    }

    fn prompt(&self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<Option<String>> {
        write!(out, "{} {} {}: ", self.unit, self.current, self.kind)?;
        out.flush()?;
        read_line(input)
    }

    /// Apply one command line and show the result. Returns false to quit.
    pub fn execute(&mut self, line: &str, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<bool> {
        let first = line.chars().next();
        match first {
            Some('-' | '0'..='9') => {
                let value = leading_number(line);
                if value < 0 {
                    writeln!(out, "NEG {value}!")?;
                    self.current += value;
                } else {
                    self.current = value;
                }
            }
            Some('q' | 'Q') => return Ok(false),
            Some('b') => self.set_unit(Unit::Sector),
            Some('B' | 'F') => self.set_unit(Unit::Block),
            Some('I') => {
                self.set_unit(Unit::Inode);
                self.kind = BlockKind::Inode;
            }
            Some('a') => self.kind = BlockKind::Unknown,
            Some('s') => self.kind = BlockKind::Super,
            Some('i') => self.kind = BlockKind::Inode,
            Some('d') => self.kind = BlockKind::Directory,
            Some('x') => self.kind = BlockKind::Indirect,
            Some('k') => self.kind = BlockKind::LinkCount,
            Some('f') => self.kind = BlockKind::Free,
            Some('r') => self.kind = BlockKind::Raw,
            Some('h' | '?') => {
                write!(out, "{HELP}")?;
                return Ok(true);
            }
            Some('D') => self.directory_of_inode(out)?,
            Some('j') => {
                if !self.jump(input, out)? {
                    return Ok(true);
                }
            }
            _ => self.current = self.last.map_or(0, |last| last + 1),
        }
        self.show(out)?;
        Ok(true)
    }

    fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
        self.last = None;
    }

    fn directory_of_inode(&mut self, out: &mut dyn Write) -> Result<()> {
        if self.unit != Unit::Inode || self.kind != BlockKind::Inode {
            writeln!(out, "\n\nWrong mode for D!")?;
            return Ok(());
        }
        let inode = self.current_inode();
        if inode.is_dir() {
            self.current = inode.block_pointer(0, self.fs.order) as i64;
            self.set_unit(Unit::Block);
            self.kind = BlockKind::Directory;
            writeln!(out, "D curadr {}", self.current)?;
        } else {
            writeln!(out, "INO {} is not a directory!\n", self.current)?;
        }
        Ok(())
    }

    /// Ask where to go from a directory or inode view. False if nothing was read.
    fn jump(&mut self, input: &mut dyn BufRead, out: &mut dyn Write) -> Result<bool> {
        let (question, unit, kind) = match self.kind {
            BlockKind::Directory => ("Jump to ino: ", Unit::Inode, BlockKind::Inode),
            BlockKind::Inode => ("Jump to DIR FBLK: ", Unit::Block, BlockKind::Directory),
            _ => return Ok(true),
        };
        write!(out, "{question}")?;
        out.flush()?;
        let Some(answer) = read_line(input)? else {
            return Ok(false);
        };
        self.current = leading_number(answer.trim());
        self.set_unit(unit);
        self.kind = kind;
        match unit {
            Unit::Inode => writeln!(out, "jumping to inode {}", self.current)?,
            _ => writeln!(out, "jumping to directory at fblk {}", self.current)?,
        }
        Ok(true)
    }

    /// Block and sector holding the current address
    fn position(&self) -> (u64, u64) {
        let current = self.current.max(0) as u64;
        match self.unit {
            Unit::Sector => (current / SECTORS_PER_BLOCK as u64, current),
            Unit::Block => (current, current * SECTORS_PER_BLOCK as u64),
            Unit::Inode => {
                let block = inode_block(current.max(1) as u32) as u64;
                (block, block * SECTORS_PER_BLOCK as u64)
            }
        }
    }

    fn current_inode(&self) -> DiskInode {
        let slot = inode_slot(self.current.max(1) as u32);
        self.buffer.record(slot * INODE_SIZE, self.fs.order)
    }

    fn show(&mut self, out: &mut dyn Write) -> Result<()> {
        let (block, sector) = self.position();
        let offset = sector * SECTOR_SIZE as u64;
        writeln!(out, "\nLBAR: {sector}  FBLK: {block} offset {offset}")?;
        if self.last != Some(self.current) || self.unit == Unit::Inode {
            if let Err(e) = self.fs.read_sectors(sector as u32, &mut self.buffer.data) {
                writeln!(
                    out,
                    "err {e} reading {} {} at {offset}",
                    self.unit, self.current
                )?;
                self.last = None;
                return Ok(());
            }
            self.buffer.index = block;
            self.last = Some(self.current);
            debug!("Read block {block} at sector {sector}");
        }

        let order = self.fs.order;
        let single_inode = self.unit == Unit::Inode && self.kind == BlockKind::Inode;
        if single_inode {
            writeln!(
                out,
                "\nShowing INO {} from FBLK {block} LBAR {sector} idx {}",
                self.current,
                inode_slot(self.current.max(1) as u32)
            )?;
        } else if self.kind == BlockKind::Inode {
            writeln!(
                out,
                "\nShowing FBLK {block} LBAR {sector} starting at inode {}",
                (block.saturating_sub(2)) * INODES_PER_BLOCK as u64 + 1
            )?;
        } else {
            writeln!(out, "\nShowing {} {} {}: ", self.unit, self.current, self.kind)?;
        }

        match self.kind {
            BlockKind::Unknown => {
                for kind in FS_KINDS {
                    writeln!(out, "--- as {kind}")?;
                    write!(out, "{}", self.buffer.view(kind, order).describe(order))?;
                }
                self.dump(out)?;
            }
            BlockKind::Raw => self.dump(out)?,
            _ if single_inode => {
                let ino = self.current.max(1) as u32;
                write!(out, "{}", self.current_inode().describe(ino, order))?;
            }
            kind => write!(out, "{}", self.buffer.view(kind, order).describe(order))?,
        }
        Ok(())
    }

    fn dump(&self, out: &mut dyn Write) -> Result<()> {
        let mut text = Vec::new();
        hexdump(&mut text, &self.buffer.data, DEFAULT_WIDTH, 0)?;
        out.write_all(&text)?;
        Ok(())
    }
}

fn read_line(input: &mut dyn BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    match input.read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

/// Signed leading number of a command, zero if there is none
fn leading_number(text: &str) -> i64 {
    let sign = usize::from(text.starts_with('-'));
    let digits = text[sign..].chars().take_while(|c| c.is_ascii_digit()).count();
    text[..sign + digits].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::filesystem::tests::{image, open_image};

    fn session(script: &str) -> String {
        let fs = open_image(image(2000, Endian::Big), false);
        let mut explorer = Explorer::new(fs);
        let mut input = Cursor::new(script.as_bytes().to_vec());
        let mut out = Vec::new();
        explorer.run(&mut input, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn addresses_and_units() {
        let out = session("\n\nB\n5\nq\n");
        assert![out.starts_with("Superblock:")];
        assert![out.contains("LBAR 1 super: ")];
        assert![out.contains("\nLBAR: 0  FBLK: 0 offset 0\n")];
        assert![out.contains("\nLBAR: 1  FBLK: 0 offset 512\n")];
        assert![out.contains("\nLBAR: 10  FBLK: 5 offset 5120\n")];
        assert![out.contains("FBLK 5 super: ")];
    }

    #[test]
    fn inode_to_directory() {
        let out = session("I\n2\nD\nj\n2\nq\n");
        assert![out.contains("Showing INO 2 from FBLK 2 LBAR 4 idx 1")];
        assert![out.contains("inode     2: d0777 links 2")];
        assert![out.contains("D curadr ")];
        assert![out.contains("Directory:\n")];
        assert![out.contains("      2 ..\n")];
        assert![out.contains("Jump to ino: jumping to inode 2")];
    }

    #[test]
    fn wrong_mode_and_help() {
        let out = session("D\nh\n-1\n");
        assert![out.contains("Wrong mode for D!")];
        assert![out.contains("D:        Goto directory block from inode")];
        assert![out.contains("NEG -1!")];
    }

    #[test]
    fn numbers() {
        assert_eq![leading_number("12abc"), 12];
        assert_eq![leading_number("-3"), -3];
        assert_eq![leading_number("x"), 0];
    }
}
