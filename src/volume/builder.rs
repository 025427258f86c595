//! Planning and writing of new volumes.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::dump::now;
use crate::filesystem::BlockDevice;
use crate::geometry::{AddressMode, BadBlockTable, DiskGeometry};
use crate::structs::*;
use crate::volume::templates::known_header_for;
use crate::volume::{write_all_at, Volume, VolumeOptions};
use crate::{Error, Result};

pub const DEFAULT_CYLINDERS: u32 = 1400;
pub const DEFAULT_HEADS: u32 = 8;
pub const DEFAULT_SECTORS: u32 = 17;
/// Paging space of a fully populated machine
pub const DEFAULT_PAGING: u64 = 4 << 20;
pub const DEFAULT_LOADER_TRACKS: u32 = 4;

/// What to build, as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub loader: Option<PathBuf>,
    pub filesystem: Option<PathBuf>,
    /// Zero takes the value from the input volume, then the default
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub paging: Option<String>,
    pub loader_tracks: u32,
    pub fs_partition: usize,
    pub bad_blocks: bool,
    pub explain: bool,
    pub debug: u32,
    pub help: bool,
}

impl Default for BuildPlan {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            loader: None,
            filesystem: None,
            cylinders: 0,
            heads: 0,
            sectors: 0,
            paging: None,
            loader_tracks: 0,
            fs_partition: DISK_FS_PARTITION,
            bad_blocks: false,
            explain: false,
            debug: 0,
            help: false,
        }
    }
}

impl BuildPlan {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut plan = Self::default();
        let mut args = args.into_iter().peekable();
        while let Some(arg) = args.next() {
            let takes_value = matches!(
                arg.as_str(),
                "-l" | "-f" | "-h" | "-c" | "-s" | "-p" | "-i" | "-o" | "-io"
            );
            if takes_value {
                let any_value = arg != "-h";
                if let Some(value) = args.next_if(|v| any_value || v.parse::<u32>().is_ok()) {
                    plan.set(&arg, value);
                    continue;
                }
            }
            match arg.as_str() {
                "-h" => plan.help = true,
                "-x" => plan.explain = true,
                "-bb" => plan.bad_blocks = true,
                "-nobb" => plan.bad_blocks = false,
                "-F" => plan.floppy(40),
                "-3" => plan.floppy(80),
                "-d" => plan.debug += 1,
                _ => {
                    return Err(Error::Aborted(format!(
                        "unexpected arg '{arg}' or missing value"
                    )))
                }
            }
        }
        Ok(plan)
    }

    fn set(&mut self, flag: &str, value: String) {
        let number = |v: &str| v.trim().parse().unwrap_or(0);
        match flag {
            "-l" => self.loader = Some(value.into()),
            "-f" => self.filesystem = Some(value.into()),
            "-h" => self.heads = number(&value),
            "-c" => self.cylinders = number(&value),
            "-s" => self.sectors = number(&value),
            "-p" => self.paging = Some(value),
            "-i" => self.input = Some(value.into()),
            "-o" => self.output = Some(value.into()),
            _ => {
                self.input = Some(value.clone().into());
                self.output = Some(value.into());
            }
        }
    }

    /// Geometry of a 2 head, 10 sector floppy with its filesystem in partition 1
    pub fn floppy(&mut self, cylinders: u32) {
        self.cylinders = cylinders;
        self.heads = 2;
        self.sectors = 10;
        self.loader_tracks = 1;
        self.fs_partition = FLOPPY_FS_PARTITION;
    }

    /// Whether the output overwrites the input
    pub fn in_place(&self) -> bool {
        matches!((&self.input, &self.output), (Some(i), Some(o)) if i == o)
    }

    /// Work out the layout, filling gaps from `input` and then from the defaults
    pub fn consider(&self, input: Option<&Volume>) -> Result<Layout> {
        let mut loader_len = match &self.loader {
            Some(path) => file_length(path)?,
            None => 0,
        };
        let mut fs_len = match &self.filesystem {
            Some(path) => file_length(path)?,
            None => 0,
        };
        let mut cyls = self.cylinders;
        let mut heads = self.heads;
        let mut pstrk = self.sectors;
        let mut loader_tracks = self.loader_tracks;
        let mut paging_len = 0;
        let mut paging_tracks = 0;
        if let Some(volume) = input {
            let g = &volume.geometry;
            if cyls == 0 {
                cyls = g.cyls;
            }
            if heads == 0 {
                heads = g.heads;
            }
            if pstrk == 0 {
                pstrk = g.pstrk;
            }
            if self.loader.is_none() {
                loader_len = volume.loader_sectors as u64 * SECTOR_SIZE as u64;
                loader_tracks = volume.partition(LOADER_PARTITION)?.tracks;
            }
            if self.filesystem.is_none() {
                fs_len = volume.partition_sectors(volume.fs_partition)? as u64 * SECTOR_SIZE as u64;
            }
            if self.paging.is_none() && !volume.floppy {
                let paging = volume.partition(PAGING_PARTITION)?;
                paging_len = paging.lblks as u64 * SECTOR_SIZE as u64;
                paging_tracks = paging.tracks;
            }
        }
        if cyls == 0 {
            cyls = DEFAULT_CYLINDERS;
        }
        if heads == 0 {
            heads = DEFAULT_HEADS;
        }
        if pstrk == 0 {
            pstrk = DEFAULT_SECTORS;
        }

        if loader_tracks == 0 {
            loader_tracks = if loader_len != 0 {
                tracks_needed(loader_len + 1024, pstrk)
            } else {
                DEFAULT_LOADER_TRACKS
            };
        }
        match &self.paging {
            Some(paging) => paging_len = parse_size(paging),
            None if paging_len == 0 => paging_len = DEFAULT_PAGING,
            None => {}
        }
        if paging_tracks == 0 {
            paging_tracks = tracks_needed(paging_len, pstrk);
        }
        if self.fs_partition == FLOPPY_FS_PARTITION {
            paging_len = 0;
            paging_tracks = 0;
        }

        let tracks = cyls * heads;
        let fs_tracks = tracks
            .checked_sub(loader_tracks + paging_tracks)
            .ok_or_else(|| {
                Error::Aborted(format!(
                    "{tracks} tracks cannot hold {loader_tracks} loader and {paging_tracks} paging tracks"
                ))
            })?;
        let layout = Layout {
            cyls,
            heads,
            pstrk,
            loader_len,
            paging_len,
            fs_len,
            loader_tracks,
            paging_tracks,
            fs_tracks,
            fs_partition: self.fs_partition,
        };
        debug!("{layout:?}");
        Ok(layout)
    }
}

/// Tracks holding `len` bytes; nothing at all still gets the loader default
pub fn tracks_needed(len: u64, pstrk: u32) -> u32 {
    if len == 0 {
        return DEFAULT_LOADER_TRACKS;
    }
    let pstrk = pstrk.max(1) as u64;
    ((len / SECTOR_SIZE as u64 + pstrk - 1) / pstrk) as u32
}

/// Byte count with an optional k or M suffix
pub fn parse_size(text: &str) -> u64 {
    let digits = text.chars().take_while(|c| c.is_ascii_digit()).count();
    let value: u64 = text[..digits].parse().unwrap_or(0);
    match text[digits..].chars().next() {
        Some('k' | 'K') => value * 1024,
        Some('m' | 'M') => value * 1024 * 1024,
        _ => value,
    }
}

fn file_length(path: &Path) -> Result<u64> {
    let meta = std::fs::metadata(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Opened '{}', length {}", path.display(), meta.len());
    Ok(meta.len())
}

/// Geometry and partition sizes of the volume to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub cyls: u32,
    pub heads: u32,
    pub pstrk: u32,
    pub loader_len: u64,
    pub paging_len: u64,
    pub fs_len: u64,
    pub loader_tracks: u32,
    pub paging_tracks: u32,
    pub fs_tracks: u32,
    pub fs_partition: usize,
}

impl Layout {
    pub fn pscyl(&self) -> u32 {
        self.heads * self.pstrk
    }

    /// Sectors on the raw volume
    pub fn sectors(&self) -> u64 {
        self.cyls as u64 * self.heads as u64 * self.pstrk as u64
    }

    /// Bytes left for the filesystem; the output never remaps bad blocks
    pub fn fs_available(&self) -> u64 {
        self.fs_tracks as u64 * self.pstrk as u64 * SECTOR_SIZE as u64
    }

    pub fn fits(&self) -> bool {
        self.fs_len <= self.fs_available()
    }

    /// Summary of the computed layout
    pub fn describe(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let lstrk = self.pstrk.saturating_sub(1);
        writeln!(out, "\nComputed values:")?;
        describe_part(out, 0, self.loader_tracks, lstrk, "loader")?;
        if self.fs_partition == FLOPPY_FS_PARTITION {
            describe_part(out, 1, self.fs_tracks, lstrk, "floppy FS")?;
        } else {
            describe_part(out, 1, self.paging_tracks, lstrk, "paging")?;
            describe_part(out, 2, self.fs_tracks, lstrk, "filesystem")?;
        }
        let sectors = self.sectors();
        writeln!(
            out,
            "Raw volume is {sectors} sectors, {} k {:.2} M",
            sectors * 512 / 1024,
            sectors as f64 * 512.0 / 1024.0 / 1024.0
        )?;
        let avail = self.fs_available();
        writeln!(
            out,
            "Volume can hold a {} block, {:.0} k {:.2} M filesystem",
            avail / 512,
            avail as f64 / 1024.0,
            avail as f64 / 1024.0 / 1024.0
        )?;
        if self.fs_len == 0 {
            writeln!(
                out,
                "Suggest:\n        s4mkfs <fs-file-name> {} 0 {}",
                avail / 512,
                self.pscyl() / 2
            )?;
        }
        if !self.fits() {
            writeln!(
                out,
                "\nFS {:.0}k {:.2}M too big for available disk {:.0}k {:.2}M",
                self.fs_len as f64 / 1024.0,
                self.fs_len as f64 / 1024.0 / 1024.0,
                avail as f64 / 1024.0,
                avail as f64 / 1024.0 / 1024.0
            )?;
        }
        Ok(())
    }

    /// Fresh home block for this layout
    pub fn header(&self) -> VolumeHeader {
        let mut header = VolumeHeader::empty();
        set_fixed_name(&mut header.name, "s4vol");
        header.cyls = self.cyls as u16;
        header.heads = self.heads as u16;
        header.psectrk = self.pstrk as u16;
        header.pseccyl = self.pscyl() as u16;
        header.flags = FLAG_NEW_PARTITION_TABLE;
        header.step = 1;
        header.sectorsz = SECTOR_SIZE as u16;
        header.partab[1] = self.loader_tracks;
        if self.fs_partition == DISK_FS_PARTITION {
            header.partab[2] = self.loader_tracks + self.paging_tracks;
        }
        header.resmap[RES_LOADER] = ReservedArea {
            blkstart: 2,
            nblocks: self.loader_len.div_ceil(BLOCK_SIZE as u64) as u16,
        };
        header.resmap[RES_BAD_BLOCK_TABLE] = ReservedArea {
            blkstart: 1,
            nblocks: 1,
        };
        header.mntname[2][0] = b'/';
        header.time = now();
        if let Some(known) = known_header_for(&header) {
            header.chksum = known.chksum;
        }
        header
    }
}

fn describe_part(out: &mut dyn Write, index: usize, tracks: u32, strk: u32, what: &str) -> std::io::Result<()> {
    let len = tracks as f64 * strk as f64 * 512.0;
    writeln!(
        out,
        "Part[{index}] {tracks:5} tracks, {:8.0} k {:7.2} M for {what}",
        len / 1024.0,
        len / 1024.0 / 1024.0
    )
}

/// Write a volume for `layout` onto `device`, returning it opened with physical addressing
pub fn create(
    mut device: Box<dyn BlockDevice>,
    path: &Path,
    layout: &Layout,
    out: &mut dyn Write,
) -> Result<Volume> {
    let header = layout.header();
    let mut raw = header.serialize(Endian::Big);
    raw.resize(VOLUME_HEADER_AREA, 0);
    write_all_at(device.as_mut(), 0, &raw)?;
    writeln!(out, "Wrote volume header")?;

    let geometry = DiskGeometry::new(
        layout.cyls,
        layout.heads,
        SECTOR_SIZE as u32,
        layout.pscyl(),
    );
    let bbt_ba = header.resmap[RES_BAD_BLOCK_TABLE].blkstart as u32 * SECTORS_PER_BLOCK;
    let table = BadBlockTable::disabled();
    write_all_at(
        device.as_mut(),
        geometry.pba_to_offset(bbt_ba),
        &table.to_bytes(Endian::Big),
    )?;
    writeln!(out, "Wrote anti-bad block table")?;

    let mut volume = Volume::from_device(device, path, true, &VolumeOptions::default())?;
    volume.mode = AddressMode::Physical;
    volume.fs_partition = layout.fs_partition;
    Ok(volume)
}

/// Where a partition's contents come from
#[derive(Debug)]
pub enum Source<'a> {
    File(&'a Path),
    Volume(&'a mut Volume),
}

/// Fill the loader area of partition 0
pub fn install_loader(volume: &mut Volume, source: Source, out: &mut dyn Write) -> Result<u32> {
    writeln!(out, "Installing loader...")?;
    let start = volume.loader_ba;
    install(volume, LOADER_PARTITION, start, source, out, |input| {
        Ok((input.loader_ba, input.loader_sectors, LOADER_PARTITION))
    })
}

/// Fill the filesystem partition
pub fn install_filesystem(volume: &mut Volume, source: Source, out: &mut dyn Write) -> Result<u32> {
    writeln!(out, "Installing filesystem...")?;
    let index = volume.fs_partition;
    install(volume, index, 0, source, out, |input| {
        Ok((0, input.partition_sectors(input.fs_partition)?, input.fs_partition))
    })
}

fn install<F>(
    volume: &mut Volume,
    index: usize,
    start: u32,
    source: Source,
    out: &mut dyn Write,
    extent: F,
) -> Result<u32>
where
    F: FnOnce(&Volume) -> Result<(u32, u32, usize)>,
{
    let room = volume.partition_sectors(index)?.saturating_sub(start);
    match source {
        Source::File(path) => {
            let len = file_length(path)?;
            if len.div_ceil(SECTOR_SIZE as u64) > room as u64 {
                writeln!(
                    out,
                    "File {}k is too big for partition {}k",
                    len.div_ceil(1024),
                    room as u64 * 512 / 1024
                )?;
                return Err(Error::OutOfRange {
                    what: "image length",
                    value: len,
                });
            }
            let mut file = File::open(path).map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
            volume.import(index, start, &mut file)
        }
        Source::Volume(input) => {
            let (from, count, from_index) = extent(input)?;
            writeln!(out, "Source has {count} blocks, {}k", count as u64 * 512 / 1024)?;
            if count > room {
                writeln!(out, "Source {count} blks too big for destination {room} blks")?;
                return Err(Error::OutOfRange {
                    what: "source sectors",
                    value: count as u64,
                });
            }
            volume.transfer(index, start, input, from_index, from, count)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn argument_parsing() {
        let plan = BuildPlan::parse(args(&["-o", "out", "-c", "100", "-h", "4", "-x", "-p", "2M"])).unwrap();
        assert_eq![plan.output, Some(PathBuf::from("out"))];
        assert_eq![(plan.cylinders, plan.heads, plan.sectors), (100, 4, 0)];
        assert_eq![plan.paging.as_deref(), Some("2M")];
        assert![plan.explain];

        let plan = BuildPlan::parse(args(&["-io", "v", "-F"])).unwrap();
        assert![plan.in_place()];
        assert_eq![plan.fs_partition, FLOPPY_FS_PARTITION];
        assert_eq![plan.loader_tracks, 1];

        assert![BuildPlan::parse(args(&["-h"])).unwrap().help];
        assert![BuildPlan::parse(args(&["-q"])).is_err()];
    }

    #[test]
    fn sizes() {
        assert_eq![parse_size("4M"), 4 << 20];
        assert_eq![parse_size("512k"), 512 << 10];
        assert_eq![parse_size("1000"), 1000];
        assert_eq![tracks_needed(0, 17), DEFAULT_LOADER_TRACKS];
        assert_eq![tracks_needed(17 * 512 + 1, 17), 1];
        assert_eq![tracks_needed(18 * 512, 17), 2];
    }

    #[test]
    fn default_layout() {
        let layout = BuildPlan::default().consider(None).unwrap();
        assert_eq![(layout.cyls, layout.heads, layout.pstrk), (1400, 8, 17)];
        assert_eq![layout.loader_tracks, 4];
        assert_eq![layout.paging_tracks, tracks_needed(DEFAULT_PAGING, 17)];
        assert_eq![layout.fs_tracks, 11200 - 4 - layout.paging_tracks];

        let header = layout.header();
        assert_eq![header.partab[..3], [0, 4, 4 + layout.paging_tracks]];
        assert_eq![header.name(), "s4vol"];
        assert_eq![header.mount_name(2), "/"];

        let mut text = Vec::new();
        layout.describe(&mut text).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert![text.contains("Part[2] ")];
        assert![text.contains("Suggest:")];
    }

    #[test]
    fn floppy_has_no_paging() {
        let mut plan = BuildPlan::default();
        plan.floppy(40);
        let layout = plan.consider(None).unwrap();
        assert_eq![layout.paging_tracks, 0];
        assert_eq![layout.fs_tracks, 79];
        assert_eq![layout.header().partab[..3], [0, 1, 0]];
    }

    #[test]
    fn build_and_fill() {
        let mut plan = BuildPlan::default();
        plan.cylinders = 10;
        plan.heads = 2;
        plan.paging = Some("8k".into());
        let layout = plan.consider(None).unwrap();

        let mut fs = tempfile::NamedTempFile::new().unwrap();
        let image: Vec<u8> = (0..3000).map(|i| (i % 253) as u8).collect();
        fs.write_all(&image).unwrap();

        let mut log = Vec::new();
        let device = Box::new(Cursor::new(vec![0u8; layout.sectors() as usize * 512]));
        let mut volume = create(device, Path::new("memory"), &layout, &mut log).unwrap();
        assert_eq![volume.mode, AddressMode::Physical];
        assert_eq![volume.bbt_ba, 2];
        assert![volume.bbt.is_disabled()];
        let copied = install_filesystem(&mut volume, Source::File(fs.path()), &mut log).unwrap();
        assert_eq![copied, 6];

        let mut back = Vec::new();
        volume.export(DISK_FS_PARTITION, 0, 6, &mut back).unwrap();
        assert_eq![back[..3000], image[..]];
        assert![back[3000..].iter().all(|&b| b == 0)];

        let mut copy = create(
            Box::new(Cursor::new(vec![0u8; layout.sectors() as usize * 512])),
            Path::new("copy"),
            &layout,
            &mut log,
        )
        .unwrap();
        let sectors = install_filesystem(&mut copy, Source::Volume(&mut volume), &mut log).unwrap();
        assert_eq![sectors, volume.partition_sectors(DISK_FS_PARTITION).unwrap()];
        let mut again = Vec::new();
        copy.export(DISK_FS_PARTITION, 0, 6, &mut again).unwrap();
        assert_eq![again, back];
    }
}
