use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::dump::{hexdump, DEFAULT_WIDTH};
use crate::filesystem::BlockDevice;
use crate::geometry::{AddressMode, BadBlockTable, DiskGeometry};
use crate::structs::*;
use crate::{Error, Result};

pub mod builder;
mod partition;
pub mod templates;

pub use partition::decode_partitions;

/// Environment override for [`VolumeOptions::sentinel_exempt_sectors`]
pub const SENTINEL_EXEMPT_ENV: &str = "S4_SENTINEL_EXEMPT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Sectors per track for which a "no remapping" table keeps logical addressing
    pub sentinel_exempt_sectors: Vec<u16>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            sentinel_exempt_sectors: vec![17],
        }
    }
}

impl VolumeOptions {
    /// Defaults, overridden by `S4_SENTINEL_EXEMPT` as a comma separated list
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(list) = std::env::var(SENTINEL_EXEMPT_ENV) {
            options.sentinel_exempt_sectors = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            debug!(
                "Sentinel exempt sectors {:?}",
                options.sentinel_exempt_sectors
            );
        }
        options
    }
}

/// An opened disk volume: home block, geometry, partitions and bad block table
#[derive(Debug)]
pub struct Volume {
    pub(crate) path: PathBuf,
    pub(crate) device: Box<dyn BlockDevice>,
    pub header: VolumeHeader,
    /// Whether on-disk structures are in the foreign byte order
    pub swapped: bool,
    pub geometry: DiskGeometry,
    pub partitions: Vec<Partition>,
    pub mode: AddressMode,
    pub fs_partition: usize,
    pub floppy: bool,
    /// Loader position and length in sectors
    pub loader_ba: u32,
    pub loader_sectors: u32,
    /// Bad block table position and length in sectors
    pub bbt_ba: u32,
    pub bbt_sectors: u32,
    pub bbt: BadBlockTable,
    pub checksum: i32,
    pub writable: bool,
}

impl Volume {
    /// Open a volume file
    pub fn open<P: AsRef<Path>>(path: P, writable: bool, options: &VolumeOptions) -> Result<Self> {
        let path = path.as_ref();
        let device = open_device(path, writable)?;
        Self::from_device(Box::new(device), path, writable, options)
    }

    /// Parse the home block of `device` and set up translation
    pub fn from_device(
        mut device: Box<dyn BlockDevice>,
        path: &Path,
        writable: bool,
        options: &VolumeOptions,
    ) -> Result<Self> {
        let mut raw = vec![0u8; VOLUME_HEADER_AREA];
        read_exact_at(device.as_mut(), 0, &mut raw)?;
        let (header, swapped) = match VolumeHeader::parse(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Unrecognized volume header:\n{}", header_dump(&raw));
                return Err(e);
            }
        };
        let checksum = checksum(&raw);
        info!(
            "Volume header checksum {:#x}, computed sum {:#x} (not enforced)",
            header.chksum, checksum
        );

        let geometry = DiskGeometry::new(
            header.cyls as u32,
            header.heads as u32,
            header.sectorsz as u32,
            header.pseccyl as u32,
        );
        if geometry.pstrk != header.psectrk as u32 || geometry.pscyl != header.pseccyl as u32 {
            warn!(
                "Computed sectors/track {} differs from reported {}",
                geometry.pstrk, header.psectrk
            );
        }
        let partitions = decode_partitions(&header, &geometry)?;
        let floppy = header.is_floppy();
        let mut volume = Self {
            path: path.to_path_buf(),
            device,
            swapped,
            geometry,
            partitions,
            mode: if floppy {
                AddressMode::Physical
            } else {
                AddressMode::Logical
            },
            fs_partition: if floppy {
                FLOPPY_FS_PARTITION
            } else {
                DISK_FS_PARTITION
            },
            floppy,
            loader_ba: (header.resmap[RES_LOADER].blkstart.max(0) as u32) * SECTORS_PER_BLOCK,
            loader_sectors: header.resmap[RES_LOADER].nblocks as u32 * SECTORS_PER_BLOCK,
            bbt_ba: (header.resmap[RES_BAD_BLOCK_TABLE].blkstart.max(0) as u32)
                * SECTORS_PER_BLOCK,
            bbt_sectors: header.resmap[RES_BAD_BLOCK_TABLE].nblocks as u32 * SECTORS_PER_BLOCK,
            bbt: BadBlockTable::default(),
            header,
            checksum,
            writable,
        };
        if !floppy {
            volume.read_bad_block_table(options)?;
        }
        Ok(volume)
    }

    /// Wrap a bare filesystem image as partition 2 of a one-track volume
    pub fn plain_image(mut device: Box<dyn BlockDevice>, path: &Path, writable: bool) -> Result<Self> {
        let size = device.seek(SeekFrom::End(0))?;
        let sectors = (size / SECTOR_SIZE as u64 + 1) as u32;
        let geometry = DiskGeometry::new(1, 1, SECTOR_SIZE as u32, sectors);
        let partitions = vec![
            Partition::new(&geometry, 0, 0),
            Partition::new(&geometry, 0, 0),
            Partition::new(&geometry, 0, 1),
        ];
        debug!("Plain image of {size} bytes as a {sectors} sector track");
        Ok(Self {
            path: path.to_path_buf(),
            device,
            header: VolumeHeader::empty(),
            swapped: false,
            geometry,
            partitions,
            mode: AddressMode::Physical,
            fs_partition: DISK_FS_PARTITION,
            floppy: false,
            loader_ba: 0,
            loader_sectors: 0,
            bbt_ba: 0,
            bbt_sectors: 0,
            bbt: BadBlockTable::default(),
            checksum: 0,
            writable,
        })
    }

    /// Byte order of on-disk volume structures
    pub fn order(&self) -> Endian {
        if self.swapped {
            Endian::native().swapped()
        } else {
            Endian::native()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_bad_block_table(&mut self, options: &VolumeOptions) -> Result<()> {
        if self.bbt_ba == 0 {
            return Ok(());
        }
        let offset = self
            .geometry
            .pba_to_offset(self.geometry.lba_to_pba(self.bbt_ba, &BadBlockTable::default()));
        let mut raw = vec![0u8; BAD_BLOCK_TABLE_SIZE];
        self.read_at(offset, &mut raw)?;
        self.bbt = BadBlockTable::from_bytes(&raw, self.order());
        info!("Bad block table checksum {:#x}", self.bbt.entries[0].cyl);
        if self.bbt.is_disabled() {
            let exempt = options
                .sentinel_exempt_sectors
                .contains(&(self.geometry.pstrk as u16));
            if exempt {
                debug!(
                    "Remapping off but {} sectors/track keeps logical addressing",
                    self.geometry.pstrk
                );
            } else {
                info!("Bad block remapping is off, using physical addressing");
                self.mode = AddressMode::Physical;
            }
        }
        debug!("{} bad block table entries", self.bbt.len());
        Ok(())
    }

    /// Positioned read of exactly `buf.len()` bytes
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        read_exact_at(self.device.as_mut(), offset, buf)
    }

    /// Positioned write of all of `buf`
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        write_all_at(self.device.as_mut(), offset, buf)
    }

    pub fn partition(&self, index: usize) -> Result<&Partition> {
        self.partitions.get(index).ok_or(Error::OutOfRange {
            what: "partition",
            value: index as u64,
        })
    }

    /// Addressable sectors of a partition in the current mode
    pub fn partition_sectors(&self, index: usize) -> Result<u32> {
        let partition = self.partition(index)?;
        Ok(match self.mode {
            AddressMode::Logical => partition.lblks,
            AddressMode::Physical => partition.pblks,
        })
    }

    /// Byte offset of a partition-relative sector
    pub fn sector_offset(&self, index: usize, sector: u32) -> Result<u64> {
        let partition = self.partition(index)?;
        Ok(match self.mode {
            AddressMode::Logical => {
                let lba = sector_after(partition.partlba, sector)?;
                self.geometry
                    .pba_to_offset(self.geometry.lba_to_pba(lba, &self.bbt))
            }
            AddressMode::Physical => self
                .geometry
                .pba_to_offset(sector_after(partition.partpba, sector)?),
        })
    }

    pub fn read_sector(&mut self, index: usize, sector: u32, buf: &mut [u8]) -> Result<()> {
        let offset = self.sector_offset(index, sector)?;
        self.read_at(offset, buf)
    }

    pub fn write_sector(&mut self, index: usize, sector: u32, buf: &[u8]) -> Result<()> {
        let offset = self.sector_offset(index, sector)?;
        self.write_at(offset, buf)
    }

    /// Copy 512-byte units from `reader` into a partition starting at sector `start`.
    /// A trailing partial unit is zero padded.
    pub fn import<R: Read>(&mut self, index: usize, start: u32, reader: &mut R) -> Result<u32> {
        let limit = self.partition_sectors(index)?;
        let mut buf = [0u8; SECTOR_SIZE];
        let mut done = 0u32;
        loop {
            let len = fill(reader, &mut buf).map_err(|e| Error::incomplete(done, e.into()))?;
            if len == 0 {
                break;
            }
            let sector = sector_after(start, done).map_err(|e| Error::incomplete(done, e))?;
            if sector >= limit {
                return Err(Error::incomplete(
                    done,
                    Error::OutOfRange {
                        what: "partition sector",
                        value: sector as u64,
                    },
                ));
            }
            buf[len..].fill(0);
            self.write_sector(index, sector, &buf)
                .map_err(|e| Error::incomplete(done, e))?;
            done += 1;
            if done % 1000 == 0 {
                debug!("Imported {done} sectors");
            }
        }
        info!(
            "Imported {done} {:?} sectors into partition {index}",
            self.mode
        );
        Ok(done)
    }

    /// Copy `count` sectors of a partition starting at sector `start` to `writer`
    pub fn export<W: Write>(&mut self, index: usize, start: u32, count: u32, writer: &mut W) -> Result<u32> {
        let mut buf = [0u8; SECTOR_SIZE];
        for done in 0..count {
            sector_after(start, done)
                .and_then(|sector| self.read_sector(index, sector, &mut buf))
                .map_err(|e| Error::incomplete(done, e))?;
            writer
                .write_all(&buf)
                .map_err(|e| Error::incomplete(done, e.into()))?;
        }
        info!(
            "Exported {count} {:?} sectors from partition {index}",
            self.mode
        );
        Ok(count)
    }

    /// Copy `count` sectors from a partition of `source` into a partition of this volume
    pub fn transfer(
        &mut self,
        index: usize,
        start: u32,
        source: &mut Volume,
        source_index: usize,
        source_start: u32,
        count: u32,
    ) -> Result<u32> {
        let mut buf = [0u8; SECTOR_SIZE];
        for done in 0..count {
            sector_after(source_start, done)
                .and_then(|sector| source.read_sector(source_index, sector, &mut buf))
                .map_err(|e| Error::incomplete(done, e))?;
            sector_after(start, done)
                .and_then(|sector| self.write_sector(index, sector, &buf))
                .map_err(|e| Error::incomplete(done, e))?;
        }
        info!("Transferred {count} {:?} sectors", self.mode);
        Ok(count)
    }

    /// Write the home block in the volume's byte order, padded to 1 KiB
    pub fn write_header(&mut self) -> Result<()> {
        let mut raw = self.header.serialize(self.order());
        raw.resize(VOLUME_HEADER_AREA, 0);
        self.write_at(0, &raw)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.device.flush()?;
        Ok(())
    }

    /// Report geometry, partitions, reserved areas and bad block table
    pub fn show<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let g = &self.geometry;
        writeln!(out, "Showing disk header from '{}'", self.path.display())?;
        writeln!(
            out,
            "Magic {:x} {} {:x}, checksum {:x} (unchecked) {}",
            self.header.magic,
            if self.header.magic == VOLUME_MAGIC { "is" } else { "IS NOT" },
            VOLUME_MAGIC,
            self.header.chksum,
            if self.swapped { "SWAPPED" } else { "no swap needed" }
        )?;
        writeln!(
            out,
            " {} cyls, {} heads; {} s/trk, {} s/cyl; step {}, {} byte sectors",
            g.cyls, g.heads, g.pstrk, g.pscyl, self.header.step, g.sector_size
        )?;
        let bytes = g.pblks as u64 * g.sector_size as u64;
        writeln!(
            out,
            " {} blocks, {}k bytes {}M bytes",
            g.pblks,
            bytes / 1024,
            bytes / 1024 / 1024
        )?;
        let name: String = self
            .header
            .name
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        let flags = self.header.flags;
        writeln!(
            out,
            "Name '{name}'  flags 0x{flags:x}  {}  {}  {}  {} ",
            if flags & FLAG_FP_DENSITY != 0 { "DD" } else { "SD" },
            if flags & FLAG_FP_MIXED_DENSITY != 0 { "MIXED" } else { "SAME" },
            if flags & FLAG_HITECH != 0 { "HEADSEL3" } else { "PRECOMP" },
            if flags & FLAG_NEW_PARTITION_TABLE != 0 { "NEWTAB" } else { "OLDTAB" },
        )?;
        writeln!(
            out,
            "Loader is {} blocks at PBA {}",
            self.loader_sectors, self.loader_ba
        )?;
        writeln!(
            out,
            "Bad Block Table is {} blocks at PBA {}",
            self.bbt_sectors, self.bbt_ba
        )?;
        writeln!(out, "\nPartitions: ({})", self.partitions.len())?;
        writeln!(
            out,
            "Num  STrk  Ntrk  PBA   LBA  Cyl     Offset   PSects      PSize        LSects      LSize"
        )?;
        writeln!(
            out,
            "---  ----  ---- ----- ----- ----  ---------  ------- ---------------  ------- ---------------"
        )?;
        for (i, p) in self.partitions.iter().enumerate() {
            let psize = p.pblks as u64 * g.sector_size as u64;
            let lsize = p.lblks as u64 * g.sector_size as u64;
            writeln!(
                out,
                "{:3} {:5} {:5} {:5} {:5} {:4} {:10} {:8} {:6}k {:6.2}M {:8} {:6}k {:6.2}M",
                i,
                p.start_track,
                p.tracks,
                g.track_to_pba(p.start_track),
                g.track_to_lba(p.start_track),
                g.track_to_cyl(p.start_track),
                p.partoff,
                p.pblks,
                psize / 1024,
                psize as f64 / 1024.0 / 1024.0,
                p.lblks,
                lsize / 1024,
                lsize as f64 / 1024.0 / 1024.0
            )?;
        }
        writeln!(out, "\nSpecial sections in part 0")?;
        writeln!(out, "  Resmap:")?;
        for (i, area) in self.header.resmap.iter().enumerate() {
            if area.blkstart != 0 {
                writeln!(
                    out,
                    "  [{i}] at FSBLK {}, blocks {}",
                    area.blkstart, area.nblocks
                )?;
            }
        }
        writeln!(out)?;
        self.show_bad_blocks(out)
    }

    fn show_bad_blocks<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        if self.floppy {
            return Ok(());
        }
        if self.bbt.is_disabled() {
            return writeln!(out, "Bad block mapping is turned OFF");
        }
        let g = &self.geometry;
        writeln!(
            out,
            "Bad Block table at blk {} sum 0x{:x} {} entries",
            self.bbt_ba,
            self.bbt.entries[0].cyl,
            self.bbt.len()
        )?;
        writeln!(out, " Cyl  cylsec  head  sec     cyl  head  nxt")?;
        writeln!(out, "----  ------  ----  ---     ---  ----  ---")?;
        let mut shown = 0;
        for entry in self.bbt.entries.iter().take(self.bbt.len()).skip(1) {
            let cylsec = entry.badblk as u32;
            let altblk = entry.altblk as u32;
            writeln!(
                out,
                "{:4}: {:6}  {:4} {:4} -> {:4} {:5} {:4}",
                entry.cyl,
                cylsec,
                cylsec.checked_div(g.pstrk).unwrap_or(0),
                cylsec.checked_rem(g.pstrk).unwrap_or(0),
                altblk.checked_div(g.heads).unwrap_or(0),
                altblk.checked_rem(g.heads).unwrap_or(0),
                entry.nxtind
            )?;
            shown += 1;
        }
        writeln!(out, "{shown} bad blocks\n")
    }

    /// List every physical sector with its addresses and contents
    pub fn dump_sectors<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let g = self.geometry;
        let mut part = 0usize;
        let mut pbase = 0u32;
        let mut lbase = 0u32;
        let mut buf = [0u8; SECTOR_SIZE];
        for pba in 0..g.pblks {
            if let Some(next) = self.partitions.get(part + 1) {
                if pba == next.partpba {
                    part += 1;
                    pbase = next.partpba;
                    lbase = next.partlba;
                }
            }
            let offset = g.pba_to_offset(pba);
            if self.read_at(offset, &mut buf).is_err() {
                break;
            }
            let lba = g.pba_to_lba(pba, &self.bbt);
            let hdsec = g.pba_to_hdsec(pba);
            writeln!(
                out,
                "\nPBAA {:<7} LBAA {:<7} Part {}: PBAR {:<7} LBAR {:<7} FSPBAR {:<7} FSLBAR {:<7} offset {} -- HDSEC {}/{} -- {}",
                pba,
                lba,
                part,
                pba.wrapping_sub(pbase) as i32,
                lba.wrapping_sub(lbase) as i32,
                pba.wrapping_sub(pbase) as i32 / 2,
                lba.wrapping_sub(lbase) as i32 / 2,
                offset,
                hdsec,
                g.pstrk.saturating_sub(1),
                if g.is_spare(pba) { "SPARE" } else { "data" }
            )?;
            hexdump(out, &buf, 0, 0)?;
        }
        Ok(())
    }
}

/// Hex dump of the volume header record in `raw`
pub fn header_dump(raw: &[u8]) -> String {
    let mut text = Vec::new();
    let record = &raw[..raw.len().min(VOLUME_HEADER_SIZE)];
    if hexdump(&mut text, record, DEFAULT_WIDTH, 0).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&text).into_owned()
}

/// Dump the home block of the file at `path`, whatever it holds
pub fn home_block_dump<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut device = open_device(path.as_ref(), false)?;
    let mut raw = vec![0u8; VOLUME_HEADER_AREA];
    read_exact_at(&mut device, 0, &mut raw)?;
    Ok(header_dump(&raw))
}

fn open_device(path: &Path, writable: bool) -> Result<std::fs::File> {
    std::fs::File::options()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn seek_to(device: &mut dyn BlockDevice, offset: u64) -> Result<()> {
    match device.seek(SeekFrom::Start(offset)) {
        Ok(at) if at == offset => Ok(()),
        Ok(at) => Err(Error::Seek {
            offset,
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("landed at {at}"),
            ),
        }),
        Err(source) => Err(Error::Seek { offset, source }),
    }
}

/// Sector `done` places after `start`
fn sector_after(start: u32, done: u32) -> Result<u32> {
    start.checked_add(done).ok_or(Error::OutOfRange {
        what: "partition sector",
        value: start as u64 + done as u64,
    })
}

/// Read until `buf` is full or the reader is exhausted
pub(crate) fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

pub(crate) fn read_exact_at(device: &mut dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<()> {
    seek_to(device, offset)?;
    let got = fill(device, buf)?;
    if got != buf.len() {
        return Err(Error::ShortRead {
            offset,
            wanted: buf.len(),
            got,
        });
    }
    Ok(())
}

pub(crate) fn write_all_at(device: &mut dyn BlockDevice, offset: u64, buf: &[u8]) -> Result<()> {
    seek_to(device, offset)?;
    let mut done = 0;
    while done < buf.len() {
        match device.write(&buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if done != buf.len() {
        return Err(Error::ShortWrite {
            offset,
            wanted: buf.len(),
            got: done,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;

    /// In-memory hard disk with `cyls` cylinders, 2 heads, 17 sectors/track.
    /// Partitions start at tracks 0, 2 and 4.
    pub(crate) fn disk_image(cyls: u16, table: &BadBlockTable, order: Endian) -> Vec<u8> {
        let mut header = VolumeHeader::empty();
        set_fixed_name(&mut header.name, "WINCHE");
        header.cyls = cyls;
        header.heads = 2;
        header.psectrk = 17;
        header.pseccyl = 34;
        header.sectorsz = 512;
        header.flags = FLAG_NEW_PARTITION_TABLE;
        header.partab[1] = 2;
        header.partab[2] = 4;
        header.resmap[RES_LOADER] = ReservedArea {
            blkstart: 2,
            nblocks: 4,
        };
        header.resmap[RES_BAD_BLOCK_TABLE] = ReservedArea {
            blkstart: 1,
            nblocks: 1,
        };
        let mut image = vec![0u8; cyls as usize * 34 * 512];
        let raw = header.serialize(order);
        image[..raw.len()].copy_from_slice(&raw);
        let bbt = table.to_bytes(order);
        image[1024..1024 + bbt.len()].copy_from_slice(&bbt);
        image
    }

    pub(crate) fn open_image(image: Vec<u8>, options: &VolumeOptions) -> Result<Volume> {
        Volume::from_device(
            Box::new(Cursor::new(image)),
            Path::new("memory"),
            true,
            options,
        )
    }

    #[test]
    fn open_disk() {
        let mut table = BadBlockTable::default();
        table.entries[0].cyl = 0x4321;
        let volume = open_image(disk_image(10, &table, Endian::Big), &VolumeOptions::default()).unwrap();
        assert_eq![volume.geometry.pstrk, 17];
        assert_eq![volume.partitions.len(), 3];
        assert_eq![volume.fs_partition, DISK_FS_PARTITION];
        assert_eq![volume.mode, AddressMode::Logical];
        assert_eq![volume.loader_ba, 4];
        assert_eq![volume.bbt_ba, 2];
        assert_eq![volume.bbt.len(), 1];
        assert_eq![volume.swapped, Endian::Big.needs_swap()];
    }

    #[test]
    fn sentinel_switches_to_physical() {
        let table = BadBlockTable::disabled();
        let image = disk_image(10, &table, Endian::Little);
        let exempt = open_image(image.clone(), &VolumeOptions::default()).unwrap();
        assert_eq![exempt.mode, AddressMode::Logical];
        let options = VolumeOptions {
            sentinel_exempt_sectors: vec![],
        };
        let volume = open_image(image, &options).unwrap();
        assert_eq![volume.mode, AddressMode::Physical];
        assert_eq![volume.sector_offset(2, 16).unwrap(), (4 * 17 + 16) * 512];
    }

    #[test]
    fn logical_offsets_skip_spares() {
        let volume = open_image(
            disk_image(10, &BadBlockTable::default(), Endian::Big),
            &VolumeOptions::default(),
        )
        .unwrap();
        assert_eq![volume.sector_offset(2, 0).unwrap(), 4 * 17 * 512];
        assert_eq![volume.sector_offset(2, 16).unwrap(), (5 * 17) * 512];
        assert![volume.sector_offset(9, 0).is_err()];
    }

    #[test]
    fn import_export_round_trip() {
        let mut volume = open_image(
            disk_image(10, &BadBlockTable::default(), Endian::Big),
            &VolumeOptions::default(),
        )
        .unwrap();
        let data: Vec<u8> = (0..40 * 512 + 100).map(|i| (i % 251) as u8).collect();
        let imported = volume.import(2, 0, &mut Cursor::new(&data)).unwrap();
        assert_eq![imported, 41];
        let mut out = Vec::new();
        assert_eq![volume.export(2, 0, 41, &mut out).unwrap(), 41];
        assert_eq![out[..data.len()], data[..]];
        assert![out[data.len()..].iter().all(|&b| b == 0)];
    }

    #[test]
    fn import_refuses_overflow() {
        let mut volume = open_image(
            disk_image(3, &BadBlockTable::default(), Endian::Big),
            &VolumeOptions::default(),
        )
        .unwrap();
        assert_eq![volume.partition_sectors(1).unwrap(), 32];
        let data = vec![1u8; 40 * 512];
        match volume.import(1, 0, &mut Cursor::new(&data)) {
            Err(Error::Incomplete { completed, source }) => {
                assert_eq![completed, 32];
                assert![matches![*source, Error::OutOfRange { .. }]];
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn export_reports_progress_on_failure() {
        let mut volume = open_image(
            disk_image(3, &BadBlockTable::default(), Endian::Big),
            &VolumeOptions::default(),
        )
        .unwrap();
        let mut out = Vec::new();
        match volume.export(2, 30, 10, &mut out) {
            Err(Error::Incomplete { completed, source }) => {
                assert_eq![completed, 2];
                assert![matches![*source, Error::ShortRead { .. }]];
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transfer_between_volumes() {
        let image = disk_image(10, &BadBlockTable::default(), Endian::Big);
        let mut source = open_image(image.clone(), &VolumeOptions::default()).unwrap();
        let data = vec![0x5au8; 3 * 512];
        source.import(2, 5, &mut Cursor::new(&data)).unwrap();
        let mut target = open_image(image, &VolumeOptions::default()).unwrap();
        assert_eq![target.transfer(2, 0, &mut source, 2, 5, 3).unwrap(), 3];
        let mut buf = [0u8; 512];
        target.read_sector(2, 2, &mut buf).unwrap();
        assert_eq![buf, [0x5au8; 512]];
    }

    #[test]
    fn unrecognized_header_is_dumped() {
        let mut raw = vec![0u8; VOLUME_HEADER_AREA];
        raw[..8].copy_from_slice(b"garbage!");
        raw[VOLUME_HEADER_SIZE] = 0xff;
        let text = header_dump(&raw);
        let lines: Vec<&str> = text.lines().collect();
        assert![lines[0].starts_with(" Dec Hex  0 1 2 3")];
        assert![lines[1].starts_with("   0 000 6761726261676521 ")];
        assert![lines[1].ends_with("   garbage!........................")];
        assert_eq![lines.len(), 1 + (VOLUME_HEADER_SIZE + 31) / 32];
        assert![!text.contains("ff")];

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), &raw).unwrap();
        assert![matches![
            Volume::open(file.path(), false, &VolumeOptions::default()),
            Err(Error::BadMagic { .. })
        ]];
        assert_eq![home_block_dump(file.path()).unwrap(), text];
    }

    #[test]
    fn sector_numbers_do_not_wrap() {
        let mut volume = open_image(
            disk_image(3, &BadBlockTable::default(), Endian::Big),
            &VolumeOptions::default(),
        )
        .unwrap();
        let mut out = Vec::new();
        match volume.export(2, u32::MAX - 1, 2, &mut out) {
            Err(Error::Incomplete { completed, source }) => {
                assert_eq![completed, 0];
                assert![matches![*source, Error::OutOfRange { .. }]];
            }
            other => panic!("unexpected {other:?}"),
        }
        let data = vec![7u8; 2 * 512];
        match volume.import(2, u32::MAX, &mut Cursor::new(&data)) {
            Err(Error::Incomplete { completed, source }) => {
                assert_eq![completed, 0];
                assert![matches![*source, Error::OutOfRange { .. }]];
            }
            other => panic!("unexpected {other:?}"),
        }
        assert![volume.sector_offset(2, u32::MAX).is_err()];
        assert_eq![sector_after(u32::MAX - 1, 1).unwrap(), u32::MAX];
    }

    #[test]
    fn header_rewrite_keeps_byte_order() {
        let mut volume = open_image(
            disk_image(10, &BadBlockTable::default(), Endian::Little),
            &VolumeOptions::default(),
        )
        .unwrap();
        set_fixed_name(&mut volume.header.name, "RENAME");
        volume.write_header().unwrap();
        let mut raw = vec![0u8; VOLUME_HEADER_AREA];
        volume.read_at(0, &mut raw).unwrap();
        let (header, swapped) = VolumeHeader::parse(&raw).unwrap();
        assert_eq![fixed_name(&header.name), "RENAME"];
        assert_eq![swapped, Endian::Little.needs_swap()];
        assert_eq![header.partab[2], 4];
    }

    #[test]
    fn plain_image_covers_file() {
        let volume = Volume::plain_image(
            Box::new(Cursor::new(vec![0u8; 4096])),
            Path::new("fs"),
            false,
        )
        .unwrap();
        assert_eq![volume.fs_partition, 2];
        assert_eq![volume.partition_sectors(2).unwrap(), 9];
        assert_eq![volume.sector_offset(2, 3).unwrap(), 1536];
    }

    #[test]
    fn show_and_dump() {
        let mut table = BadBlockTable::default();
        table.entries[0].cyl = 1;
        table.entries[1] = BadBlockEntry {
            cyl: 1,
            badblk: 3,
            altblk: 5,
            nxtind: 0,
        };
        let mut volume = open_image(disk_image(3, &table, Endian::Big), &VolumeOptions::default()).unwrap();
        let mut out = Vec::new();
        volume.show(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert![text.contains("Partitions: (3)")];
        assert![text.contains("1 bad blocks")];
        let mut out = Vec::new();
        volume.dump_sectors(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq![text.matches("SPARE").count(), 6];
        assert![text.contains("PBAA 16      LBAA ")];
    }
}
