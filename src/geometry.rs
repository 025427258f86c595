//! Cylinder/head/sector arithmetic for volumes that reserve the last
//! sector of every track as a spare for bad-block sparing.
//!
//! Physical block addresses (PBA) count every sector. Logical block
//! addresses (LBA) skip the spare, so a track holds one logical sector
//! fewer than it holds physical ones.

use log::{debug, warn};

use crate::structs::{
    BadBlockEntry, DiskRecord, Endian, BAD_BLOCK_ENTRIES, BAD_BLOCK_TABLE_SIZE,
    NO_BAD_BLOCK_CHECKSUM,
};

/// How sector numbers inside a partition are translated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Spare sectors are skipped and the bad block table applies
    Logical,
    /// Every sector is addressed, no remapping
    Physical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cyls: u32,
    pub heads: u32,
    pub sector_size: u32,
    /// Physical sectors per track
    pub pstrk: u32,
    /// Logical sectors per track
    pub lstrk: u32,
    /// Physical sectors per cylinder
    pub pscyl: u32,
    /// Logical sectors per cylinder
    pub lscyl: u32,
    /// Physical sectors on the volume
    pub pblks: u32,
    /// Logical sectors on the volume
    pub lblks: u32,
    pub ptrk_size: u64,
    pub ltrk_size: u64,
    pub pcyl_size: u64,
    pub lcyl_size: u64,
}

impl DiskGeometry {
    pub fn new(cyls: u32, heads: u32, sector_size: u32, pscyl: u32) -> Self {
        let pstrk = pscyl.checked_div(heads).unwrap_or(0);
        let lstrk = pstrk.saturating_sub(1);
        let lscyl = pscyl.saturating_sub(heads);
        let secsz = sector_size as u64;
        Self {
            cyls,
            heads,
            sector_size,
            pstrk,
            lstrk,
            pscyl,
            lscyl,
            pblks: cyls.wrapping_mul(pscyl),
            lblks: cyls.wrapping_mul(lscyl),
            ptrk_size: pstrk as u64 * secsz,
            ltrk_size: lstrk as u64 * secsz,
            pcyl_size: pscyl as u64 * secsz,
            lcyl_size: lscyl as u64 * secsz,
        }
    }

    /// Tracks on the whole volume
    pub fn tracks(&self) -> u32 {
        self.cyls.wrapping_mul(self.heads)
    }

    pub fn track_to_pba(&self, track: u32) -> u32 {
        track.wrapping_mul(self.pstrk)
    }

    pub fn track_to_lba(&self, track: u32) -> u32 {
        track.wrapping_mul(self.lstrk)
    }

    pub fn track_to_cyl(&self, track: u32) -> u32 {
        div(track, self.heads)
    }

    pub fn track_to_head(&self, track: u32) -> u32 {
        rem(track, self.heads)
    }

    /// First physical sector of the track within its cylinder
    pub fn track_to_cylsec(&self, track: u32) -> u32 {
        self.track_to_head(track).wrapping_mul(self.pstrk)
    }

    pub fn track_to_offset(&self, track: u32) -> u64 {
        track as u64 * self.ptrk_size
    }

    pub fn pba_to_offset(&self, pba: u32) -> u64 {
        pba as u64 * self.sector_size as u64
    }

    pub fn pba_to_track(&self, pba: u32) -> u32 {
        div(pba, self.pstrk)
    }

    pub fn pba_to_cyl(&self, pba: u32) -> u32 {
        div(pba, self.pscyl)
    }

    pub fn pba_to_head(&self, pba: u32) -> u32 {
        rem(self.pba_to_track(pba), self.heads)
    }

    pub fn pba_to_cylsec(&self, pba: u32) -> u32 {
        rem(pba, self.pscyl)
    }

    pub fn pba_to_hdsec(&self, pba: u32) -> u32 {
        rem(pba, self.pstrk)
    }

    /// Whether `pba` is the spare sector of its track
    pub fn is_spare(&self, pba: u32) -> bool {
        self.pstrk != 0 && self.pba_to_hdsec(pba) == self.pstrk - 1
    }

    pub fn lba_to_track(&self, lba: u32) -> u32 {
        div(lba, self.lstrk)
    }

    pub fn lba_to_cyl(&self, lba: u32) -> u32 {
        div(lba, self.lscyl)
    }

    pub fn lba_to_head(&self, lba: u32) -> u32 {
        rem(self.lba_to_track(lba), self.heads)
    }

    pub fn lba_to_cylsec(&self, lba: u32) -> u32 {
        rem(lba, self.lscyl)
    }

    pub fn lba_to_hdsec(&self, lba: u32) -> u32 {
        rem(lba, self.lstrk)
    }

    fn offset_sector(&self, offset: u64) -> u32 {
        offset
            .checked_div(self.sector_size as u64)
            .unwrap_or(0) as u32
    }

    pub fn offset_to_pba(&self, offset: u64) -> u32 {
        self.offset_sector(offset)
    }

    pub fn offset_to_track(&self, offset: u64) -> u32 {
        self.pba_to_track(self.offset_sector(offset))
    }

    pub fn offset_to_cyl(&self, offset: u64) -> u32 {
        self.pba_to_cyl(self.offset_sector(offset))
    }

    pub fn offset_to_head(&self, offset: u64) -> u32 {
        self.pba_to_head(self.offset_sector(offset))
    }

    pub fn offset_to_cylsec(&self, offset: u64) -> u32 {
        self.pba_to_cylsec(self.offset_sector(offset))
    }

    pub fn offset_to_hdsec(&self, offset: u64) -> u32 {
        self.pba_to_hdsec(self.offset_sector(offset))
    }

    /// Physical sector holding logical sector `lba`, honoring remapped bad sectors
    pub fn lba_to_pba(&self, lba: u32, bbt: &BadBlockTable) -> u32 {
        let mut pba = lba.wrapping_add(div(lba, self.lstrk));
        if bbt.is_active() && self.pstrk != 0 {
            let track = self.lba_to_track(lba);
            let hdsec = self.lba_to_hdsec(lba);
            for entry in bbt.entries.iter().take(bbt.len()).skip(1) {
                let cylsec = (entry.badblk as u32)
                    .wrapping_add((entry.cyl as u32).wrapping_mul(self.pscyl_of_entry()));
                if cylsec == 0 {
                    break;
                }
                if track == cylsec / self.pstrk && hdsec == cylsec % self.pstrk {
                    pba = (entry.altblk as u32)
                        .wrapping_mul(self.pstrk)
                        .wrapping_add(self.lstrk);
                    debug!("LBA {lba} remapped from PBA {} to spare PBA {pba}", cylsec);
                    break;
                }
            }
        }
        pba
    }

    /// Logical sector stored at physical sector `pba`, honoring remapped bad sectors
    pub fn pba_to_lba(&self, pba: u32, bbt: &BadBlockTable) -> u32 {
        let mut lba = pba.wrapping_sub(div(pba, self.pstrk));
        if !self.is_spare(pba) {
            return lba;
        }
        if bbt.is_empty() {
            warn!("Spare PBA {pba} looked up without a bad block table");
        } else if bbt.is_active() {
            let track = self.pba_to_track(pba);
            for entry in bbt.entries.iter().take(bbt.len()).skip(1) {
                if entry.altblk as u32 == track {
                    let c = (entry.cyl as u32)
                        .wrapping_mul(self.pscyl_of_entry())
                        .wrapping_add(entry.badblk as u32);
                    lba = c.wrapping_sub(c / self.pstrk);
                }
            }
        }
        lba
    }

    fn pscyl_of_entry(&self) -> u32 {
        self.heads.wrapping_mul(self.pstrk)
    }
}

fn div(value: u32, divisor: u32) -> u32 {
    value.checked_div(divisor).unwrap_or(0)
}

fn rem(value: u32, divisor: u32) -> u32 {
    value.checked_rem(divisor).unwrap_or(0)
}

/// Bad block table from the reserved area of partition 0.
/// Entry 0 is a checksum cell; the sentinel there disables remapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadBlockTable {
    pub entries: Vec<BadBlockEntry>,
}

impl Default for BadBlockTable {
    fn default() -> Self {
        Self {
            entries: vec![BadBlockEntry::default(); BAD_BLOCK_ENTRIES],
        }
    }
}

impl BadBlockTable {
    /// Table whose entry 0 carries the "no remapping" sentinel
    pub fn disabled() -> Self {
        let mut table = Self::default();
        table.entries[0].cyl = NO_BAD_BLOCK_CHECKSUM;
        table.entries[0].badblk = NO_BAD_BLOCK_CHECKSUM;
        table
    }

    /// Decode a table stored in `order`
    pub fn from_bytes(raw: &[u8], order: Endian) -> Self {
        let entries = (0..BAD_BLOCK_ENTRIES)
            .map(|i| BadBlockEntry::decode(raw.get(8 * i..).unwrap_or_default(), order))
            .collect();
        Self { entries }
    }

    /// Encode into `order`, always [`BAD_BLOCK_TABLE_SIZE`] bytes
    pub fn to_bytes(&self, order: Endian) -> Vec<u8> {
        let mut raw = Vec::with_capacity(BAD_BLOCK_TABLE_SIZE);
        for entry in self.entries.iter().take(BAD_BLOCK_ENTRIES) {
            raw.extend_from_slice(&entry.encode(order));
        }
        raw.resize(BAD_BLOCK_TABLE_SIZE, 0);
        raw
    }

    pub fn is_disabled(&self) -> bool {
        self.entries
            .first()
            .map(|e| e.cyl == NO_BAD_BLOCK_CHECKSUM && e.badblk == NO_BAD_BLOCK_CHECKSUM)
            .unwrap_or(false)
    }

    /// Live cells counted from entry 0 while `cyl` is non-zero
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .take(BAD_BLOCK_ENTRIES)
            .take_while(|e| e.cyl != 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether translation has to consult the table
    pub fn is_active(&self) -> bool {
        !self.is_empty() && !self.is_disabled()
    }
}
