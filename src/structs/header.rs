use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::debug;

use super::*;
use crate::{Error, Result};

const PARTAB_OFFSET: usize = 26;
const RESMAP_OFFSET: usize = 90;
const RESMAP_ENTRY: usize = 6;
const MNTNAME_OFFSET: usize = 140;
const TIME_OFFSET: usize = 780;

impl VolumeHeader {
    /// Parse a home block, detecting its byte order from the magic.
    /// Returns the header in host order and whether the disk order is foreign.
    pub fn parse(bytes: &[u8]) -> Result<(Self, bool)> {
        let raw = padded(bytes);
        let magic = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if magic == VOLUME_MAGIC {
            Ok((Self::decode(&raw, Endian::native()), false))
        } else if magic.swap_bytes() == VOLUME_MAGIC {
            debug!("Volume header is {}", Endian::native().swapped());
            Ok((Self::decode(&raw, Endian::native().swapped()), true))
        } else {
            Err(Error::BadMagic {
                what: "volume header",
                found: magic,
            })
        }
    }

    /// Decode a home block stored in `order`
    pub fn decode(raw: &[u8], order: Endian) -> Self {
        let raw = padded(raw);
        match order {
            Endian::Big => Self::decode_with::<BigEndian>(&raw),
            Endian::Little => Self::decode_with::<LittleEndian>(&raw),
        }
    }

    /// Serialize into `order`, always [`VOLUME_HEADER_SIZE`] bytes
    pub fn serialize(&self, order: Endian) -> Vec<u8> {
        let mut raw = vec![0u8; VOLUME_HEADER_SIZE];
        match order {
            Endian::Big => self.encode_with::<BigEndian>(&mut raw),
            Endian::Little => self.encode_with::<LittleEndian>(&mut raw),
        }
        raw
    }

    fn decode_with<B: ByteOrder>(raw: &[u8]) -> Self {
        let mut name = [0u8; 6];
        name.copy_from_slice(&raw[8..14]);
        let mut partab = [0u32; MAX_SLICES];
        for (i, strk) in partab.iter_mut().enumerate() {
            let at = PARTAB_OFFSET + 4 * i;
            *strk = B::read_u32(&raw[at..at + 4]);
        }
        let mut resmap = [ReservedArea::default(); RESMAP_SLOTS];
        for (i, area) in resmap.iter_mut().enumerate() {
            let at = RESMAP_OFFSET + RESMAP_ENTRY * i;
            area.blkstart = B::read_i32(&raw[at..at + 4]);
            area.nblocks = B::read_u16(&raw[at + 4..at + 6]);
        }
        let mut mntname = [[0u8; MOUNT_NAME_SIZE]; MAX_SLICES];
        for (i, mnt) in mntname.iter_mut().enumerate() {
            let at = MNTNAME_OFFSET + MOUNT_NAME_SIZE * i;
            mnt.copy_from_slice(&raw[at..at + MOUNT_NAME_SIZE]);
        }
        Self {
            magic: B::read_u32(&raw[0..4]),
            chksum: B::read_i32(&raw[4..8]),
            name,
            cyls: B::read_u16(&raw[14..16]),
            heads: B::read_u16(&raw[16..18]),
            psectrk: B::read_u16(&raw[18..20]),
            pseccyl: B::read_u16(&raw[20..22]),
            flags: raw[22],
            step: raw[23],
            sectorsz: B::read_u16(&raw[24..26]),
            partab,
            resmap,
            fpulled: raw[138],
            pad: raw[139],
            mntname,
            time: B::read_i32(&raw[TIME_OFFSET..TIME_OFFSET + 4]),
            cpio_magic: B::read_i16(&raw[784..786]),
            set_magic: B::read_i16(&raw[786..788]),
            cpio_vol: B::read_i16(&raw[788..790]),
        }
    }

    fn encode_with<B: ByteOrder>(&self, raw: &mut [u8]) {
        B::write_u32(&mut raw[0..4], self.magic);
        B::write_i32(&mut raw[4..8], self.chksum);
        raw[8..14].copy_from_slice(&self.name);
        B::write_u16(&mut raw[14..16], self.cyls);
        B::write_u16(&mut raw[16..18], self.heads);
        B::write_u16(&mut raw[18..20], self.psectrk);
        B::write_u16(&mut raw[20..22], self.pseccyl);
        raw[22] = self.flags;
        raw[23] = self.step;
        B::write_u16(&mut raw[24..26], self.sectorsz);
        for (i, strk) in self.partab.iter().enumerate() {
            let at = PARTAB_OFFSET + 4 * i;
            B::write_u32(&mut raw[at..at + 4], *strk);
        }
        for (i, area) in self.resmap.iter().enumerate() {
            let at = RESMAP_OFFSET + RESMAP_ENTRY * i;
            B::write_i32(&mut raw[at..at + 4], area.blkstart);
            B::write_u16(&mut raw[at + 4..at + 6], area.nblocks);
        }
        raw[138] = self.fpulled;
        raw[139] = self.pad;
        for (i, mnt) in self.mntname.iter().enumerate() {
            let at = MNTNAME_OFFSET + MOUNT_NAME_SIZE * i;
            raw[at..at + MOUNT_NAME_SIZE].copy_from_slice(mnt);
        }
        B::write_i32(&mut raw[TIME_OFFSET..TIME_OFFSET + 4], self.time);
        B::write_i16(&mut raw[784..786], self.cpio_magic);
        B::write_i16(&mut raw[786..788], self.set_magic);
        B::write_i16(&mut raw[788..790], self.cpio_vol);
    }

    /// Whether this header describes a floppy
    pub fn is_floppy(&self) -> bool {
        &self.name == FLOPPY_NAME
    }

    pub fn name(&self) -> String {
        fixed_name(&self.name)
    }

    pub fn mount_name(&self, slice: usize) -> String {
        self.mntname
            .get(slice)
            .map(|m| fixed_name(m))
            .unwrap_or_default()
    }

    /// Blank header carrying only the magic
    pub fn empty() -> Self {
        Self {
            magic: VOLUME_MAGIC,
            chksum: 0,
            name: [0; 6],
            cyls: 0,
            heads: 0,
            psectrk: 0,
            pseccyl: 0,
            flags: 0,
            step: 0,
            sectorsz: 0,
            partab: [0; MAX_SLICES],
            resmap: [ReservedArea::default(); RESMAP_SLOTS],
            fpulled: 0,
            pad: 0,
            mntname: [[0; MOUNT_NAME_SIZE]; MAX_SLICES],
            time: 0,
            cpio_magic: 0,
            set_magic: 0,
            cpio_vol: 0,
        }
    }
}

/// Sum of the signed bytes after magic and checksum
pub fn checksum(bytes: &[u8]) -> i32 {
    let end = bytes.len().min(VOLUME_HEADER_SIZE);
    bytes
        .get(8..end)
        .unwrap_or_default()
        .iter()
        .fold(0i32, |sum, &b| sum.wrapping_add(b as i8 as i32))
}

fn padded(bytes: &[u8]) -> [u8; VOLUME_HEADER_SIZE] {
    let mut raw = [0u8; VOLUME_HEADER_SIZE];
    let len = bytes.len().min(VOLUME_HEADER_SIZE);
    raw[..len].copy_from_slice(&bytes[..len]);
    raw
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample() -> VolumeHeader {
        let mut header = VolumeHeader::empty();
        set_fixed_name(&mut header.name, "WINCHE");
        header.chksum = -12345;
        header.cyls = 1024;
        header.heads = 8;
        header.psectrk = 17;
        header.pseccyl = 136;
        header.flags = FLAG_NEW_PARTITION_TABLE;
        header.sectorsz = 512;
        header.partab[1] = 8;
        header.partab[2] = 633;
        header.resmap[RES_LOADER] = ReservedArea {
            blkstart: 2,
            nblocks: 23,
        };
        header.resmap[RES_BAD_BLOCK_TABLE] = ReservedArea {
            blkstart: 1,
            nblocks: 1,
        };
        header.resmap[6] = ReservedArea {
            blkstart: 0x0102_0304,
            nblocks: 0x0506,
        };
        set_fixed_name(&mut header.mntname[2], "/");
        header.time = 0x1234_5678;
        header.cpio_magic = 0x0a0b;
        header.set_magic = -2;
        header.cpio_vol = 3;
        header
    }

    #[test]
    fn parse_both_orders() {
        let header = sample();
        for order in [Endian::Big, Endian::Little] {
            let raw = header.serialize(order);
            let (parsed, swapped) = VolumeHeader::parse(&raw).unwrap();
            assert_eq![parsed, header];
            assert_eq![swapped, order.needs_swap()];
        }
    }

    #[test]
    fn serialize_is_inverse_of_parse() {
        let raw = sample().serialize(Endian::Big);
        let (parsed, _) = VolumeHeader::parse(&raw).unwrap();
        assert_eq![parsed.serialize(Endian::Big), raw];
    }

    #[test]
    fn bad_magic() {
        let raw = [0u8; VOLUME_HEADER_AREA];
        match VolumeHeader::parse(&raw) {
            Err(Error::BadMagic { found, .. }) => assert_eq![found, 0],
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn checksum_covers_body_only() {
        let mut raw = sample().serialize(Endian::Big);
        let before = checksum(&raw);
        raw[4] ^= 0xff;
        assert_eq![checksum(&raw), before];
        raw[8] = raw[8].wrapping_add(1);
        assert_eq![checksum(&raw), before + 1];
        assert_eq![checksum(&[0u8; 4]), 0];
    }

    #[test]
    fn floppy_name() {
        let mut header = sample();
        assert![!header.is_floppy()];
        header.name = *FLOPPY_NAME;
        assert![header.is_floppy()];
        assert_eq![header.mount_name(2), "/"];
        assert_eq![header.mount_name(40), ""];
    }
}
