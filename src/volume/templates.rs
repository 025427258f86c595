//! Known good volume headers, stored run-length encoded in big-endian order

use log::{debug, info};

use crate::rle;
use crate::structs::{Endian, Partition, VolumeHeader, VOLUME_HEADER_SIZE};
use crate::{Error, Result};

/// Headers named `s4v_<cyls>_<heads>_<sectors>_<loader tracks - 1>_<fs start - 1>`
pub const TEMPLATES: [(&str, &[u8]); 3] = [
    ("s4v_1040_8_16_6_588", &S4V_1040_8_16_6_588),
    ("s4v_612_4_17_3_628", &S4V_612_4_17_3_628),
    ("s4v_1024_8_17_7_632", &S4V_1024_8_17_7_632),
];

static S4V_1040_8_16_6_588: [u8; 54] = [
    0x55, 0x51, 0x56, 0x51, 0x06, 0x41, 0x4F, 0x33,
    0x57, 0x49, 0x4E, 0x43, 0x48, 0x45, 0x04, 0x10,
    0x00, 0x08, 0x00, 0x10, 0x00, 0x80, 0x08, 0x00,
    0x02, 0xEE, 0x08, 0x00, 0x07, 0x00, 0x00, 0x02,
    0x4D, 0xEE, 0x37, 0x00, 0x02, 0x00, 0x17, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0xEE, 0xFF, 0x00,
    0xEE, 0xFF, 0x00, 0xEE, 0xB2, 0x00,
];

static S4V_612_4_17_3_628: [u8; 54] = [
    0x55, 0x51, 0x56, 0x51, 0x06, 0x5C, 0x50, 0xDE,
    0x57, 0x49, 0x4E, 0x43, 0x48, 0x45, 0x02, 0x64,
    0x00, 0x04, 0x00, 0x11, 0x00, 0x44, 0x08, 0x00,
    0x02, 0xEE, 0x08, 0x00, 0x04, 0x00, 0x00, 0x02,
    0x75, 0xEE, 0x37, 0x00, 0x02, 0x00, 0x17, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0xEE, 0xFF, 0x00,
    0xEE, 0xFF, 0x00, 0xEE, 0xB2, 0x00,
];

static S4V_1024_8_17_7_632: [u8; 54] = [
    0x55, 0x51, 0x56, 0x51, 0x06, 0x0C, 0x4F, 0x42,
    0x57, 0x49, 0x4E, 0x43, 0x48, 0x45, 0x04, 0x00,
    0x00, 0x08, 0x00, 0x11, 0x00, 0x88, 0x08, 0x00,
    0x02, 0xEE, 0x08, 0x00, 0x08, 0x00, 0x00, 0x02,
    0x79, 0xEE, 0x37, 0x00, 0x02, 0x00, 0x17, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0xEE, 0xFF, 0x00,
    0xEE, 0xFF, 0x00, 0xEE, 0xB2, 0x00,
];

/// Expand a stored template into a host-order header
pub fn decode_template(encoded: &[u8]) -> Result<VolumeHeader> {
    let raw = rle::decode(encoded, VOLUME_HEADER_SIZE)?;
    Ok(VolumeHeader::decode(&raw, Endian::Big))
}

/// Stored header matching the geometry and partition layout of `header`
pub fn known_header_for(header: &VolumeHeader) -> Option<VolumeHeader> {
    for (name, encoded) in TEMPLATES {
        let Ok(known) = decode_template(encoded) else {
            continue;
        };
        if known.cyls == header.cyls
            && known.heads == header.heads
            && known.psectrk == header.psectrk
            && known.partab[1] == header.partab[1]
            && known.partab[2] == header.partab[2]
        {
            info!("Using known header {name}");
            return Some(known);
        }
    }
    debug!(
        "No known header for {}/{}/{}",
        header.cyls, header.heads, header.psectrk
    );
    None
}

/// Template name for a volume, from its geometry and partition starts
pub fn template_name(header: &VolumeHeader, partitions: &[Partition], floppy: bool) -> String {
    let start = |i: usize| {
        partitions
            .get(i)
            .map(|p| p.start_track as i64 - 1)
            .unwrap_or(-1)
    };
    format!(
        "s4v_{}_{}_{}_{}_{}",
        header.cyls,
        header.heads,
        header.psectrk,
        start(1),
        if floppy { 0 } else { start(2) }
    )
}

/// Encode a header as a template and render it as a C array named `name`
pub fn steal(header: &VolumeHeader, name: &str) -> Result<String> {
    let raw = header.serialize(Endian::Big);
    let encoded = rle::encode(&raw);
    if rle::decode(&encoded, VOLUME_HEADER_SIZE)? != raw {
        return Err(Error::StructuralCorruption(
            "encoded header does not decode to itself".to_owned(),
        ));
    }
    Ok(c_array(name, &encoded))
}

/// Render `bytes` as a C array, 8 values per line
pub fn c_array(name: &str, bytes: &[u8]) -> String {
    let lines: Vec<String> = bytes
        .chunks(8)
        .map(|line| {
            line.iter()
                .map(|b| format!("0x{b:02X}"))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();
    format!(
        "static const char {name}[] = {{\n    {}\n}};\n\n",
        lines.join(",\n    ")
    )
}
