use log::debug;

use crate::geometry::DiskGeometry;
use crate::structs::{Partition, VolumeHeader, MAX_SLICES};
use crate::{Error, Result};

impl Partition {
    /// Slice of `tracks` tracks starting at track `start_track`
    pub fn new(geometry: &DiskGeometry, start_track: u32, tracks: u32) -> Self {
        Self {
            start_track,
            tracks,
            pblks: tracks.wrapping_mul(geometry.pstrk),
            lblks: tracks.wrapping_mul(geometry.lstrk),
            partpba: geometry.track_to_pba(start_track),
            partlba: geometry.track_to_lba(start_track),
            partoff: geometry.track_to_offset(start_track),
        }
    }

    /// Last track of the slice
    pub fn last_track(&self) -> u32 {
        (self.start_track + self.tracks).saturating_sub(1)
    }
}

/// Slices of the partition table. Each ends where the next starts;
/// the last one runs to the end of the disk.
pub fn decode_partitions(header: &VolumeHeader, geometry: &DiskGeometry) -> Result<Vec<Partition>> {
    let mut partitions = Vec::with_capacity(MAX_SLICES);
    for i in 0..MAX_SLICES {
        let start = header.partab[i];
        if i > 0 && start == 0 {
            break;
        }
        let next = header.partab.get(i + 1).copied().unwrap_or(0);
        let last = if next != 0 {
            next as i64 - 1
        } else {
            geometry.tracks() as i64 - 1
        };
        if last < start as i64 {
            return Err(Error::StructuralCorruption(format!(
                "partition {i} ends at track {last} before its start track {start}"
            )));
        }
        let partition = Partition::new(geometry, start, (last - start as i64 + 1) as u32);
        debug!("Partition {i}: {partition:?}");
        partitions.push(partition);
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DiskGeometry {
        DiskGeometry::new(1024, 8, 512, 136)
    }

    #[test]
    fn disk_layout() {
        let mut header = VolumeHeader::empty();
        header.partab[1] = 8;
        header.partab[2] = 633;
        let parts = decode_partitions(&header, &geometry()).unwrap();
        assert_eq![parts.len(), 3];
        assert_eq![parts[0].start_track, 0];
        assert_eq![parts[0].tracks, 8];
        assert_eq![parts[1].tracks, 625];
        assert_eq![parts[2].start_track, 633];
        assert_eq![parts[2].last_track(), 8191];
        assert_eq![parts[2].partpba, 10761];
        assert_eq![parts[2].partlba, 10128];
        assert_eq![parts[2].partoff, 5509632];
        assert_eq![parts[2].pblks, parts[2].tracks * 17];
        assert_eq![parts[2].lblks, parts[2].tracks * 16];
    }

    #[test]
    fn single_partition_spans_disk() {
        let header = VolumeHeader::empty();
        let parts = decode_partitions(&header, &geometry()).unwrap();
        assert_eq![parts.len(), 1];
        assert_eq![parts[0].tracks, 8192];
    }

    #[test]
    fn one_track_partition() {
        let mut header = VolumeHeader::empty();
        header.partab[1] = 5;
        header.partab[2] = 6;
        let parts = decode_partitions(&header, &geometry()).unwrap();
        assert_eq![parts[1].tracks, 1];
        assert_eq![parts[1].last_track(), 5];
    }

    #[test]
    fn overlapping_partitions_are_corrupt() {
        let mut header = VolumeHeader::empty();
        header.partab[1] = 100;
        header.partab[2] = 50;
        assert![matches![
            decode_partitions(&header, &geometry()),
            Err(Error::StructuralCorruption(_))
        ]];
    }

    #[test]
    fn start_past_disk_end_is_corrupt() {
        let mut header = VolumeHeader::empty();
        header.partab[1] = 9000;
        assert![decode_partitions(&header, &geometry()).is_err()];
    }
}
