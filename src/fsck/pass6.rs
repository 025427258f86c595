use log::debug;

use super::{Checker, CYLSIZE, MAXCYL, STEPSIZE};
use crate::structs::*;
use crate::Result;

/// Order in which blocks of one cylinder go onto the free list.
///
/// Entry `j` is the offset, counted back from the end of the cylinder,
/// of the `j`th block handed out; consecutive entries lie `step` apart.
pub fn interleave(step: u32, cyl: u32) -> Vec<u32> {
    let cyl = cyl.max(1) as usize;
    let step = step as usize;
    let mut taken = vec![false; cyl];
    let mut order = Vec::with_capacity(cyl);
    let mut i = 0;
    for _ in 0..cyl {
        while taken[i] {
            i = (i + 1) % cyl;
        }
        order.push(i as u32 + 1);
        taken[i] = true;
        i = (i + step) % cyl;
    }
    order
}

/// Thread every block in `f_min..f_max` not `in_use` onto a free list.
///
/// Full list blocks are handed to `spill` together with the block that
/// will hold them. Returns the list left for the superblock cache and
/// the number of free blocks.
pub fn build_free_list<F, S>(
    f_min: u32,
    f_max: u32,
    step: u32,
    cyl: u32,
    mut in_use: F,
    mut spill: S,
) -> Result<(FreeBlock, u32)>
where
    F: FnMut(u32) -> Result<bool>,
    S: FnMut(u32, &FreeBlock) -> Result<()>,
{
    let cyl = cyl.max(1);
    let order = interleave(step, cyl);
    let mut list = FreeBlock {
        nfree: 1,
        free: [0; NICFREE],
    };
    let mut count = 0;
    let mut base = f_max.div_ceil(cyl) as i64 * cyl as i64;
    while base > 0 {
        for &offset in &order {
            let blk = base - offset as i64;
            if blk < f_min as i64 || blk >= f_max as i64 {
                continue;
            }
            let blk = blk as u32;
            if in_use(blk)? {
                continue;
            }
            count += 1;
            if list.nfree as usize >= NICFREE {
                spill(blk, &list)?;
                list = FreeBlock {
                    nfree: 0,
                    free: [0; NICFREE],
                };
            }
            list.free[list.nfree as usize] = blk as i32;
            list.nfree += 1;
        }
        base -= cyl as i64;
    }
    Ok((list, count))
}

impl Checker<'_> {
    /// Rebuild the free list from the blocks phase 1 left unclaimed
    pub(crate) fn pass6(&mut self) -> Result<()> {
        let sb = &mut self.fs.superblock;
        sb.nfree = 0;
        sb.flock = 0;
        sb.fmod = 0;
        sb.tfree = 0;
        sb.ninode = 0;
        sb.ilock = 0;
        sb.ronly = 0;
        let (mut step, mut cyl) = if self.options.cylinder_size == 0 || self.options.step_size == 0
        {
            (sb.vinfo[0] as i32, sb.vinfo[1] as i32)
        } else {
            (self.options.step_size, self.options.cylinder_size)
        };
        if step > cyl || step <= 0 || cyl <= 0 || cyl > MAXCYL {
            writeln!(self.out, "Default free list spacing assumed")?;
            step = STEPSIZE;
            cyl = CYLSIZE;
        }
        let sb = &mut self.fs.superblock;
        sb.vinfo[0] = step as i16;
        sb.vinfo[1] = cyl as i16;
        if sb.is_1k() {
            step /= 2;
            cyl /= 2;
        }
        debug!("Free list spacing {step} in cylinders of {cyl} blocks");

        let tables = &mut self.tables;
        let fs = &mut *self.fs;
        let (list, count) = build_free_list(
            self.f_min,
            self.f_max,
            step as u32,
            cyl as u32,
            |blk| tables.block_used(blk),
            |blk, list| fs.write_free_block(blk as u64, list),
        )?;
        let sb = &mut self.fs.superblock;
        sb.set_free_cache(&list);
        sb.tfree = count as i32;
        self.fs.mark_superblock();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_visits_every_block_once() {
        let order = interleave(7, 20);
        assert_eq![order[..4], [1, 8, 15, 2]];
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq![sorted, (1..=20).collect::<Vec<_>>()];

        assert_eq![interleave(0, 4), [1, 2, 3, 4]];
        assert_eq![interleave(3, 0), [1]];
    }

    #[test]
    fn free_list_chains_through_spilled_blocks() {
        let mut spilled = Vec::new();
        let (list, count) = build_free_list(
            10,
            200,
            1,
            1,
            |blk| Ok(blk % 10 == 0),
            |blk, list| {
                spilled.push((blk, *list));
                Ok(())
            },
        )
        .unwrap();
        assert_eq![count, 171];
        // 49 entries, then lists of 50 headed by their link
        assert_eq![spilled.len(), 3];
        assert_eq![spilled[0].1.nfree, 50];
        assert_eq![spilled[0].1.free[0], 0];
        assert_eq![spilled[0].1.free[1], 199];
        assert_eq![spilled[1].1.free[0], spilled[0].0 as i32];
        assert_eq![list.free[0], spilled[2].0 as i32];
        assert_eq![list.nfree, 171 - 49 - 100];
        let mut seen: Vec<i32> = spilled
            .iter()
            .flat_map(|(_, l)| l.free[1..l.nfree as usize].to_vec())
            .chain(spilled.iter().map(|(b, _)| *b as i32))
            .chain(list.free[1..list.nfree as usize].iter().copied())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq![seen.len(), 171];
    }
}
