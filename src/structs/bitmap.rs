use std::mem::size_of;

use super::*;
use crate::Error;

const BITS_IN_BYTE: u64 = 8;
const BYTES_IN_USIZE: u64 = size_of::<usize>() as u64;
const BITS_IN_USIZE: u64 = BYTES_IN_USIZE * BITS_IN_BYTE;

impl<T: AsBitmap> Bitmap<T> {
    /// Return empty bitmap able to hold `count` indexes
    pub fn new(count: u64) -> Self {
        Self {
            bitfield: vec![0; Self::size(count)],
            count,
            __type: PhantomData,
        }
    }

    /// Calculate appropriate size in [`usize`] for bitmap
    pub(crate) fn size(count: u64) -> usize {
        ((count + BITS_IN_USIZE - 1) / BITS_IN_USIZE) as usize
    }

    /// Bytes taken by a bitmap of `count` indexes
    pub fn byte_size(count: u64) -> u64 {
        (count + BITS_IN_BYTE - 1) / BITS_IN_BYTE
    }

    fn check(&self, index: u64) -> Result<(), Error> {
        if index >= self.count {
            return Err(Error::OutOfRange {
                what: "bitmap index",
                value: index,
            });
        }
        Ok(())
    }

    /// Modify occupancy
    pub fn set(&mut self, index: u64, value: bool) -> Result<(), Error> {
        self.check(index)?;
        let row = (index / BITS_IN_USIZE) as usize;
        let col = index % BITS_IN_USIZE;
        if value {
            self.bitfield[row] |= 1usize << col;
        } else {
            self.bitfield[row] &= !(1usize << col);
        }
        Ok(())
    }

    /// Get occupancy
    pub fn get(&self, index: u64) -> Result<bool, Error> {
        self.check(index)?;
        let row = (index / BITS_IN_USIZE) as usize;
        let col = index % BITS_IN_USIZE;
        Ok((self.bitfield[row] & (1usize << col)) != 0)
    }

    /// Number of occupied indexes
    pub fn occupied(&self) -> u64 {
        self.bitfield.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Take over the occupancy of another bitmap of the same length
    pub fn copy_from<U: AsBitmap>(&mut self, other: &Bitmap<U>) {
        self.bitfield.clear();
        self.bitfield.extend_from_slice(&other.bitfield);
        self.bitfield.resize(Self::size(self.count), 0);
    }
}

impl<T: AsBitmap> std::fmt::Display for Bitmap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} of {} occupied", self.occupied(), self.count)?;
        for index in 0..self.count {
            if let Ok(true) = self.get(index) {
                write!(f, "{index} ")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut map = Bitmap::<Block>::new(130);
        assert_eq![map.get(129).unwrap(), false];
        map.set(129, true).unwrap();
        map.set(0, true).unwrap();
        map.set(64, true).unwrap();
        assert_eq![map.get(129).unwrap(), true];
        assert_eq![map.occupied(), 3];
        map.set(64, false).unwrap();
        assert_eq![map.get(64).unwrap(), false];
        assert![map.get(130).is_err()];
        assert![map.set(500, true).is_err()];
    }

    #[test]
    fn copy() {
        let mut used = Bitmap::<Block>::new(100);
        used.set(7, true).unwrap();
        let mut free = Bitmap::<Block>::new(100);
        free.set(8, true).unwrap();
        free.copy_from(&used);
        assert_eq![free.get(7).unwrap(), true];
        assert_eq![free.get(8).unwrap(), false];
    }
}
