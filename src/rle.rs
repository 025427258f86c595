//! Run-length codec for the stored volume header templates.
//! A run is `[MARKER, count, byte]`; everything else is literal.

use crate::{Error, Result};

pub const MARKER: u8 = 0xee;
/// Shortest run worth encoding
const MIN_RUN: usize = 4;
const MAX_RUN: usize = u8::MAX as usize;

pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let byte = input[i];
        let run = input[i..]
            .iter()
            .take(MAX_RUN)
            .take_while(|&&b| b == byte)
            .count();
        if run >= MIN_RUN || byte == MARKER {
            out.extend_from_slice(&[MARKER, run as u8, byte]);
        } else {
            out.extend(std::iter::repeat(byte).take(run));
        }
        i += run;
    }
    out
}

/// Expand `input` into exactly `capacity` bytes, zero filling the tail
pub fn decode(input: &[u8], capacity: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(capacity);
    let mut i = 0;
    while i < input.len() {
        let (count, byte, used) = if input[i] == MARKER {
            match input.get(i + 1..i + 3) {
                Some(&[count, byte]) => (count as usize, byte, 3),
                _ => {
                    return Err(Error::StructuralCorruption(format!(
                        "run at {i} truncated"
                    )))
                }
            }
        } else {
            (1, input[i], 1)
        };
        if out.len() + count > capacity {
            return Err(Error::CapacityExceeded {
                table: "run-length output",
            });
        }
        out.extend(std::iter::repeat(byte).take(count));
        i += used;
    }
    out.resize(capacity, 0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut input = b"ab".to_vec();
        input.extend([0u8; 300]);
        input.extend([7, 7, 7, 9, MARKER, 1]);
        let encoded = encode(&input);
        assert![encoded.len() < 20];
        assert_eq![decode(&encoded, input.len()).unwrap(), input];
    }

    #[test]
    fn short_runs_stay_literal() {
        assert_eq![encode(&[1, 1, 1, 2]), vec![1, 1, 1, 2]];
        assert_eq![encode(&[1, 1, 1, 1]), vec![MARKER, 4, 1]];
        assert_eq![encode(&[MARKER]), vec![MARKER, 1, MARKER]];
    }

    #[test]
    fn capacity_boundary() {
        let encoded = encode(&[5u8; 10]);
        assert_eq![decode(&encoded, 10).unwrap(), vec![5u8; 10]];
        assert![decode(&encoded, 9).is_err()];
        assert_eq![decode(&encoded, 12).unwrap()[10..], [0, 0]];
    }

    #[test]
    fn truncated_run() {
        assert![decode(&[1, MARKER, 3], 10).is_err()];
    }
}
