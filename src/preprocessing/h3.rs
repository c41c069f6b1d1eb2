//! H3 cell index bit layout

use crate::error::{FeatureflowError, Result};

pub const MAX_RESOLUTION: u8 = 15;
pub const NUM_BASE_CELLS: u8 = 122;
pub const UNUSED_DIGIT: u8 = 7;

const MODE_OFFSET: u32 = 59;
const EDGE_OFFSET: u32 = 56;
const RES_OFFSET: u32 = 52;
const BASE_CELL_OFFSET: u32 = 45;
const DIGIT_BITS: u32 = 3;

/// Fields packed into a 64 bit H3 index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H3Components {
    pub mode: u8,
    pub edge: u8,
    pub resolution: u8,
    pub base_cell: u8,
    /// Child digit for resolutions 1..=15; 7 past the index resolution
    pub digits: [u8; 15],
}

impl H3Components {
    /// Number of numeric components produced per index
    pub const WIDTH: usize = 4 + 15;

    pub fn decode(index: u64) -> Result<Self> {
        let mode = ((index >> MODE_OFFSET) & 0xF) as u8;
        let edge = ((index >> EDGE_OFFSET) & 0x7) as u8;
        let resolution = ((index >> RES_OFFSET) & 0xF) as u8;
        let base_cell = ((index >> BASE_CELL_OFFSET) & 0x7F) as u8;

        if base_cell >= NUM_BASE_CELLS {
            return Err(FeatureflowError::PreprocessingError(format!(
                "h3 index {index:#x} has invalid base cell {base_cell}"
            )));
        }

        let mut digits = [UNUSED_DIGIT; 15];
        for (r, digit) in digits.iter_mut().enumerate() {
            let offset = (MAX_RESOLUTION as u32 - 1 - r as u32) * DIGIT_BITS;
            *digit = ((index >> offset) & 0x7) as u8;
        }

        Ok(Self {
            mode,
            edge,
            resolution,
            base_cell,
            digits,
        })
    }

    pub fn encode(&self) -> u64 {
        let mut index = (self.mode as u64 & 0xF) << MODE_OFFSET
            | (self.edge as u64 & 0x7) << EDGE_OFFSET
            | (self.resolution as u64 & 0xF) << RES_OFFSET
            | (self.base_cell as u64 & 0x7F) << BASE_CELL_OFFSET;
        for (r, digit) in self.digits.iter().enumerate() {
            let offset = (MAX_RESOLUTION as u32 - 1 - r as u32) * DIGIT_BITS;
            index |= (*digit as u64 & 0x7) << offset;
        }
        index
    }

    /// Components scaled to [0, 1]
    pub fn to_features(&self) -> [f64; Self::WIDTH] {
        let mut out = [0.0; Self::WIDTH];
        out[0] = self.mode as f64 / 15.0;
        out[1] = self.edge as f64 / 7.0;
        out[2] = self.resolution as f64 / MAX_RESOLUTION as f64;
        out[3] = self.base_cell as f64 / (NUM_BASE_CELLS - 1) as f64;
        for (i, digit) in self.digits.iter().enumerate() {
            out[4 + i] = *digit as f64 / UNUSED_DIGIT as f64;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_index() {
        // resolution 5 cell over San Francisco
        let c = H3Components::decode(0x85283473fffffff).unwrap();
        assert_eq!(c.mode, 1);
        assert_eq!(c.resolution, 5);
        assert_eq!(c.base_cell, 20);
        assert_eq!(&c.digits[..5], &[0, 6, 4, 3, 4]);
        assert!(c.digits[5..].iter().all(|d| *d == UNUSED_DIGIT));
    }

    #[test]
    fn test_encode_inverts_decode() {
        let index = 0x85283473fffffffu64;
        assert_eq!(H3Components::decode(index).unwrap().encode(), index);
    }

    #[test]
    fn test_invalid_base_cell() {
        let bad = H3Components {
            mode: 1,
            edge: 0,
            resolution: 0,
            base_cell: 127,
            digits: [UNUSED_DIGIT; 15],
        }
        .encode();
        assert!(H3Components::decode(bad).is_err());
    }

    #[test]
    fn test_features_are_scaled() {
        let c = H3Components::decode(0x85283473fffffff).unwrap();
        assert!(c.to_features().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
