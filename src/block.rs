//! The 16-bit cipher state and nibble-level accessors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitXor, BitXorAssign};

/// Number of 4-bit S-boxes in the substitution layer.
pub const NUM_SBOXES: usize = 4;

/// Bit width of a single S-box.
pub const SBOX_SIZE: usize = 4;

/// A 16-bit cipher state. Differences between two states are formed with
/// XOR and are represented by the same type.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(pub u16);

impl Block {
    /// Extracts the i'th nibble, where nibble 0 holds the least significant
    /// four bits.
    #[inline(always)]
    pub fn nibble(self, i: usize) -> u8 {
        debug_assert!(i < NUM_SBOXES);
        ((self.0 >> (SBOX_SIZE * i)) & 0xf) as u8
    }

    /// Returns a copy of the block with the i'th nibble replaced by `value`.
    #[inline(always)]
    pub fn with_nibble(self, i: usize, value: u8) -> Block {
        debug_assert!(i < NUM_SBOXES);
        debug_assert!(value < 16);
        let cleared = self.0 & !(0xf << (SBOX_SIZE * i));
        Block(cleared | (u16::from(value) << (SBOX_SIZE * i)))
    }

    /// Assembles a block from four nibbles, least significant first.
    pub fn from_nibbles(nibbles: [u8; NUM_SBOXES]) -> Block {
        let mut block = Block(0);

        for (i, &n) in nibbles.iter().enumerate() {
            block = block.with_nibble(i, n);
        }

        block
    }

    /// True if the i'th nibble of the block is non-zero.
    #[inline(always)]
    pub fn nibble_active(self, i: usize) -> bool {
        self.nibble(i) != 0
    }

    /// Compares two blocks on the nibble positions selected by `mask`,
    /// where bit i of the mask selects nibble i.
    pub fn eq_masked(self, other: Block, mask: u8) -> bool {
        for i in 0..NUM_SBOXES {
            if (mask >> i) & 1 == 1 && self.nibble(i) != other.nibble(i) {
                return false;
            }
        }

        true
    }
}

impl BitXor for Block {
    type Output = Block;

    fn bitxor(self, rhs: Block) -> Block {
        Block(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Block {
    fn bitxor_assign(&mut self, rhs: Block) {
        self.0 ^= rhs.0;
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    #[test]
    fn nibble_extraction() {
        let block = Block(0x1234);

        assert_eq!(block.nibble(0), 0x4);
        assert_eq!(block.nibble(1), 0x3);
        assert_eq!(block.nibble(2), 0x2);
        assert_eq!(block.nibble(3), 0x1);
    }

    #[test]
    fn nibble_replacement() {
        let block = Block(0x1234).with_nibble(2, 0xf);
        assert_eq!(block, Block(0x1f34));
    }

    #[test]
    fn masked_comparison() {
        let a = Block(0x1234);
        let b = Block(0xff3f);

        assert!(a.eq_masked(b, 0b0010));
        assert!(!a.eq_masked(b, 0b0001));
        assert!(a.eq_masked(b, 0b0000));
    }

    quickcheck! {
        fn nibble_round_trip(x: u16) -> bool {
            let block = Block(x);
            let nibbles = [block.nibble(0), block.nibble(1),
                           block.nibble(2), block.nibble(3)];
            Block::from_nibbles(nibbles) == block
        }
    }
}
