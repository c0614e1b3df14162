//! The CipherFour style SPN under attack.
//!
//! Four full rounds of key-mix, substitution and bit permutation,
//! followed by a final round of key-mix, substitution and an output
//! whitening key. Six 16-bit round keys in total.

use rand::Rng;

use crate::block::{Block, NUM_SBOXES};
use crate::sbox::{Sbox, CIPHER_FOUR_SBOX};

/// Number of round keys in the schedule.
pub const NUM_KEYS: usize = 6;

/// Bit transpose of the state: bit `i` moves to bit `PBOX[i]`. The table
/// is an involution, so it is its own inverse.
pub const PBOX: [usize; 16] = [0, 4, 8, 12, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15];

/// The cipher structure: everything an attacker is assumed to know.
#[derive(Clone)]
pub struct CipherFour {
    sbox: Sbox,
}

impl CipherFour {
    pub fn new() -> CipherFour {
        // The reference table is a verified bijection.
        let sbox = Sbox::new(CIPHER_FOUR_SBOX).expect("reference s-box is bijective");
        CipherFour { sbox }
    }

    pub fn sbox(&self) -> &Sbox {
        &self.sbox
    }

    /// Applies the S-box to each nibble of the state.
    pub fn substitute(&self, block: Block) -> Block {
        let mut out = Block(0);

        for i in 0..NUM_SBOXES {
            out = out.with_nibble(i, self.sbox.apply(block.nibble(i)));
        }

        out
    }

    /// Applies the inverse S-box to each nibble of the state.
    pub fn substitute_inverse(&self, block: Block) -> Block {
        let mut out = Block(0);

        for i in 0..NUM_SBOXES {
            out = out.with_nibble(i, self.sbox.apply_inverse(block.nibble(i)));
        }

        out
    }

    /// Applies the bit permutation. `PBOX` is an involution, so this is
    /// also the inverse permutation.
    pub fn permute(block: Block) -> Block {
        let mut out = 0u16;

        for (i, &target) in PBOX.iter().enumerate() {
            out |= ((block.0 >> i) & 1) << target;
        }

        Block(out)
    }

    /// Encrypts one block under the given key schedule.
    pub fn encrypt_block(&self, keys: &[Block; NUM_KEYS], plaintext: Block) -> Block {
        let mut state = plaintext;

        for r in 0..4 {
            state = CipherFour::permute(self.substitute(state ^ keys[r]));
        }

        self.substitute(state ^ keys[4]) ^ keys[5]
    }

    /// Decrypts one block under the given key schedule.
    pub fn decrypt_block(&self, keys: &[Block; NUM_KEYS], ciphertext: Block) -> Block {
        let mut state = self.substitute_inverse(ciphertext ^ keys[5]) ^ keys[4];

        for r in (0..4).rev() {
            state = self.substitute_inverse(CipherFour::permute(state)) ^ keys[r];
        }

        state
    }

    /// Draws a fresh random key schedule.
    pub fn random_keys<R: Rng>(rng: &mut R) -> [Block; NUM_KEYS] {
        let mut keys = [Block(0); NUM_KEYS];

        for key in keys.iter_mut() {
            *key = Block(rng.gen());
        }

        keys
    }
}

impl Default for CipherFour {
    fn default() -> CipherFour {
        CipherFour::new()
    }
}

/// A chosen-plaintext encryption oracle holding a secret key schedule.
pub struct Oracle {
    cipher: CipherFour,
    keys: [Block; NUM_KEYS],
}

impl Oracle {
    pub fn new(cipher: CipherFour, keys: [Block; NUM_KEYS]) -> Oracle {
        Oracle { cipher, keys }
    }

    pub fn encrypt_block(&self, plaintext: Block) -> Block {
        self.cipher.encrypt_block(&self.keys, plaintext)
    }

    /// The secret schedule, used by tests and the bench harness to score
    /// a finished attack.
    pub fn keys(&self) -> &[Block; NUM_KEYS] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zero_key_fixture() {
        let cipher = CipherFour::new();
        let keys = [Block(0); NUM_KEYS];

        assert_eq!(cipher.encrypt_block(&keys, Block(0x0000)), Block(0xc6dc));
    }

    #[test]
    fn permutation_is_involution() {
        for x in 0..=0xffffu16 {
            assert_eq!(CipherFour::permute(CipherFour::permute(Block(x))), Block(x));
        }
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let cipher = CipherFour::new();
        let mut rng = StdRng::seed_from_u64(0x1cf4);
        let keys = CipherFour::random_keys(&mut rng);

        for _ in 0..1000 {
            let p = Block(rng.gen());
            let c = cipher.encrypt_block(&keys, p);
            assert_eq!(cipher.decrypt_block(&keys, c), p);
        }
    }

    quickcheck! {
        fn substitution_round_trips(x: u16) -> bool {
            let cipher = CipherFour::new();
            let block = Block(x);
            cipher.substitute_inverse(cipher.substitute(block)) == block
        }
    }
}
