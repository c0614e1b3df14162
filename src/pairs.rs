//! Chosen-plaintext pair generation and sieving.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::block::{Block, NUM_SBOXES};
use crate::characteristic::Characteristic;
use crate::cipher::{CipherFour, Oracle};
use crate::error::Result;
use crate::recovery::KeyRecoveryState;

/// Refreshing regenerates pairs until at least this many survive the
/// sieve.
pub const MIN_FILTERED_PAIRS: usize = 32;

/// Pair count increment per refresh attempt.
pub const PAIR_COUNT_STEP: usize = 1000;

const MAX_PAIR_COUNT: usize = 1 << 22;

/// A plaintext pair with a fixed difference and both oracle ciphertexts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub left: Block,
    pub right: Block,
    pub left_ct: Block,
    pub right_ct: Block,
}

/// Draws `count` random pairs with the given plaintext difference and
/// encrypts both members.
pub fn generate_pairs<R: Rng>(
    oracle: &Oracle,
    input_difference: Block,
    count: usize,
    rng: &mut R,
) -> Vec<Pair> {
    (0..count)
        .map(|_| {
            let left = Block(rng.gen());
            let right = left ^ input_difference;

            Pair {
                left,
                right,
                left_ct: oracle.encrypt_block(left),
                right_ct: oracle.encrypt_block(right),
            }
        })
        .collect()
}

/// Maps one ciphertext into the sieve domain of the attacked round: the
/// recovered rounds are peeled off, and the remaining linear layers are
/// undone so that the difference of two mapped members equals the
/// attacked round's S-layer output difference.
fn sieve_member(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    ciphertext: Block,
) -> Block {
    let peeled = state.peel(cipher, ciphertext);

    match round {
        5 => peeled,
        4 => cipher.substitute_inverse(peeled),
        _ => cipher.substitute_inverse(CipherFour::permute(peeled)),
    }
}

/// Difference of a pair in the sieve domain of the attacked round.
pub fn sieve_difference(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    pair: &Pair,
) -> Result<Block> {
    state.check_peelable(round)?;

    let left = sieve_member(cipher, state, round, pair.left_ct);
    let right = sieve_member(cipher, state, round, pair.right_ct);

    // For the last round the key-mix cancels in the difference directly;
    // below it the S-layer inverse is taken member-wise first, so the
    // difference still needs the permutation undone.
    if round == 5 {
        Ok(left ^ right)
    } else {
        Ok(CipherFour::permute(left ^ right))
    }
}

/// Retains the pairs whose sieve-domain difference equals `expected` on
/// every nibble selected by `mask`. Unselected nibbles are unconstrained.
pub fn filter_pairs(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    pairs: &[Pair],
    expected: Block,
    mask: u8,
) -> Result<Vec<Pair>> {
    let mut filtered = Vec::new();

    for pair in pairs {
        if sieve_difference(cipher, state, round, pair)?.eq_masked(expected, mask) {
            filtered.push(*pair);
        }
    }

    Ok(filtered)
}

/// Regenerates the pair lists for one attack configuration, growing the
/// pair count until enough pairs survive the sieve. The full nibble mask
/// is applied: the characteristic predicts a zero difference at the boxes
/// outside the attacked subset, and constraining them removes the bulk of
/// the wrong pairs.
pub fn refresh_pair_lists<R: Rng>(
    oracle: &Oracle,
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    characteristic: &Characteristic,
    mut count: usize,
    rng: &mut R,
) -> Result<(Vec<Pair>, Vec<Pair>)> {
    let full_mask = (1 << NUM_SBOXES) - 1;

    loop {
        let unfiltered = generate_pairs(oracle, characteristic.input_difference(), count, rng);
        let filtered = filter_pairs(
            cipher,
            state,
            round,
            &unfiltered,
            characteristic.sieve_difference(),
            full_mask,
        )?;

        if filtered.len() >= MIN_FILTERED_PAIRS || count >= MAX_PAIR_COUNT {
            return Ok((unfiltered, filtered));
        }

        count += PAIR_COUNT_STEP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn oracle() -> (CipherFour, Oracle) {
        let cipher = CipherFour::new();
        let keys = [
            Block(0x5b92),
            Block(0x064b),
            Block(0x1e03),
            Block(0xa55f),
            Block(0xecbd),
            Block(0x7ca5),
        ];

        (cipher.clone(), Oracle::new(cipher, keys))
    }

    #[test]
    fn pairs_have_requested_difference() {
        let (_, oracle) = oracle();
        let mut rng = StdRng::seed_from_u64(1);
        let pairs = generate_pairs(&oracle, Block(0x0020), 100, &mut rng);

        assert_eq!(pairs.len(), 100);

        for pair in &pairs {
            assert_eq!(pair.left ^ pair.right, Block(0x0020));
            assert_eq!(oracle.encrypt_block(pair.left), pair.left_ct);
        }
    }

    #[test]
    fn filter_is_sound_and_idempotent() {
        let (cipher, oracle) = oracle();
        let state = KeyRecoveryState::new();
        let mut rng = StdRng::seed_from_u64(2);

        let pairs = generate_pairs(&oracle, Block(0x0002), 5000, &mut rng);
        let expected = Block(0x0001);

        let filtered = filter_pairs(&cipher, &state, 5, &pairs, expected, 0b1111).unwrap();
        assert!(!filtered.is_empty());
        assert!(filtered.len() < pairs.len());

        for pair in &filtered {
            assert_eq!(
                sieve_difference(&cipher, &state, 5, pair).unwrap(),
                expected
            );
            assert!(pairs.contains(pair));
        }

        let again = filter_pairs(&cipher, &state, 5, &filtered, expected, 0b1111).unwrap();
        assert_eq!(again, filtered);
    }

    #[test]
    fn trail_probability_is_a_lower_bound_on_frequency() {
        use crate::search::{find_differential, AbortingPolicy, SearchPolicy};

        let (cipher, oracle) = oracle();
        let characteristic = find_differential(
            &cipher,
            5,
            0b0001,
            SearchPolicy::FirstBestCharacteristic,
            AbortingPolicy::Threshold(0.0001),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(0x57a7);
        let pairs = generate_pairs(&oracle, characteristic.input_difference(), 100_000, &mut rng);
        let hits = pairs
            .iter()
            .filter(|p| p.left_ct ^ p.right_ct == characteristic.sieve_difference())
            .count();
        let frequency = hits as f64 / 100_000.0;

        // The single-trail probability is a lower bound under the Markov
        // model; competing trails ending in the same difference add mass
        // on top of it.
        assert!(frequency >= characteristic.probability);
        assert!(frequency <= 6.0 * characteristic.probability);
    }

    #[test]
    fn sieving_requires_peeled_rounds() {
        let (cipher, oracle) = oracle();
        let state = KeyRecoveryState::new();
        let mut rng = StdRng::seed_from_u64(3);

        let pairs = generate_pairs(&oracle, Block(0x0002), 1, &mut rng);

        // Attacking round 4 without the last-round key is an error.
        assert!(sieve_difference(&cipher, &state, 4, &pairs[0]).is_err());
    }
}
