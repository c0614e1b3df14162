//! Round-key recovery: the counting attack and the terminal exhaustive
//! first-round attack.

use indexmap::IndexMap;
use rand::Rng;

use crate::block::{Block, NUM_SBOXES};
use crate::characteristic::Characteristic;
use crate::cipher::{CipherFour, Oracle, NUM_KEYS};
use crate::error::{Error, Result};
use crate::pairs::{filter_pairs, Pair};

/// Subkeys recovered so far, indexed by key position in the schedule.
/// Keys are recovered from the back of the cipher, so position `r` can
/// only be peeled once every later position is present.
#[derive(Clone, Debug, Default)]
pub struct KeyRecoveryState {
    subkeys: [Option<Block>; NUM_KEYS],
}

impl KeyRecoveryState {
    pub fn new() -> KeyRecoveryState {
        KeyRecoveryState::default()
    }

    pub fn recovered(&self, position: usize) -> Option<Block> {
        self.subkeys[position]
    }

    pub fn set_recovered(&mut self, position: usize, key: Block) {
        self.subkeys[position] = Some(key);
    }

    /// True once the whole schedule is known.
    pub fn schedule(&self) -> Option<[Block; NUM_KEYS]> {
        let mut keys = [Block(0); NUM_KEYS];

        for (position, subkey) in self.subkeys.iter().enumerate() {
            keys[position] = (*subkey)?;
        }

        Some(keys)
    }

    /// Fails unless every key later than `round` has been recovered.
    pub fn check_peelable(&self, round: usize) -> Result<()> {
        for position in round + 1..NUM_KEYS {
            if self.subkeys[position].is_none() {
                return Err(Error::InvariantViolation(format!(
                    "peeling for round {} requires subkey {}",
                    round, position
                )));
            }
        }

        Ok(())
    }

    /// Strips every recovered round off a ciphertext, leaving the state
    /// just after the deepest unrecovered round's key-mix.
    pub fn peel(&self, cipher: &CipherFour, ciphertext: Block) -> Block {
        let mut state = ciphertext;

        if let Some(k5) = self.subkeys[5] {
            state ^= k5;
        }

        if let Some(k4) = self.subkeys[4] {
            state = cipher.substitute_inverse(state) ^ k4;
        }

        for position in (2..=3).rev() {
            if let Some(key) = self.subkeys[position] {
                state = cipher.substitute_inverse(CipherFour::permute(state)) ^ key;
            }
        }

        state
    }
}

/// Outcome of recovering one subkey nibble.
#[derive(Clone, Debug)]
pub enum BoxRecovery {
    /// A unique winner, either directly or through the documented
    /// tie-break ladder. `votes` is the primary vote table.
    Recovered { key: u8, votes: IndexMap<u8, usize> },
    /// The tie-break ladder could not separate the top candidates; the
    /// numerically smallest one is reported.
    Ambiguous { key: u8, margin: usize },
}

impl BoxRecovery {
    pub fn key(&self) -> u8 {
        match self {
            BoxRecovery::Recovered { key, .. } => *key,
            BoxRecovery::Ambiguous { key, .. } => *key,
        }
    }
}

/// Partially decrypts one ciphertext one round back under a guessed round
/// key, into the attacked round's input domain.
fn decrypt_with_guess(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    guess: Block,
    ciphertext: Block,
) -> Block {
    let peeled = state.peel(cipher, ciphertext);

    match round {
        5 => cipher.substitute_inverse(peeled ^ guess),
        4 => {
            let inner = cipher.substitute_inverse(peeled) ^ guess;
            cipher.substitute_inverse(CipherFour::permute(inner))
        }
        _ => {
            let inner = cipher.substitute_inverse(CipherFour::permute(peeled)) ^ guess;
            cipher.substitute_inverse(CipherFour::permute(inner))
        }
    }
}

/// The per-box key hypothesis as a full-block guess. For the last round
/// the nibble is used in place; for earlier rounds it is pushed through
/// the permutation, which is what decouples the boxes and keeps the
/// candidate space at sixteen per box.
fn expand_guess(round: usize, bx: usize, candidate: u8) -> Block {
    let guess = Block(0).with_nibble(bx, candidate);

    if round == 5 {
        guess
    } else {
        CipherFour::permute(guess)
    }
}

fn count_votes(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    bx: usize,
    expected: u8,
    pairs: &[Pair],
    candidates: &[u8],
) -> IndexMap<u8, usize> {
    let mut votes: IndexMap<u8, usize> = candidates.iter().map(|&c| (c, 0)).collect();

    for pair in pairs {
        for (&candidate, count) in votes.iter_mut() {
            let guess = expand_guess(round, bx, candidate);
            let left = decrypt_with_guess(cipher, state, round, guess, pair.left_ct);
            let right = decrypt_with_guess(cipher, state, round, guess, pair.right_ct);

            if (left ^ right).nibble(bx) == expected {
                *count += 1;
            }
        }
    }

    votes
}

fn top_candidates(votes: &IndexMap<u8, usize>) -> (Vec<u8>, usize) {
    let top = votes.values().copied().max().unwrap_or(0);
    let mut tied: Vec<u8> = votes
        .iter()
        .filter(|(_, &v)| v == top)
        .map(|(&c, _)| c)
        .collect();
    tied.sort_unstable();

    let margin = top
        - votes
            .values()
            .copied()
            .filter(|&v| v < top)
            .max()
            .unwrap_or(top);

    (tied, margin)
}

/// Recovers the subkey nibble of one S-box by counting votes over the
/// filtered pairs.
///
/// An exact single-value sieve makes the guesses `g` and
/// `g ^ sieve-nibble` receive identical vote counts, because XORing the
/// guess with the sieve difference swaps the two pair members. The
/// resulting tie is broken by re-sieving the unfiltered list against the
/// remaining DDT-compatible output differences of the expected nibble, in
/// descending count order, recounting only the tied candidates.
pub fn attack_sbox(
    cipher: &CipherFour,
    state: &KeyRecoveryState,
    round: usize,
    bx: usize,
    characteristic: &Characteristic,
    unfiltered: &[Pair],
    filtered: &[Pair],
) -> Result<BoxRecovery> {
    state.check_peelable(round)?;
    debug_assert!(bx < NUM_SBOXES);

    let expected = characteristic.expected_difference().nibble(bx);
    let sieve = characteristic.sieve_difference();
    let all: Vec<u8> = (0..16).collect();

    let votes = count_votes(cipher, state, round, bx, expected, filtered, &all);
    let (mut tied, margin) = top_candidates(&votes);

    if tied.len() > 1 {
        let full_mask = (1 << NUM_SBOXES) - 1;

        for entry in cipher.sbox().row(expected) {
            if entry.output_diff == sieve.nibble(bx) {
                continue;
            }

            let alternate = sieve.with_nibble(bx, entry.output_diff);
            let resieved = filter_pairs(cipher, state, round, unfiltered, alternate, full_mask)?;

            if resieved.is_empty() {
                continue;
            }

            let recount = count_votes(cipher, state, round, bx, expected, &resieved, &tied);
            let (narrowed, _) = top_candidates(&recount);
            tied = narrowed;

            if tied.len() == 1 {
                break;
            }
        }
    }

    if tied.len() == 1 {
        Ok(BoxRecovery::Recovered { key: tied[0], votes })
    } else {
        Ok(BoxRecovery::Ambiguous {
            key: tied[0],
            margin,
        })
    }
}

/// Result of the terminal exhaustive attack.
#[derive(Clone, Debug)]
pub struct FirstRoundResult {
    pub schedule: [Block; NUM_KEYS],
    pub keys_tested: usize,
}

const FIRST_ROUND_MAX_PAIRS: usize = 64;
const VERIFY_PROBES: usize = 64;

/// Recovers the two remaining subkeys once positions 2 through 5 are
/// known. Candidate sets for the second subkey are intersected over fresh
/// random pairs until a single key survives; the first subkey then falls
/// out of one known plaintext, and the completed schedule is verified
/// against the oracle.
pub fn attack_first_round<R: Rng>(
    cipher: &CipherFour,
    oracle: &Oracle,
    state: &KeyRecoveryState,
    rng: &mut R,
) -> Result<FirstRoundResult> {
    state.check_peelable(1)?;

    let to_round_two_input = |w: Block, k1: Block| {
        let inner = cipher.substitute_inverse(CipherFour::permute(w)) ^ k1;
        cipher.substitute_inverse(CipherFour::permute(inner))
    };

    let mut keys_tested = 0;
    let mut candidates: Option<Vec<u16>> = None;

    for _ in 0..FIRST_ROUND_MAX_PAIRS {
        let left = Block(rng.gen());
        let right = Block(rng.gen());
        let expected = left ^ right;

        let peeled_left = state.peel(cipher, oracle.encrypt_block(left));
        let peeled_right = state.peel(cipher, oracle.encrypt_block(right));

        let surviving: Vec<u16> = match &candidates {
            None => (0..=0xffffu16)
                .filter(|&k| {
                    keys_tested += 1;
                    let key = Block(k);
                    to_round_two_input(peeled_left, key) ^ to_round_two_input(peeled_right, key)
                        == expected
                })
                .collect(),
            Some(previous) => previous
                .iter()
                .copied()
                .filter(|&k| {
                    keys_tested += 1;
                    let key = Block(k);
                    to_round_two_input(peeled_left, key) ^ to_round_two_input(peeled_right, key)
                        == expected
                })
                .collect(),
        };

        if surviving.is_empty() {
            return Err(Error::RecoveryFailed);
        }

        if surviving.len() == 1 {
            let k1 = Block(surviving[0]);

            // One known plaintext pins the first subkey.
            let probe = Block(rng.gen());
            let peeled = state.peel(cipher, oracle.encrypt_block(probe));
            let inner = cipher.substitute_inverse(CipherFour::permute(peeled)) ^ k1;
            let k0 = cipher.substitute_inverse(CipherFour::permute(inner)) ^ probe;

            let mut schedule = [Block(0); NUM_KEYS];
            schedule[0] = k0;
            schedule[1] = k1;

            for position in 2..NUM_KEYS {
                schedule[position] = state
                    .recovered(position)
                    .ok_or(Error::RecoveryFailed)?;
            }

            for _ in 0..VERIFY_PROBES {
                let p = Block(rng.gen());

                if cipher.encrypt_block(&schedule, p) != oracle.encrypt_block(p) {
                    return Err(Error::RecoveryFailed);
                }
            }

            return Ok(FirstRoundResult {
                schedule,
                keys_tested,
            });
        }

        candidates = Some(surviving);
    }

    Err(Error::RecoveryFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs::refresh_pair_lists;
    use crate::search::{find_differential, AbortingPolicy, SearchPolicy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TEST_KEYS: [Block; NUM_KEYS] = [
        Block(0x5b92),
        Block(0x064b),
        Block(0x1e03),
        Block(0xa55f),
        Block(0xecbd),
        Block(0x7ca5),
    ];

    #[test]
    fn recovers_last_round_nibble() {
        let cipher = CipherFour::new();
        let oracle = Oracle::new(cipher.clone(), TEST_KEYS);
        let state = KeyRecoveryState::new();
        let mut rng = StdRng::seed_from_u64(0xd1ff);

        let characteristic = find_differential(
            &cipher,
            5,
            0b0001,
            SearchPolicy::AllCharacteristics,
            AbortingPolicy::Threshold(0.0001),
        )
        .unwrap();

        let (unfiltered, filtered) =
            refresh_pair_lists(&oracle, &cipher, &state, 5, &characteristic, 20000, &mut rng)
                .unwrap();

        let result =
            attack_sbox(&cipher, &state, 5, 0, &characteristic, &unfiltered, &filtered).unwrap();

        assert_eq!(result.key(), TEST_KEYS[5].nibble(0));
    }

    #[test]
    fn exhaustive_attack_completes_schedule() {
        let cipher = CipherFour::new();
        let oracle = Oracle::new(cipher.clone(), TEST_KEYS);
        let mut rng = StdRng::seed_from_u64(0xf1f5);

        let mut state = KeyRecoveryState::new();
        for position in 2..NUM_KEYS {
            state.set_recovered(position, TEST_KEYS[position]);
        }

        let result = attack_first_round(&cipher, &oracle, &state, &mut rng).unwrap();

        assert_eq!(result.schedule, TEST_KEYS);
        assert!(result.keys_tested >= 1 << 16);
    }

    #[test]
    fn peeling_out_of_order_is_rejected() {
        let mut state = KeyRecoveryState::new();
        state.set_recovered(5, Block(0x1234));

        assert!(state.check_peelable(4).is_ok());
        assert!(state.check_peelable(3).is_err());
    }
}
