//! The round-by-round attack orchestrator.
//!
//! Subkeys are recovered from the back of the cipher: round 5 (the output
//! whitening), then rounds 4, 3 and 2, each peeled off before attacking
//! the next, down to the terminal exhaustive attack on the two remaining
//! keys.

use crossbeam_utils::thread;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::mpsc;

use crate::block::{Block, NUM_SBOXES};
use crate::cipher::{CipherFour, Oracle, NUM_KEYS};
use crate::config::AttackConfiguration;
use crate::error::{Error, Result};
use crate::pairs::refresh_pair_lists;
use crate::recovery::{attack_first_round, attack_sbox, BoxRecovery, KeyRecoveryState};
use crate::search::{find_differential, AbortingPolicy, SearchPolicy};

/// Rounds attacked with the counting attack, in peel order.
pub const ATTACKED_ROUNDS: [usize; 4] = [5, 4, 3, 2];

/// The per-round attack plan: four S-box subsets, each contributing one
/// nibble of the round key. The multi-box subsets exist because a
/// single-box differential does not reach every box of every round with
/// usable probability.
pub const ATTACK_PLAN: [(u8, usize); 4] = [(0b0001, 0), (0b0010, 1), (0b1001, 3), (0b1110, 2)];

/// Merges per-box results into a full round subkey.
#[derive(Clone, Debug, Default)]
pub struct ResultAggregator {
    nibbles: [Option<u8>; NUM_SBOXES],
}

impl ResultAggregator {
    pub fn new() -> ResultAggregator {
        ResultAggregator::default()
    }

    pub fn add(&mut self, bx: usize, nibble: u8) {
        self.nibbles[bx] = Some(nibble);
    }

    /// Assembles the nibbles into the round subkey. The counting attack
    /// guesses permuted key material for the non-final rounds, so the
    /// assembled block is pushed back through the permutation there.
    pub fn merge(&self, round: usize) -> Result<Block> {
        let mut nibbles = [0u8; NUM_SBOXES];

        for (bx, nibble) in self.nibbles.iter().enumerate() {
            nibbles[bx] = nibble.ok_or_else(|| {
                Error::InvariantViolation(format!("round {}: missing nibble {}", round, bx))
            })?;
        }

        let merged = Block::from_nibbles(nibbles);

        if round == 5 {
            Ok(merged)
        } else {
            Ok(CipherFour::permute(merged))
        }
    }
}

/// Outcome of a full attack run.
#[derive(Clone, Debug)]
pub struct AttackSummary {
    pub schedule: [Block; NUM_KEYS],
    pub keys_tested: usize,
    pub ambiguous_boxes: usize,
    pub seconds: f64,
}

/// Attacks one (round, S-box subset) configuration and returns the
/// recovered nibble for the planned box.
fn run_configuration(
    cipher: &CipherFour,
    oracle: &Oracle,
    state: &KeyRecoveryState,
    round: usize,
    mask: u8,
    bx: usize,
    pairs_per_round: usize,
    bound: f64,
    rng: &mut StdRng,
) -> Result<(AttackConfiguration, BoxRecovery)> {
    let characteristic = find_differential(
        cipher,
        round,
        mask,
        SearchPolicy::AllCharacteristics,
        AbortingPolicy::Threshold(bound),
    )?;

    let (unfiltered, filtered) = refresh_pair_lists(
        oracle,
        cipher,
        state,
        round,
        &characteristic,
        pairs_per_round,
        rng,
    )?;

    let recovery = attack_sbox(cipher, state, round, bx, &characteristic, &unfiltered, &filtered)?;

    let configuration = AttackConfiguration {
        round,
        active_mask: mask,
        search_policy: SearchPolicy::AllCharacteristics,
        aborting_policy: AbortingPolicy::Threshold(bound),
        characteristic,
        unfiltered_pairs: unfiltered,
        filtered_pairs: filtered,
    };

    Ok((configuration, recovery))
}

/// Recovers one round subkey by running the four planned configurations
/// on worker threads and merging their nibbles.
fn attack_round(
    cipher: &CipherFour,
    oracle: &Oracle,
    state: &KeyRecoveryState,
    round: usize,
    pairs_per_round: usize,
    bound: f64,
    rng: &mut StdRng,
    ambiguous_boxes: &mut usize,
) -> Result<Block> {
    // Per-worker generators keep the run reproducible for a fixed seed.
    let seeds: Vec<u64> = ATTACK_PLAN.iter().map(|_| rng.gen()).collect();
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for (&(mask, bx), seed) in ATTACK_PLAN.iter().zip(seeds) {
            let result_tx = result_tx.clone();

            scope.spawn(move |_| {
                let mut rng = StdRng::seed_from_u64(seed);
                let result = run_configuration(
                    cipher,
                    oracle,
                    state,
                    round,
                    mask,
                    bx,
                    pairs_per_round,
                    bound,
                    &mut rng,
                );

                result_tx.send((bx, result)).expect("main thread receiving");
            });
        }
    })
    .expect("scoped threads");
    drop(result_tx);

    let mut aggregator = ResultAggregator::new();

    for (bx, result) in result_rx.iter() {
        let (_, recovery) = result?;

        if let BoxRecovery::Ambiguous { .. } = recovery {
            *ambiguous_boxes += 1;
        }

        aggregator.add(bx, recovery.key());
    }

    aggregator.merge(round)
}

/// Runs the complete key recovery attack against the oracle.
pub fn run_attack<R: Rng>(
    cipher: &CipherFour,
    oracle: &Oracle,
    pairs_per_round: usize,
    bound: f64,
    rng: &mut R,
) -> Result<AttackSummary> {
    let start = time::precise_time_s();
    let mut state = KeyRecoveryState::new();
    let mut ambiguous_boxes = 0;
    let mut driver = StdRng::seed_from_u64(rng.gen());

    for &round in &ATTACKED_ROUNDS {
        let key = attack_round(
            cipher,
            oracle,
            &state,
            round,
            pairs_per_round,
            bound,
            &mut driver,
            &mut ambiguous_boxes,
        )?;

        println!("recovered subkey {}: {}", round, key);
        state.set_recovered(round, key);
    }

    let terminal = attack_first_round(cipher, oracle, &state, &mut driver)?;

    println!(
        "recovered subkeys 0, 1: {} {} ({} keys tested)",
        terminal.schedule[0], terminal.schedule[1], terminal.keys_tested
    );

    Ok(AttackSummary {
        schedule: terminal.schedule,
        keys_tested: terminal.keys_tested,
        ambiguous_boxes,
        seconds: time::precise_time_s() - start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEYS: [Block; NUM_KEYS] = [
        Block(0x5b92),
        Block(0x064b),
        Block(0x1e03),
        Block(0xa55f),
        Block(0xecbd),
        Block(0x7ca5),
    ];

    #[test]
    fn aggregator_applies_permutation_below_last_round() {
        let mut aggregator = ResultAggregator::new();

        for bx in 0..NUM_SBOXES {
            aggregator.add(bx, Block(0x1234).nibble(bx));
        }

        assert_eq!(aggregator.merge(5).unwrap(), Block(0x1234));
        assert_eq!(
            aggregator.merge(4).unwrap(),
            CipherFour::permute(Block(0x1234))
        );
    }

    #[test]
    fn aggregator_rejects_missing_nibbles() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add(0, 3);

        assert!(aggregator.merge(5).is_err());
    }

    #[test]
    fn full_attack_recovers_fixed_schedule() {
        let cipher = CipherFour::new();
        let oracle = Oracle::new(cipher.clone(), TEST_KEYS);
        let mut rng = StdRng::seed_from_u64(0xca11);

        let summary = run_attack(&cipher, &oracle, 20000, 0.0001, &mut rng).unwrap();

        assert_eq!(summary.schedule, TEST_KEYS);
        assert!(summary.keys_tested >= 1 << 16);
    }

    #[test]
    fn full_attack_recovers_random_schedule() {
        let cipher = CipherFour::new();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let keys = CipherFour::random_keys(&mut rng);
        let oracle = Oracle::new(cipher.clone(), keys);

        let summary = run_attack(&cipher, &oracle, 20000, 0.0001, &mut rng).unwrap();

        assert_eq!(summary.schedule, keys);
    }
}
