//! Search for high probability differentials.
//!
//! The search works forward from candidate single-box plaintext
//! differences through the S-layers of the rounds leading into the
//! attacked round. Propagation through the key-mix and the bit
//! permutation is exact, so only active S-boxes branch. Along a trail
//! probabilities multiply; trails ending at the same attacked-round input
//! difference have their probabilities summed, since the counting attack
//! sees the whole differential, not a single trail.

use crossbeam_utils::thread;
use fnv::FnvHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::mpsc;

use crate::block::{Block, NUM_SBOXES};
use crate::characteristic::{Characteristic, RoundDifferential};
use crate::cipher::CipherFour;
use crate::error::{Error, Result};
use crate::sbox::{DifferentialEntry, Sbox};

lazy_static! {
    static ref THREADS: usize = num_cpus::get();
}

/// How the candidate differentials are explored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchPolicy {
    /// Greedy descent: per round and active box only the best DDT entry
    /// is followed. Cheap, but blind to competing trail families.
    FirstBestCharacteristic,
    /// Full bounded enumeration with per-terminal aggregation and margin
    /// based sieve selection. Used by the orchestrator.
    AllCharacteristics,
}

/// When to abandon a partial trail.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AbortingPolicy {
    /// Drop any trail whose running probability falls below the bound.
    Threshold(f64),
}

/// Bit `i` set iff nibble `i` of the difference is active.
pub fn activity_mask(diff: Block) -> u8 {
    let mut mask = 0;

    for i in 0..NUM_SBOXES {
        if diff.nibble_active(i) {
            mask |= 1 << i;
        }
    }

    mask
}

fn active_boxes(mask: u8) -> SmallVec<[usize; 4]> {
    (0..NUM_SBOXES).filter(|&i| (mask >> i) & 1 == 1).collect()
}

/// Accumulates the probability of every trail from `diff` over `layers`
/// S-layers into a map keyed by terminal difference.
fn aggregate_trails(
    sbox: &Sbox,
    diff: Block,
    probability: f64,
    layers: usize,
    bound: f64,
    terminals: &mut FnvHashMap<u16, f64>,
) {
    if layers == 0 {
        *terminals.entry(diff.0).or_insert(0.0) += probability;
        return;
    }

    let boxes = active_boxes(activity_mask(diff));
    let options = boxes.iter().map(|&b| sbox.row(diff.nibble(b)).iter());

    for combo in options.multi_cartesian_product() {
        let mut p = probability;
        let mut out = Block(0);

        for (&b, entry) in boxes.iter().zip(&combo) {
            p *= entry.probability();
            out = out.with_nibble(b, entry.output_diff);
        }

        if p < bound {
            continue;
        }

        aggregate_trails(sbox, CipherFour::permute(out), p, layers - 1, bound, terminals);
    }
}

/// Highest probability single trail from `diff` to `target` over `layers`
/// S-layers, as round-by-round differentials.
fn best_trail(
    sbox: &Sbox,
    diff: Block,
    target: Block,
    layers: usize,
    bound: f64,
) -> Option<(f64, Vec<RoundDifferential>)> {
    if layers == 0 {
        if diff == target {
            return Some((1.0, Vec::new()));
        }
        return None;
    }

    let boxes = active_boxes(activity_mask(diff));
    let options = boxes.iter().map(|&b| sbox.row(diff.nibble(b)).iter());
    let mut best: Option<(f64, Vec<RoundDifferential>)> = None;

    for combo in options.multi_cartesian_product() {
        let mut p = 1.0;
        let mut out = Block(0);

        for (&b, entry) in boxes.iter().zip(&combo) {
            p *= entry.probability();
            out = out.with_nibble(b, entry.output_diff);
        }

        if p < bound {
            continue;
        }

        if let Some((tail_p, tail)) =
            best_trail(sbox, CipherFour::permute(out), target, layers - 1, bound / p)
        {
            let total = p * tail_p;

            if best.as_ref().map_or(true, |(bp, _)| total > *bp) {
                let mut rounds = vec![RoundDifferential { input: diff, output: out }];
                rounds.extend(tail);
                best = Some((total, rounds));
            }
        }
    }

    best
}

/// Result of evaluating one candidate plaintext difference.
struct Candidate {
    input: Block,
    expected: Block,
    sieve: Block,
    aggregate: f64,
    sieve_probability: f64,
    min_margin: f64,
}

/// Picks, for each attacked box, the S-layer extension output that
/// maximizes the predicted vote margin of the expected nibble over the
/// strongest rival trail family ending in a different nibble value.
fn select_sieve(
    sbox: &Sbox,
    terminals: &FnvHashMap<u16, f64>,
    mask: u8,
    expected: Block,
) -> (Block, f64, f64) {
    let mut sieve = Block(0);
    let mut sieve_probability = 1.0;
    let mut min_margin = f64::INFINITY;

    for b in active_boxes(mask) {
        // Aggregate trail mass per nibble value at this box, over the
        // terminals with the same activity pattern.
        let mut mass = [0.0f64; 16];

        for (&terminal, &p) in terminals {
            let terminal = Block(terminal);

            if activity_mask(terminal) == mask {
                mass[terminal.nibble(b) as usize] += p;
            }
        }

        let e = expected.nibble(b);
        let mut best: Option<(f64, &DifferentialEntry)> = None;

        for entry in sbox.row(e) {
            let o = entry.output_diff;
            let rival = (1..16)
                .filter(|&a| a != e)
                .map(|a| sbox.count(a, o) as f64 / 16.0 * mass[a as usize])
                .fold(0.0, f64::max);
            let margin = entry.probability() * mass[e as usize] - rival;

            // Prefer the smaller output difference on equal margins.
            let better = match best {
                None => true,
                Some((m, prev)) => margin > m || (margin == m && o < prev.output_diff),
            };

            if better {
                best = Some((margin, entry));
            }
        }

        // The row of a nonzero difference is never empty.
        let (margin, entry) = best.expect("nonzero DDT row");
        sieve = sieve.with_nibble(b, entry.output_diff);
        sieve_probability *= entry.probability();
        min_margin = min_margin.min(margin);
    }

    (sieve, sieve_probability, min_margin)
}

fn evaluate_candidate(
    sbox: &Sbox,
    round: usize,
    mask: u8,
    input: Block,
    bound: f64,
) -> Option<Candidate> {
    let mut terminals = FnvHashMap::default();
    aggregate_trails(sbox, input, 1.0, round - 1, bound, &mut terminals);

    // Keep the terminal whose activity pattern is exactly the attacked
    // subset and whose aggregate mass is largest.
    let (expected, aggregate) = terminals
        .iter()
        .filter(|(&t, _)| activity_mask(Block(t)) == mask)
        .map(|(&t, &p)| (Block(t), p))
        .fold(None, |best: Option<(Block, f64)>, (t, p)| match best {
            Some((bt, bp)) if p < bp || (p == bp && bt.0 <= t.0) => Some((bt, bp)),
            _ => Some((t, p)),
        })?;

    let (sieve, sieve_probability, min_margin) =
        select_sieve(sbox, &terminals, mask, expected);

    if aggregate * sieve_probability < bound {
        return None;
    }

    Some(Candidate {
        input,
        expected,
        sieve,
        aggregate,
        sieve_probability,
        min_margin,
    })
}

/// Finds the best differential for attacking `round` on the S-box subset
/// `mask`, where bit `i` of the mask selects nibble `i`.
///
/// The returned characteristic's expected difference is the
/// attacked-round input difference to vote for, and its sieve difference
/// is the exact filter target over the full block.
pub fn find_differential(
    cipher: &CipherFour,
    round: usize,
    mask: u8,
    search_policy: SearchPolicy,
    aborting_policy: AbortingPolicy,
) -> Result<Characteristic> {
    if !(2..=5).contains(&round) {
        return Err(Error::Configuration(format!(
            "attack round {} out of range",
            round
        )));
    }

    if mask == 0 || mask > 0b1111 {
        return Err(Error::Configuration(format!(
            "active mask {:#06b} out of range",
            mask
        )));
    }

    let AbortingPolicy::Threshold(bound) = aborting_policy;
    let sbox = cipher.sbox();

    // Candidate plaintext differences activate a single S-box.
    let candidates: Vec<Block> = (0..NUM_SBOXES)
        .flat_map(|b| (1..16).map(move |v| Block(0).with_nibble(b, v)))
        .collect();

    match search_policy {
        SearchPolicy::FirstBestCharacteristic => {
            first_best(sbox, round, mask, &candidates, bound)
        }
        SearchPolicy::AllCharacteristics => {
            all_characteristics(sbox, round, mask, &candidates, bound)
        }
    }
}

fn all_characteristics(
    sbox: &Sbox,
    round: usize,
    mask: u8,
    candidates: &[Block],
    bound: f64,
) -> Result<Characteristic> {
    let num_threads = std::cmp::min(*THREADS, candidates.len());
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for t in 0..num_threads {
            let result_tx = result_tx.clone();

            scope.spawn(move |_| {
                for (idx, &input) in candidates.iter().enumerate().skip(t).step_by(num_threads) {
                    if let Some(candidate) = evaluate_candidate(sbox, round, mask, input, bound) {
                        result_tx
                            .send((idx, candidate))
                            .expect("main thread receiving");
                    }
                }
            });
        }
    })
    .expect("scoped threads");
    drop(result_tx);

    let mut results: Vec<(usize, Candidate)> = result_rx.iter().collect();
    results.sort_by_key(|(idx, _)| *idx);

    let mut best: Option<Candidate> = None;

    for (_, candidate) in results {
        let better = match &best {
            None => true,
            Some(b) => {
                (candidate.min_margin, candidate.aggregate) > (b.min_margin, b.aggregate)
            }
        };

        if better {
            best = Some(candidate);
        }
    }

    let candidate = best.ok_or(Error::SearchFailed { round, mask, bound })?;

    // Reconstruct the best single trail for reporting; its terminal is
    // the aggregate-dominant expected difference, so a trail exists.
    let (_, mut rounds) = best_trail(sbox, candidate.input, candidate.expected, round - 1, bound)
        .ok_or(Error::SearchFailed { round, mask, bound })?;

    rounds.push(RoundDifferential {
        input: candidate.expected,
        output: candidate.sieve,
    });

    Ok(Characteristic {
        rounds,
        probability: candidate.aggregate * candidate.sieve_probability,
    })
}

fn first_best(
    sbox: &Sbox,
    round: usize,
    mask: u8,
    candidates: &[Block],
    bound: f64,
) -> Result<Characteristic> {
    for &input in candidates {
        let mut rounds = Vec::with_capacity(round);
        let mut diff = input;
        let mut probability = 1.0;

        for _ in 0..round - 1 {
            let boxes = active_boxes(activity_mask(diff));
            let mut out = Block(0);

            for &b in &boxes {
                let entry = sbox.row(diff.nibble(b))[0];
                probability *= entry.probability();
                out = out.with_nibble(b, entry.output_diff);
            }

            rounds.push(RoundDifferential { input: diff, output: out });
            diff = CipherFour::permute(out);
        }

        if activity_mask(diff) != mask || probability < bound {
            continue;
        }

        let mut sieve = Block(0);

        for &b in &active_boxes(mask) {
            let entry = sbox.row(diff.nibble(b))[0];
            probability *= entry.probability();
            sieve = sieve.with_nibble(b, entry.output_diff);
        }

        if probability < bound {
            continue;
        }

        rounds.push(RoundDifferential { input: diff, output: sieve });

        return Ok(Characteristic { rounds, probability });
    }

    Err(Error::SearchFailed { round, mask, bound })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUND: f64 = 0.0001;

    #[test]
    fn last_round_single_box_differential() {
        let cipher = CipherFour::new();
        let characteristic = find_differential(
            &cipher,
            5,
            0b0001,
            SearchPolicy::AllCharacteristics,
            AbortingPolicy::Threshold(BOUND),
        )
        .unwrap();

        assert_eq!(characteristic.input_difference(), Block(0x0002));
        assert_eq!(characteristic.expected_difference(), Block(0x0002));
        assert_eq!(characteristic.sieve_difference(), Block(0x0001));
        assert!(characteristic.probability >= BOUND);
    }

    #[test]
    fn multi_box_differential_activity() {
        let cipher = CipherFour::new();

        for &mask in &[0b0010u8, 0b1001, 0b1110] {
            let characteristic = find_differential(
                &cipher,
                4,
                mask,
                SearchPolicy::AllCharacteristics,
                AbortingPolicy::Threshold(BOUND),
            )
            .unwrap();

            assert_eq!(activity_mask(characteristic.expected_difference()), mask);
            assert_eq!(activity_mask(characteristic.sieve_difference()), mask);
            assert!(characteristic.probability >= BOUND);
        }
    }

    #[test]
    fn trail_chains_through_permutation() {
        let cipher = CipherFour::new();
        let characteristic = find_differential(
            &cipher,
            5,
            0b0010,
            SearchPolicy::AllCharacteristics,
            AbortingPolicy::Threshold(BOUND),
        )
        .unwrap();

        assert_eq!(characteristic.rounds.len(), 5);

        for pair in characteristic.rounds.windows(2) {
            assert_eq!(CipherFour::permute(pair[0].output), pair[1].input);
        }
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let cipher = CipherFour::new();

        for &(round, mask) in &[(0usize, 0b0001u8), (1, 0b0001), (6, 0b0001), (5, 0), (5, 16)] {
            let result = find_differential(
                &cipher,
                round,
                mask,
                SearchPolicy::AllCharacteristics,
                AbortingPolicy::Threshold(BOUND),
            );

            assert!(matches!(result, Err(crate::error::Error::Configuration(_))));
        }
    }

    #[test]
    fn greedy_policy_finds_iterative_trail() {
        let cipher = CipherFour::new();
        let characteristic = find_differential(
            &cipher,
            3,
            0b0010,
            SearchPolicy::FirstBestCharacteristic,
            AbortingPolicy::Threshold(BOUND),
        )
        .unwrap();

        assert_eq!(activity_mask(characteristic.expected_difference()), 0b0010);
        assert!(characteristic.probability >= BOUND);
    }
}
