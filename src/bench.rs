//! Repeated-trial harness for measuring attack reliability.

use crossbeam_utils::thread;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::mpsc;

use crate::attack::run_attack;
use crate::cipher::{CipherFour, Oracle};
use crate::error::{Error, Result};

lazy_static! {
    static ref THREADS: usize = num_cpus::get();
}

#[derive(Clone, Debug, Default)]
pub struct BenchReport {
    pub trials: usize,
    pub successes: usize,
    pub failures: usize,
    pub total_keys_tested: usize,
    pub seconds: f64,
}

/// Runs `trials` independent attacks, each against a fresh random key
/// schedule. Statistical misses are counted as failures; structural
/// errors abort the whole run.
pub fn run_bench(
    cipher: &CipherFour,
    trials: usize,
    pairs_per_round: usize,
    bound: f64,
    seed: u64,
) -> Result<BenchReport> {
    let start = time::precise_time_s();
    let mut seeder = StdRng::seed_from_u64(seed);
    let seeds: Vec<u64> = (0..trials).map(|_| seeder.gen()).collect();

    let num_threads = std::cmp::min(*THREADS, std::cmp::max(trials, 1));
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for t in 0..num_threads {
            let result_tx = result_tx.clone();
            let seeds = &seeds;

            scope.spawn(move |_| {
                for trial_seed in seeds.iter().skip(t).step_by(num_threads) {
                    let mut rng = StdRng::seed_from_u64(*trial_seed);
                    let keys = CipherFour::random_keys(&mut rng);
                    let oracle = Oracle::new(cipher.clone(), keys);

                    let outcome = run_attack(cipher, &oracle, pairs_per_round, bound, &mut rng);
                    result_tx.send(outcome).expect("main thread receiving");
                }
            });
        }
    })
    .expect("scoped threads");
    drop(result_tx);

    let mut report = BenchReport {
        trials,
        ..BenchReport::default()
    };

    for outcome in result_rx.iter() {
        match outcome {
            Ok(summary) => {
                report.successes += 1;
                report.total_keys_tested += summary.keys_tested;
            }
            Err(Error::RecoveryFailed) | Err(Error::SearchFailed { .. }) => {
                report.failures += 1;
            }
            Err(error) => return Err(error),
        }
    }

    report.seconds = time::precise_time_s() - start;

    Ok(report)
}
