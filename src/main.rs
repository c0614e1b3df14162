use rand::rngs::StdRng;
use rand::SeedableRng;
use structopt::StructOpt;

use diffcrack::attack::run_attack;
use diffcrack::bench::run_bench;
use diffcrack::block::Block;
use diffcrack::cipher::{CipherFour, Oracle, NUM_KEYS};
use diffcrack::config::AttackConfiguration;
use diffcrack::error::{Error, Result};
use diffcrack::options::{parse_keys, DiffcrackOptions};
use diffcrack::search::{find_differential, AbortingPolicy};

fn dispatch(options: DiffcrackOptions) -> Result<()> {
    let cipher = CipherFour::new();

    match options {
        DiffcrackOptions::Search {
            round,
            mask,
            bound,
            policy,
            config_out,
        } => {
            let characteristic =
                find_differential(&cipher, round, mask, policy, AbortingPolicy::Threshold(bound))?;

            println!(
                "round {} mask {:#06b}: input {} expected {} sieve {} ({})",
                round,
                mask,
                characteristic.input_difference(),
                characteristic.expected_difference(),
                characteristic.sieve_difference(),
                characteristic
            );

            if let Some(path) = config_out {
                let configuration = AttackConfiguration {
                    round,
                    active_mask: mask,
                    search_policy: policy,
                    aborting_policy: AbortingPolicy::Threshold(bound),
                    characteristic,
                    unfiltered_pairs: Vec::new(),
                    filtered_pairs: Vec::new(),
                };

                configuration.save(&path)?;
                println!("configuration saved to {}", path.display());
            }
        }

        DiffcrackOptions::Attack {
            keys,
            pairs,
            bound,
            seed,
        } => {
            let mut rng = StdRng::seed_from_u64(seed);

            let schedule = match keys {
                Some(list) => {
                    let words = parse_keys(&list).map_err(Error::Configuration)?;

                    if words.len() != NUM_KEYS {
                        return Err(Error::Configuration(format!(
                            "expected {} keys, got {}",
                            NUM_KEYS,
                            words.len()
                        )));
                    }

                    let mut schedule = [Block(0); NUM_KEYS];
                    for (key, word) in schedule.iter_mut().zip(words) {
                        *key = Block(word);
                    }
                    schedule
                }
                None => CipherFour::random_keys(&mut rng),
            };

            let oracle = Oracle::new(cipher.clone(), schedule);
            let summary = run_attack(&cipher, &oracle, pairs, bound, &mut rng)?;

            let recovered: Vec<String> =
                summary.schedule.iter().map(|k| k.to_string()).collect();

            println!(
                "schedule [{}] recovered in {:.2}s, {} keys tested, {} ambiguous boxes",
                recovered.join(", "),
                summary.seconds,
                summary.keys_tested,
                summary.ambiguous_boxes
            );
        }

        DiffcrackOptions::Bench {
            trials,
            pairs,
            bound,
            seed,
        } => {
            let report = run_bench(&cipher, trials, pairs, bound, seed)?;

            println!(
                "{}/{} trials succeeded in {:.2}s ({} keys tested in total)",
                report.successes, report.trials, report.seconds, report.total_keys_tested
            );
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = dispatch(DiffcrackOptions::from_args()) {
        println!("error: {}", error);
        std::process::exit(1);
    }
}
