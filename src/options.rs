use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;

use crate::search::SearchPolicy;

impl FromStr for SearchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<SearchPolicy, String> {
        match s {
            "best" => Ok(SearchPolicy::FirstBestCharacteristic),
            "all" => Ok(SearchPolicy::AllCharacteristics),
            _ => Err(format!("unknown search policy '{}', expected best|all", s)),
        }
    }
}

/// Parses an S-box subset mask, either decimal or with a 0b prefix.
pub fn parse_mask(s: &str) -> Result<u8, String> {
    let mask = if let Some(bits) = s.strip_prefix("0b") {
        u8::from_str_radix(bits, 2).map_err(|e| e.to_string())?
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())?
    };

    if mask == 0 || mask > 0b1111 {
        return Err(format!("mask {:#06b} out of range", mask));
    }

    Ok(mask)
}

/// Parses a comma separated key schedule of six hex words.
pub fn parse_keys(s: &str) -> Result<Vec<u16>, String> {
    s.split(',')
        .map(|word| {
            let word = word.trim().trim_start_matches("0x");
            u16::from_str_radix(word, 16).map_err(|e| e.to_string())
        })
        .collect()
}

#[derive(Clone, StructOpt)]
#[structopt(
    name = "diffcrack",
    about = "Differential key recovery attack on the CipherFour toy cipher."
)]
pub enum DiffcrackOptions {
    #[structopt(name = "search")]
    /// Search for the best differential of one attack configuration.
    Search {
        #[structopt(short = "r", long = "round")]
        /// The round to attack, between 2 and 5.
        round: usize,

        #[structopt(short = "m", long = "mask", parse(try_from_str = parse_mask))]
        /// The S-box subset to attack, as a nibble mask (e.g. 0b1110).
        mask: u8,

        #[structopt(short = "b", long = "bound", default_value = "0.0001")]
        /// Trails below this probability are pruned.
        bound: f64,

        #[structopt(short = "p", long = "policy", default_value = "all")]
        /// Search policy: best (greedy single trail) or all (aggregated).
        policy: SearchPolicy,

        #[structopt(short = "o", long = "config_out")]
        /// If given, the discovered configuration is saved to this file.
        config_out: Option<PathBuf>,
    },

    #[structopt(name = "attack")]
    /// Run the full six-subkey recovery against an oracle.
    Attack {
        #[structopt(short = "k", long = "keys")]
        /// Key schedule as six comma separated hex words. Random if
        /// omitted.
        keys: Option<String>,

        #[structopt(short = "n", long = "pairs", default_value = "20000")]
        /// Chosen-plaintext pairs per attacked round.
        pairs: usize,

        #[structopt(short = "b", long = "bound", default_value = "0.0001")]
        /// Trail probability bound for the differential search.
        bound: f64,

        #[structopt(short = "s", long = "seed", default_value = "1")]
        /// Random seed for pair generation (and the schedule, if random).
        seed: u64,
    },

    #[structopt(name = "bench")]
    /// Measure attack reliability over repeated trials.
    Bench {
        #[structopt(short = "t", long = "trials", default_value = "10")]
        /// Number of independent trials, each with a fresh schedule.
        trials: usize,

        #[structopt(short = "n", long = "pairs", default_value = "20000")]
        /// Chosen-plaintext pairs per attacked round.
        pairs: usize,

        #[structopt(short = "b", long = "bound", default_value = "0.0001")]
        /// Trail probability bound for the differential search.
        bound: f64,

        #[structopt(short = "s", long = "seed", default_value = "1")]
        /// Random seed for the trial schedules.
        seed: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_parsing() {
        assert_eq!(parse_mask("0b1110").unwrap(), 0b1110);
        assert_eq!(parse_mask("9").unwrap(), 0b1001);
        assert!(parse_mask("0").is_err());
        assert!(parse_mask("16").is_err());
    }

    #[test]
    fn key_parsing() {
        let keys = parse_keys("0x5b92, 064b, 0x1e03, 0xa55f, 0xecbd, 0x7ca5").unwrap();
        assert_eq!(keys, vec![0x5b92, 0x064b, 0x1e03, 0xa55f, 0xecbd, 0x7ca5]);
        assert!(parse_keys("zz").is_err());
    }
}
