//! Persistence of attack configurations.
//!
//! A configuration captures everything needed to repeat the attack on one
//! (round, S-box subset) shape: the policies, the discovered
//! characteristic and the cached pair lists. Pair lists go stale when the
//! oracle's keys change and are refreshed per trial.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::block::Block;
use crate::characteristic::Characteristic;
use crate::error::{Error, Result};
use crate::pairs::Pair;
use crate::search::{AbortingPolicy, SearchPolicy};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackConfiguration {
    pub round: usize,
    pub active_mask: u8,
    pub search_policy: SearchPolicy,
    pub aborting_policy: AbortingPolicy,
    pub characteristic: Characteristic,
    #[serde(default)]
    pub unfiltered_pairs: Vec<Pair>,
    #[serde(default)]
    pub filtered_pairs: Vec<Pair>,
}

impl AttackConfiguration {
    pub fn input_difference(&self) -> Block {
        self.characteristic.input_difference()
    }

    pub fn expected_difference(&self) -> Block {
        self.characteristic.expected_difference()
    }

    pub fn sieve_difference(&self) -> Block {
        self.characteristic.sieve_difference()
    }

    pub fn probability(&self) -> f64 {
        self.characteristic.probability
    }

    fn validate(&self) -> Result<()> {
        if !(2..=5).contains(&self.round) {
            return Err(Error::Configuration(format!(
                "attack round {} out of range",
                self.round
            )));
        }

        if self.active_mask == 0 || self.active_mask > 0b1111 {
            return Err(Error::Configuration(format!(
                "active mask {:#06b} out of range",
                self.active_mask
            )));
        }

        if self.characteristic.rounds.is_empty() {
            return Err(Error::Configuration("empty characteristic".to_string()));
        }

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(e.to_string()))?;

        fs::write(path, json).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<AttackConfiguration> {
        let json = fs::read_to_string(path).map_err(|e| Error::Configuration(e.to_string()))?;
        let config: AttackConfiguration =
            serde_json::from_str(&json).map_err(|e| Error::Configuration(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristic::RoundDifferential;

    fn sample() -> AttackConfiguration {
        AttackConfiguration {
            round: 5,
            active_mask: 0b0001,
            search_policy: SearchPolicy::AllCharacteristics,
            aborting_policy: AbortingPolicy::Threshold(0.0001),
            characteristic: Characteristic {
                rounds: vec![
                    RoundDifferential {
                        input: Block(0x0002),
                        output: Block(0x0002),
                    },
                    RoundDifferential {
                        input: Block(0x0010),
                        output: Block(0x0020),
                    },
                ],
                probability: 0.045_731,
            },
            unfiltered_pairs: vec![Pair {
                left: Block(0x1234),
                right: Block(0x1236),
                left_ct: Block(0xbeef),
                right_ct: Block(0xcafe),
            }],
            filtered_pairs: Vec::new(),
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let config = sample();
        let path = std::env::temp_dir().join("diffcrack-config-test.json");

        config.save(&path).unwrap();
        let loaded = AttackConfiguration::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
        assert_eq!(loaded.probability().to_bits(), config.probability().to_bits());
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let path = std::env::temp_dir().join("diffcrack-config-broken.json");
        fs::write(&path, "{ not json").unwrap();

        let result = AttackConfiguration::load(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let result = AttackConfiguration::load("/nonexistent/diffcrack.json");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn out_of_range_round_is_rejected() {
        let mut config = sample();
        config.round = 7;

        let path = std::env::temp_dir().join("diffcrack-config-range.json");
        config.save(&path).unwrap();
        let result = AttackConfiguration::load(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
