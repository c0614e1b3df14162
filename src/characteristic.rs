//! Differential characteristics and their probabilities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::block::Block;

/// S-layer input and output difference of one round.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDifferential {
    pub input: Block,
    pub output: Block,
}

/// A differential over the rounds leading into the attacked round.
///
/// `rounds` holds the best single trail, one entry per S-layer from round
/// one up to and including the attacked round. The last entry's input is
/// the expected difference at the attacked round's input (the voting
/// target) and its output is the sieve difference (the pair filter
/// target). `probability` is the aggregate probability over all trails
/// from the same plaintext difference to the same expected difference,
/// times the probability of the sieve extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub rounds: Vec<RoundDifferential>,
    pub probability: f64,
}

impl Characteristic {
    /// The plaintext difference of the chosen-plaintext pairs.
    pub fn input_difference(&self) -> Block {
        self.rounds[0].input
    }

    /// Input difference of the attacked round.
    pub fn expected_difference(&self) -> Block {
        self.rounds[self.rounds.len() - 1].input
    }

    /// S-layer output difference of the attacked round, after filtering.
    pub fn sieve_difference(&self) -> Block {
        self.rounds[self.rounds.len() - 1].output
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "p={:.6}", self.probability)?;

        for round in &self.rounds {
            write!(f, " {}->{}", round.input, round.output)?;
        }

        Ok(())
    }
}
