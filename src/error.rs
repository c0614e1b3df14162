//! Error taxonomy of the attack engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A persisted attack configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No differential above the probability bound exists for the
    /// requested round and S-box subset.
    #[error("no differential above bound {bound} for round {round}, mask {mask:#06b}")]
    SearchFailed {
        round: usize,
        mask: u8,
        bound: f64,
    },

    /// The terminal exhaustive search found no key consistent with the
    /// oracle.
    #[error("key recovery failed: no candidate survived verification")]
    RecoveryFailed,

    /// A structural invariant does not hold (non-bijective S-box, peel
    /// order violation).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
