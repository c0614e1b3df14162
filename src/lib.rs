//! Differential cryptanalysis of a CipherFour style toy SPN.
//!
//! The crate implements the full key recovery attack: building the
//! difference distribution table of the S-box, searching for high
//! probability differentials, generating and sieving chosen-plaintext
//! pairs, and recovering the six round keys with a counting attack that
//! peels the cipher round by round down to a terminal exhaustive search.

#[macro_use]
extern crate lazy_static;

pub mod attack;
pub mod bench;
pub mod block;
pub mod characteristic;
pub mod cipher;
pub mod config;
pub mod error;
pub mod options;
pub mod pairs;
pub mod recovery;
pub mod sbox;
pub mod search;

pub use crate::block::Block;
pub use crate::cipher::CipherFour;
pub use crate::error::Error;
