//! Construction-time error types
//!
//! Only configuration problems surface here. Handler failures travel through
//! the caller's error sink as `eyre::Report` and rejected rate mutations are
//! reported through the mutator's boolean result - neither is an error in
//! this taxonomy.

use thiserror::Error;

/// Errors from pacer configuration and construction
#[derive(Debug, Error)]
pub enum PacerError {
    #[error("initial rate must be greater than zero")]
    ZeroRate,

    #[error("min rate {min} is above the initial rate {initial}")]
    MinAboveInitial { min: u32, initial: u32 },

    #[error("max rate {max} is below the initial rate {initial}")]
    MaxBelowInitial { max: u32, initial: u32 },

    #[error("sample interval must be greater than zero")]
    ZeroSampleInterval,
}
