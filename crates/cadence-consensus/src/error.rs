use thiserror::Error;

use cadence_core::CadenceError;

/// Errors raised by the consensus engine.
///
/// Only configuration problems are fatal; per-cycle absences and collaborator
/// failures are handled inside the engine and never surface here at runtime.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Phase timings overlap, do not fit the cycle, or are degenerate.
    #[error("Invalid cycle configuration: {0}")]
    InvalidCycleConfiguration(String),

    /// Ranking was requested over an empty producer set.
    #[error("Producer set is empty")]
    EmptyProducerSet,

    /// `start` was called on a clock or engine that is already running.
    #[error("Already started")]
    AlreadyStarted,

    /// A collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] CadenceError),
}
