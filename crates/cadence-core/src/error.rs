use thiserror::Error;

/// Errors raised by the collaborators around the consensus core
/// (delta building, broadcast, publication, caching, key handling).
#[derive(Debug, Error)]
pub enum CadenceError {
    /// The builder had nothing to put in a candidate delta this cycle.
    #[error("No pending work to build a candidate delta")]
    NoPendingWork,

    /// Candidate delta construction failed.
    #[error("Build error: {0}")]
    Build(String),

    /// A broadcast to peers failed.
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// Publishing the elected delta to the distribution layer failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Delta cache lookup or insertion failed.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Malformed producer key or identifier.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CadenceError {
    /// True for outcomes that are expected in normal operation and only
    /// mean "skip this cycle's action".
    pub fn is_transient(&self) -> bool {
        matches!(self, CadenceError::NoPendingWork)
    }
}

impl From<serde_json::Error> for CadenceError {
    fn from(e: serde_json::Error) -> Self {
        CadenceError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for CadenceError {
    fn from(e: hex::FromHexError) -> Self {
        CadenceError::InvalidKey(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CadenceError {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        CadenceError::InvalidKey(e.to_string())
    }
}
