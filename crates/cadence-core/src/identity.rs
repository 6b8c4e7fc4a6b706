// crates/cadence-core/src/identity.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::CadenceError;

/// Identity of a producer in the permissioned set.
///
/// The bytes are the producer's ed25519 public key. They are fed into the
/// ranking digest as-is, so every node must agree on this encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProducerId(pub [u8; 32]);

impl ProducerId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a hex-encoded public key, checking it is a valid ed25519 point.
    pub fn from_public_key_hex(s: &str) -> Result<Self, CadenceError> {
        let id: ProducerId = s.parse()?;
        crypto::validate_public_key(&id.0)?;
        Ok(id)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProducerId({})", self.short())
    }
}

impl FromStr for ProducerId {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CadenceError::InvalidKey("Producer id must be exactly 32 bytes".to_string())
        })?;
        Ok(ProducerId(arr))
    }
}
