// crates/cadence-core/src/crypto.rs

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::CadenceError;
use crate::identity::ProducerId;

/// An ed25519 keypair identifying a producer.
///
/// Only the public half is used by consensus (as the `ProducerId`);
/// message signing belongs to the transport layer.
pub struct Keypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Keypair {
    /// Generate a new random ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Keypair {
            signing_key,
            verifying_key,
        }
    }

    /// Rebuild a keypair from its 32-byte secret.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Keypair {
            signing_key,
            verifying_key,
        }
    }

    /// Parse a hex-encoded 32-byte secret.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CadenceError> {
        let bytes = hex::decode(secret_hex.trim())?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CadenceError::InvalidKey("Secret key must be exactly 32 bytes".to_string()))?;
        Ok(Self::from_secret(&secret))
    }

    /// Get the public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The producer identity derived from the public key.
    pub fn producer_id(&self) -> ProducerId {
        ProducerId(self.public_key_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

/// Check that 32 bytes form a valid ed25519 public key.
pub fn validate_public_key(bytes: &[u8; 32]) -> Result<(), CadenceError> {
    VerifyingKey::from_bytes(bytes)?;
    Ok(())
}

/// Compute SHA-256 hash of the given bytes.
///
/// Returns a 32-byte hash.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    hash_concat(&[data])
}

/// SHA-256 over the concatenation of `parts`, without allocating the
/// concatenated buffer.
pub fn hash_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_roundtrip_from_secret() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();
        assert_eq!(keypair.producer_id(), restored.producer_id());
        assert!(validate_public_key(&keypair.public_key_bytes()).is_ok());
    }

    #[test]
    fn test_from_secret_hex_rejects_short_input() {
        assert!(Keypair::from_secret_hex("00ff").is_err());
    }

    #[test]
    fn test_hash_bytes() {
        let data = b"cadence";
        let hash = hash_bytes(data);
        assert_eq!(hash.len(), 32);

        // Same input should produce same hash
        let hash2 = hash_bytes(data);
        assert_eq!(hash, hash2);

        // Different input should produce different hash
        let hash3 = hash_bytes(b"different");
        assert_ne!(hash, hash3);
    }

    #[test]
    fn test_hash_concat_matches_contiguous_input() {
        assert_eq!(hash_concat(&[b"prod", b"ucer"]), hash_bytes(b"producer"));
    }
}
