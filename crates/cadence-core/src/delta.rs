// crates/cadence-core/src/delta.rs
//
// Messages exchanged during a consensus cycle: candidate deltas proposed in
// Construction, favourite votes cast in Campaigning, and the announcement of
// a published winner.

use serde::{Deserialize, Serialize};

use crate::error::CadenceError;
use crate::hash::Hash;
use crate::identity::ProducerId;

/// A delta proposed by one producer for the cycle following `previous_hash`.
///
/// The raw payload stays with the builder and the `DeltaCache`; peers only
/// see its hash. Identity is `(previous_hash, payload_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateDelta {
    /// Hash of the delta this candidate would follow.
    pub previous_hash: Hash,
    /// The producer that built it.
    pub producer_id: ProducerId,
    /// Hash of the full payload.
    pub payload_hash: Hash,
}

impl CandidateDelta {
    pub fn new(previous_hash: Hash, producer_id: ProducerId, payload_hash: Hash) -> Self {
        Self {
            previous_hash,
            producer_id,
            payload_hash,
        }
    }

    /// The `(previous_hash, payload_hash)` identity key.
    pub fn key(&self) -> (Hash, Hash) {
        (self.previous_hash, self.payload_hash)
    }
}

/// A producer's vote for the candidate it favours.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FavouriteVote {
    pub previous_hash: Hash,
    pub voter_id: ProducerId,
    pub favoured_payload_hash: Hash,
}

impl FavouriteVote {
    /// Vote for `candidate` as `voter_id`.
    pub fn for_candidate(candidate: &CandidateDelta, voter_id: ProducerId) -> Self {
        Self {
            previous_hash: candidate.previous_hash,
            voter_id,
            favoured_payload_hash: candidate.payload_hash,
        }
    }
}

/// Everything the incoming message bus can deliver to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A peer's candidate delta.
    Candidate(CandidateDelta),
    /// A peer's favourite vote.
    Favourite(FavouriteVote),
    /// A peer published the winner following `previous_hash`, producing `new_hash`.
    DeltaPublished { previous_hash: Hash, new_hash: Hash },
}

impl InboundMessage {
    /// Encode as JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CadenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode JSON bytes produced by [`InboundMessage::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CadenceError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The chain position this message refers to.
    pub fn previous_hash(&self) -> Hash {
        match self {
            InboundMessage::Candidate(c) => c.previous_hash,
            InboundMessage::Favourite(v) => v.previous_hash,
            InboundMessage::DeltaPublished { previous_hash, .. } => *previous_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_for_candidate_copies_hashes() {
        let candidate = CandidateDelta::new(Hash::digest(b"h0"), ProducerId([1u8; 32]), Hash::digest(b"p"));
        let vote = FavouriteVote::for_candidate(&candidate, ProducerId([2u8; 32]));
        assert_eq!(vote.previous_hash, candidate.previous_hash);
        assert_eq!(vote.favoured_payload_hash, candidate.payload_hash);
        assert_eq!(vote.voter_id, ProducerId([2u8; 32]));
    }

    #[test]
    fn test_message_encoding_is_tagged() {
        let msg = InboundMessage::DeltaPublished {
            previous_hash: Hash::ZERO,
            new_hash: Hash::digest(b"h1"),
        };
        let bytes = msg.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"type\":\"delta_published\""));
        assert_eq!(InboundMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = InboundMessage::decode(b"not json").unwrap_err();
        assert!(matches!(err, CadenceError::Serialization(_)));
    }
}
