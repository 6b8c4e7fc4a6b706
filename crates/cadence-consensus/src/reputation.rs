// crates/cadence-consensus/src/reputation.rs
//
// Explicit reputation signals raised while registering peer traffic.
//
// Consensus does not score peers itself; it reports misbehaviour as events
// on a channel and leaves scoring to whoever consumes them.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cadence_core::{Hash, ProducerId};

/// What a peer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReputationEventKind {
    /// Sent a candidate delta without being in the producer set.
    ProducerIsNotProducer,
    /// Sent a favourite vote without being in the producer set.
    VoterIsNotProducer,
    /// Sent two different candidates for the same previous hash.
    ProducerEquivocated,
}

/// One reputation signal about `peer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub peer: ProducerId,
    pub previous_hash: Hash,
    pub kind: ReputationEventKind,
}

/// Optional outlet for reputation events. Sending never blocks; events are
/// dropped when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct ReputationSink {
    tx: Option<mpsc::UnboundedSender<ReputationEvent>>,
}

impl ReputationSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A sink plus the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReputationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn report(&self, peer: ProducerId, previous_hash: Hash, kind: ReputationEventKind) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ReputationEvent {
                peer,
                previous_hash,
                kind,
            });
        }
    }
}
