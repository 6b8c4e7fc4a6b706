// crates/cadence-daemon/src/cache.rs
//
// MemoryDeltaCache: full payloads a node holds, keyed by previous hash.
//
// Only the node that built a payload holds it on the devnet, so only that
// node can publish it when it wins.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use cadence_consensus::retention::{RetentionWindow, DEFAULT_PENDING_SLOTS};
use cadence_core::{DeltaCache, Hash};

use crate::hub::published_head;

type Payloads = HashMap<Hash, Vec<u8>>;

/// In-memory payload store, retaining the current and previous cycle plus a
/// few pending previous hashes.
pub struct MemoryDeltaCache {
    payloads: Mutex<RetentionWindow<Payloads>>,
}

impl MemoryDeltaCache {
    pub fn new() -> Self {
        Self {
            payloads: Mutex::new(RetentionWindow::new(DEFAULT_PENDING_SLOTS)),
        }
    }

    /// Hold `payload`. Returns `false` if `previous_hash` is already superseded.
    pub fn insert(&self, previous_hash: Hash, payload_hash: Hash, payload: Vec<u8>) -> bool {
        match self.payloads.lock().entry(previous_hash) {
            Some(payloads) => {
                payloads.insert(payload_hash, payload);
                true
            }
            None => {
                tracing::debug!(
                    "Not caching payload {}: {} is superseded",
                    payload_hash.short(),
                    previous_hash.short()
                );
                false
            }
        }
    }

    pub fn payload(&self, previous_hash: Hash, payload_hash: Hash) -> Option<Vec<u8>> {
        self.payloads
            .lock()
            .get(&previous_hash)
            .and_then(|p| p.get(&payload_hash))
            .cloned()
    }

    /// The held payload whose publication after `previous_hash` produced
    /// `new_head`, if this node built it.
    pub fn published_payload(&self, previous_hash: Hash, new_head: Hash) -> Option<(Hash, Vec<u8>)> {
        let window = self.payloads.lock();
        window.get(&previous_hash).and_then(|payloads| {
            payloads
                .iter()
                .find(|(payload_hash, _)| published_head(previous_hash, **payload_hash) == new_head)
                .map(|(h, bytes)| (*h, bytes.clone()))
        })
    }

    /// The chain advanced to `head`; drop payloads older than the previous cycle.
    pub fn prune(&self, head: Hash) {
        self.payloads.lock().advance(head);
    }
}

impl Default for MemoryDeltaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeltaCache for MemoryDeltaCache {
    async fn has_full_payload(&self, previous_hash: Hash, payload_hash: Hash) -> bool {
        self.payloads
            .lock()
            .get(&previous_hash)
            .is_some_and(|p| p.contains_key(&payload_hash))
    }

    async fn get_full_payload(&self, previous_hash: Hash, payload_hash: Hash) -> Option<Vec<u8>> {
        self.payload(previous_hash, payload_hash)
    }
}
