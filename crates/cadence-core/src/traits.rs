// crates/cadence-core/src/traits.rs

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::delta::CandidateDelta;
use crate::error::CadenceError;
use crate::hash::Hash;
use crate::identity::ProducerId;

/// Builds this node's candidate delta from pending work.
///
/// Implementations are expected to store the full payload in their
/// `DeltaCache` so the node can publish it if it wins.
#[async_trait]
pub trait DeltaBuilder: Send + Sync {
    /// Build a candidate following `previous_hash`.
    ///
    /// Returns `CadenceError::NoPendingWork` when there is nothing to include.
    async fn build_candidate(&self, previous_hash: Hash) -> Result<CandidateDelta, CadenceError>;
}

/// Gossip and distribution layer.
#[async_trait]
pub trait DeltaHub: Send + Sync {
    /// Broadcast a locally built candidate to peers.
    async fn broadcast_candidate(&self, candidate: &CandidateDelta) -> Result<(), CadenceError>;

    /// Broadcast this node's favourite for the cycle following `previous_hash`.
    async fn broadcast_favourite(
        &self,
        voter_id: ProducerId,
        previous_hash: Hash,
        payload_hash: Hash,
    ) -> Result<(), CadenceError>;

    /// Publish the elected delta and announce it. Returns the new chain head.
    async fn publish_winner(&self, previous_hash: Hash, payload_hash: Hash)
        -> Result<Hash, CadenceError>;
}

/// Local store of full delta payloads.
#[async_trait]
pub trait DeltaCache: Send + Sync {
    /// Whether this node holds the full payload for the given candidate.
    async fn has_full_payload(&self, previous_hash: Hash, payload_hash: Hash) -> bool;

    /// Fetch the full payload, if held locally.
    async fn get_full_payload(&self, previous_hash: Hash, payload_hash: Hash) -> Option<Vec<u8>>;
}

/// Source of the permissioned producer set.
pub trait ProducerSetProvider: Send + Sync {
    /// The current producers. Order is irrelevant; ranking imposes its own.
    fn producers(&self) -> Vec<ProducerId>;

    fn is_producer(&self, id: &ProducerId) -> bool {
        self.producers().contains(id)
    }
}

/// A fixed producer set, as configured for a proof-of-authority network.
#[derive(Debug, Clone, Default)]
pub struct StaticProducerSet {
    producers: Vec<ProducerId>,
}

impl StaticProducerSet {
    pub fn new(mut producers: Vec<ProducerId>) -> Self {
        producers.sort();
        producers.dedup();
        Self { producers }
    }
}

impl ProducerSetProvider for StaticProducerSet {
    fn producers(&self) -> Vec<ProducerId> {
        self.producers.clone()
    }

    fn is_producer(&self, id: &ProducerId) -> bool {
        self.producers.binary_search(id).is_ok()
    }
}

/// Wall-clock time source shared by every node (NTP-synchronised in
/// production). Abstracted so cycle alignment can be tested.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since the Unix epoch.
    fn since_epoch(&self) -> Duration {
        let now = self.now();
        let nanos = now.timestamp_nanos_opt().unwrap_or(i64::MAX).max(0);
        Duration::from_nanos(nanos as u64)
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A wall clock that starts at a given reading and then advances with
/// tokio's monotonic clock, so paused-time tests see wall time move with the
/// timers. `step` shifts the reading, like an NTP correction.
#[derive(Debug)]
pub struct MonotonicWallClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
    step_nanos: AtomicI64,
}

impl MonotonicWallClock {
    /// A clock reading `since_epoch` after the Unix epoch right now.
    pub fn starting_at(since_epoch: Duration) -> Self {
        Self {
            origin: DateTime::<Utc>::UNIX_EPOCH + since_epoch_chrono(since_epoch),
            started: tokio::time::Instant::now(),
            step_nanos: AtomicI64::new(0),
        }
    }

    /// Move the reading by `by` (negative steps go back in time).
    pub fn step(&self, by: chrono::Duration) {
        let nanos = by.num_nanoseconds().unwrap_or(0);
        self.step_nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl WallClock for MonotonicWallClock {
    fn now(&self) -> DateTime<Utc> {
        self.origin
            + since_epoch_chrono(self.started.elapsed())
            + chrono::Duration::nanoseconds(self.step_nanos.load(Ordering::SeqCst))
    }
}

fn since_epoch_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
