// crates/cadence-consensus/src/voter.rs
//
// DeltaVoter: collects candidate deltas and picks this node's favourite.
//
// The favourite for a previous hash is the candidate whose producer ranks
// best for that hash. Every node that saw the same candidates therefore
// picks the same favourite, which is what lets a single vote round converge.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use cadence_core::{CandidateDelta, Hash, ProducerId, ProducerSetProvider};

use crate::ranking::ProducerRanker;
use crate::registration::Registration;
use crate::reputation::{ReputationEventKind, ReputationSink};
use crate::retention::{RetentionWindow, DEFAULT_PENDING_SLOTS};

/// Candidates seen for one previous hash.
#[derive(Debug, Default)]
struct CandidateSet {
    /// payload hash -> producers that proposed it.
    by_payload: HashMap<Hash, BTreeSet<ProducerId>>,
    /// producer -> payload hashes it proposed (more than one = equivocation).
    by_producer: HashMap<ProducerId, Vec<Hash>>,
}

/// Tracks candidate deltas per previous hash and computes the favourite.
pub struct DeltaVoter {
    ranker: Arc<ProducerRanker>,
    producers: Arc<dyn ProducerSetProvider>,
    reputation: ReputationSink,
    candidates: RwLock<RetentionWindow<CandidateSet>>,
}

impl DeltaVoter {
    pub fn new(ranker: Arc<ProducerRanker>, producers: Arc<dyn ProducerSetProvider>) -> Self {
        Self {
            ranker,
            producers,
            reputation: ReputationSink::disabled(),
            candidates: RwLock::new(RetentionWindow::new(DEFAULT_PENDING_SLOTS)),
        }
    }

    /// Report rejected and equivocating producers to `sink`.
    pub fn with_reputation(mut self, sink: ReputationSink) -> Self {
        self.reputation = sink;
        self
    }

    /// Store a candidate. Safe to call concurrently from many tasks.
    pub async fn register_candidate(&self, candidate: CandidateDelta) -> Registration {
        if !self.producers.is_producer(&candidate.producer_id) {
            tracing::warn!(
                "Discarding candidate {} from {}: not a producer",
                candidate.payload_hash.short(),
                candidate.producer_id.short()
            );
            self.reputation.report(
                candidate.producer_id,
                candidate.previous_hash,
                ReputationEventKind::ProducerIsNotProducer,
            );
            return Registration::Rejected;
        }

        let mut window = self.candidates.write().await;
        let Some(set) = window.entry(candidate.previous_hash) else {
            tracing::debug!(
                "Discarding candidate {} from {}: {} is superseded",
                candidate.payload_hash.short(),
                candidate.producer_id.short(),
                candidate.previous_hash.short()
            );
            return Registration::Stale;
        };

        let producers = set.by_payload.entry(candidate.payload_hash).or_default();
        if !producers.insert(candidate.producer_id) {
            tracing::trace!(
                "Candidate {} from {} already registered",
                candidate.payload_hash.short(),
                candidate.producer_id.short()
            );
            return Registration::Duplicate;
        }

        let proposed = set.by_producer.entry(candidate.producer_id).or_default();
        proposed.push(candidate.payload_hash);
        if proposed.len() > 1 {
            // Both are kept; the ranking step still considers them.
            tracing::warn!(
                "Producer {} proposed {} different candidates after {}",
                candidate.producer_id.short(),
                proposed.len(),
                candidate.previous_hash.short()
            );
            self.reputation.report(
                candidate.producer_id,
                candidate.previous_hash,
                ReputationEventKind::ProducerEquivocated,
            );
        }

        tracing::debug!(
            "Registered candidate {} from {} after {}",
            candidate.payload_hash.short(),
            candidate.producer_id.short(),
            candidate.previous_hash.short()
        );
        Registration::Registered
    }

    /// The best-ranked candidate seen for `previous_hash`, or `None` when no
    /// usable candidate arrived.
    ///
    /// Ties between candidates of the same producer fall back to the lower
    /// payload hash.
    pub async fn favourite(&self, previous_hash: &Hash) -> Option<CandidateDelta> {
        let producers = self.producers.producers();
        let positions = match self.ranker.rank_positions(previous_hash, &producers) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Cannot rank producers after {}: {}", previous_hash.short(), e);
                return None;
            }
        };

        let window = self.candidates.read().await;
        let Some(set) = window.get(previous_hash) else {
            tracing::debug!("No candidates seen after {}", previous_hash.short());
            return None;
        };

        let best = set
            .by_payload
            .iter()
            .flat_map(|(payload, proposers)| proposers.iter().map(move |p| (*payload, *p)))
            .filter_map(|(payload, producer)| {
                positions.get(&producer).map(|rank| (*rank, payload, producer))
            })
            .min();

        match best {
            Some((rank, payload_hash, producer_id)) => {
                tracing::debug!(
                    "Favourite after {} is {} from {} (rank {})",
                    previous_hash.short(),
                    payload_hash.short(),
                    producer_id.short(),
                    rank
                );
                Some(CandidateDelta::new(*previous_hash, producer_id, payload_hash))
            }
            None => {
                tracing::debug!(
                    "No candidate from a current producer after {}",
                    previous_hash.short()
                );
                None
            }
        }
    }

    /// All candidates seen for `previous_hash`, in no particular order.
    pub async fn candidates(&self, previous_hash: &Hash) -> Vec<CandidateDelta> {
        let window = self.candidates.read().await;
        window
            .get(previous_hash)
            .map(|set| {
                set.by_payload
                    .iter()
                    .flat_map(|(payload, proposers)| {
                        proposers
                            .iter()
                            .map(move |p| CandidateDelta::new(*previous_hash, *p, *payload))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The chain advanced to `head`: drop everything older than the previous cycle.
    pub async fn prune(&self, head: Hash) {
        self.candidates.write().await.advance(head);
    }

    /// Previous hashes currently holding state.
    pub async fn retained_hashes(&self) -> Vec<Hash> {
        self.candidates.read().await.keys()
    }
}
