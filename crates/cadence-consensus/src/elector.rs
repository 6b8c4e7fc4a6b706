// crates/cadence-consensus/src/elector.rs
//
// DeltaElector: tallies favourite votes and picks the plurality winner.
//
// This is a plurality count, not a quorum: a single vote is enough to elect.
// Ties go to the payload whose best-ranked voter has the lowest producer
// rank for the previous hash, so every node resolves a tie the same way no
// matter in which order the votes arrived.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use cadence_core::{FavouriteVote, Hash, ProducerId, ProducerSetProvider};

use crate::ranking::ProducerRanker;
use crate::registration::Registration;
use crate::reputation::{ReputationEventKind, ReputationSink};
use crate::retention::{RetentionWindow, DEFAULT_PENDING_SLOTS};

/// Votes for one previous hash: voter -> favoured payload hash.
#[derive(Debug, Default)]
struct VoteBook {
    votes: HashMap<ProducerId, Hash>,
}

/// The outcome of a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub winner: Hash,
    pub winner_votes: usize,
    pub total_votes: usize,
}

/// Tracks favourite votes per previous hash and elects the winner.
pub struct DeltaElector {
    ranker: Arc<ProducerRanker>,
    producers: Arc<dyn ProducerSetProvider>,
    reputation: ReputationSink,
    books: RwLock<RetentionWindow<VoteBook>>,
}

impl DeltaElector {
    pub fn new(ranker: Arc<ProducerRanker>, producers: Arc<dyn ProducerSetProvider>) -> Self {
        Self {
            ranker,
            producers,
            reputation: ReputationSink::disabled(),
            books: RwLock::new(RetentionWindow::new(DEFAULT_PENDING_SLOTS)),
        }
    }

    /// Report votes from non-producers to `sink`.
    pub fn with_reputation(mut self, sink: ReputationSink) -> Self {
        self.reputation = sink;
        self
    }

    /// Store a vote; a later vote from the same voter replaces the earlier one.
    pub async fn register_vote(&self, vote: FavouriteVote) -> Registration {
        if !self.producers.is_producer(&vote.voter_id) {
            tracing::warn!(
                "Discarding vote from {} after {}: not a producer",
                vote.voter_id.short(),
                vote.previous_hash.short()
            );
            self.reputation.report(
                vote.voter_id,
                vote.previous_hash,
                ReputationEventKind::VoterIsNotProducer,
            );
            return Registration::Rejected;
        }

        let mut window = self.books.write().await;
        let Some(book) = window.entry(vote.previous_hash) else {
            tracing::debug!(
                "Discarding vote from {}: {} is superseded",
                vote.voter_id.short(),
                vote.previous_hash.short()
            );
            return Registration::Stale;
        };
        let outcome = match book.votes.insert(vote.voter_id, vote.favoured_payload_hash) {
            None => Registration::Registered,
            Some(prior) if prior == vote.favoured_payload_hash => Registration::Duplicate,
            Some(prior) => {
                tracing::debug!(
                    "Voter {} changed vote from {} to {}",
                    vote.voter_id.short(),
                    prior.short(),
                    vote.favoured_payload_hash.short()
                );
                Registration::Replaced
            }
        };

        if outcome == Registration::Registered {
            tracing::debug!(
                "Registered vote from {} for {} after {}",
                vote.voter_id.short(),
                vote.favoured_payload_hash.short(),
                vote.previous_hash.short()
            );
        }
        outcome
    }

    /// Full tally for `previous_hash`, or `None` if no votes were registered.
    pub async fn tally(&self, previous_hash: &Hash) -> Option<ElectionResult> {
        let positions = match self
            .ranker
            .rank_positions(previous_hash, &self.producers.producers())
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Cannot rank producers after {}: {}", previous_hash.short(), e);
                return None;
            }
        };

        let window = self.books.read().await;
        let book = window.get(previous_hash)?;
        if book.votes.is_empty() {
            return None;
        }

        // payload -> (votes, best voter rank)
        let mut counts: HashMap<Hash, (usize, usize)> = HashMap::new();
        for (voter, payload) in &book.votes {
            let rank = positions.get(voter).copied().unwrap_or(usize::MAX);
            let entry = counts.entry(*payload).or_insert((0, usize::MAX));
            entry.0 += 1;
            entry.1 = entry.1.min(rank);
        }

        let (winner, (winner_votes, _)) = counts
            .iter()
            .max_by_key(|(payload, (votes, best_rank))| (*votes, Reverse(*best_rank), Reverse(**payload)))
            .map(|(p, c)| (*p, *c))?;

        Some(ElectionResult {
            winner,
            winner_votes,
            total_votes: book.votes.len(),
        })
    }

    /// The winning payload hash for `previous_hash`, or `None` with no votes.
    pub async fn elect(&self, previous_hash: &Hash) -> Option<Hash> {
        match self.tally(previous_hash).await {
            Some(result) => {
                tracing::debug!(
                    "Elected {} after {} with {}/{} votes",
                    result.winner.short(),
                    previous_hash.short(),
                    result.winner_votes,
                    result.total_votes
                );
                Some(result.winner)
            }
            None => {
                tracing::debug!("No votes registered after {}", previous_hash.short());
                None
            }
        }
    }

    /// The chain advanced to `head`: drop everything older than the previous cycle.
    pub async fn prune(&self, head: Hash) {
        self.books.write().await.advance(head);
    }

    /// Previous hashes currently holding state.
    pub async fn retained_hashes(&self) -> Vec<Hash> {
        self.books.read().await.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::StaticProducerSet;

    fn producers(n: u8) -> Vec<ProducerId> {
        (1..=n).map(|i| ProducerId([i; 32])).collect()
    }

    fn elector(set: Vec<ProducerId>) -> DeltaElector {
        DeltaElector::new(
            Arc::new(ProducerRanker::new()),
            Arc::new(StaticProducerSet::new(set)),
        )
    }

    fn vote(prev: Hash, voter: ProducerId, payload: Hash) -> FavouriteVote {
        FavouriteVote {
            previous_hash: prev,
            voter_id: voter,
            favoured_payload_hash: payload,
        }
    }

    #[tokio::test]
    async fn test_plurality_winner() {
        let h0 = Hash::digest(b"h0");
        let set = producers(9);
        let e = elector(set.clone());
        let (a, b, c) = (Hash::digest(b"A"), Hash::digest(b"B"), Hash::digest(b"C"));

        // A:3, B:5, C:1
        let plan = [a, a, a, b, b, b, b, b, c];
        for (voter, payload) in set.iter().zip(plan) {
            assert_eq!(e.register_vote(vote(h0, *voter, payload)).await, Registration::Registered);
        }

        assert_eq!(e.elect(&h0).await, Some(b));
        let tally = e.tally(&h0).await.unwrap();
        assert_eq!(tally.winner_votes, 5);
        assert_eq!(tally.total_votes, 9);
    }

    #[tokio::test]
    async fn test_tie_goes_to_best_ranked_voter() {
        let h0 = Hash::digest(b"tie");
        let set = producers(4);
        let ranking = ProducerRanker::new().rank(&h0, &set).unwrap();
        let (a, b) = (Hash::digest(b"A"), Hash::digest(b"B"));

        // B is backed by the rank-0 producer, so B wins the 2:2 tie.
        let votes = [
            vote(h0, ranking[1], a),
            vote(h0, ranking[2], a),
            vote(h0, ranking[0], b),
            vote(h0, ranking[3], b),
        ];

        let e1 = elector(set.clone());
        for v in votes.iter().cloned() {
            e1.register_vote(v).await;
        }
        let e2 = elector(set);
        for v in votes.iter().rev().cloned() {
            e2.register_vote(v).await;
        }

        assert_eq!(e1.elect(&h0).await, Some(b));
        assert_eq!(e1.elect(&h0).await, Some(b));
        assert_eq!(e2.elect(&h0).await, Some(b));
    }

    #[tokio::test]
    async fn test_single_vote_elects() {
        let h0 = Hash::digest(b"h0");
        let set = producers(5);
        let e = elector(set.clone());
        let p = Hash::digest(b"only");
        e.register_vote(vote(h0, set[4], p)).await;
        assert_eq!(e.elect(&h0).await, Some(p));
    }

    #[tokio::test]
    async fn test_no_votes_is_none() {
        let e = elector(producers(3));
        assert_eq!(e.elect(&Hash::digest(b"empty")).await, None);
        assert!(e.tally(&Hash::digest(b"empty")).await.is_none());
    }

    #[tokio::test]
    async fn test_revote_replaces() {
        let h0 = Hash::digest(b"h0");
        let set = producers(3);
        let e = elector(set.clone());
        let (a, b) = (Hash::digest(b"A"), Hash::digest(b"B"));

        assert_eq!(e.register_vote(vote(h0, set[0], a)).await, Registration::Registered);
        assert_eq!(e.register_vote(vote(h0, set[0], a)).await, Registration::Duplicate);
        assert_eq!(e.register_vote(vote(h0, set[0], b)).await, Registration::Replaced);

        let tally = e.tally(&h0).await.unwrap();
        assert_eq!(tally.winner, b);
        assert_eq!(tally.total_votes, 1);
    }

    #[tokio::test]
    async fn test_non_producer_vote_rejected() {
        let h0 = Hash::digest(b"h0");
        let (sink, mut rx) = ReputationSink::channel();
        let e = elector(producers(2)).with_reputation(sink);

        let outsider = ProducerId([77u8; 32]);
        assert_eq!(
            e.register_vote(vote(h0, outsider, Hash::digest(b"A"))).await,
            Registration::Rejected
        );
        assert_eq!(e.elect(&h0).await, None);
        assert_eq!(rx.recv().await.unwrap().kind, ReputationEventKind::VoterIsNotProducer);
    }

    /// A producer set that can be changed mid-test.
    struct MutableProducerSet(parking_lot::Mutex<Vec<ProducerId>>);

    impl ProducerSetProvider for MutableProducerSet {
        fn producers(&self) -> Vec<ProducerId> {
            self.0.lock().clone()
        }
    }

    #[tokio::test]
    async fn test_empty_producer_set_elects_nothing() {
        let h0 = Hash::digest(b"h0");
        let set = producers(3);
        let provider = Arc::new(MutableProducerSet(parking_lot::Mutex::new(set.clone())));
        let e = DeltaElector::new(Arc::new(ProducerRanker::new()), provider.clone());

        e.register_vote(vote(h0, set[0], Hash::digest(b"A"))).await;
        provider.0.lock().clear();

        assert_eq!(e.elect(&h0).await, None);
        assert!(e.tally(&h0).await.is_none());
    }

    #[tokio::test]
    async fn test_superseded_hash_vote_is_stale() {
        let set = producers(2);
        let e = elector(set.clone());
        let heads: Vec<Hash> = (0u8..3).map(|i| Hash::digest(&[i])).collect();
        for head in &heads {
            e.prune(*head).await;
        }
        assert_eq!(
            e.register_vote(vote(heads[0], set[0], Hash::digest(b"late"))).await,
            Registration::Stale
        );
        assert_eq!(
            e.register_vote(vote(heads[1], set[0], Hash::digest(b"prev"))).await,
            Registration::Registered
        );
    }

    #[tokio::test]
    async fn test_memory_bounded_across_advances() {
        let set = producers(2);
        let e = elector(set.clone());
        for i in 0u8..20 {
            let head = Hash::digest(&[i]);
            e.prune(head).await;
            e.register_vote(vote(head, set[0], Hash::digest(&[i, 9]))).await;
            assert!(e.retained_hashes().await.len() <= 2);
        }
    }
}
