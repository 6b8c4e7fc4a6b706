// crates/cadence-consensus/src/ranking.rs
//
// Deterministic, leaderless producer ranking.
//
// Each producer's score is SHA-256(producer_id || previous_hash); producers
// are ordered by ascending score (big-endian), ties broken by id bytes.
// Because previous_hash is agreed chain state, every node derives the same
// order without coordination, and the order reshuffles every cycle.
// Rank 0 is the most favoured producer.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use cadence_core::{Hash, ProducerId};

use crate::error::ConsensusError;

/// Number of rankings kept by default: current and previous cycle.
pub const DEFAULT_RANKING_CACHE: usize = 2;

/// Ranking score of `producer` for the cycle following `previous_hash`.
pub fn producer_score(producer: &ProducerId, previous_hash: &Hash) -> Hash {
    Hash::digest_parts(&[producer.as_bytes(), previous_hash.as_bytes()])
}

/// Rank `producers` for the cycle following `previous_hash`, without caching.
///
/// Duplicate ids in the input appear once in the output.
pub fn compute_ranking(
    previous_hash: &Hash,
    producers: &[ProducerId],
) -> Result<Vec<ProducerId>, ConsensusError> {
    if producers.is_empty() {
        return Err(ConsensusError::EmptyProducerSet);
    }

    let mut scored: Vec<(Hash, ProducerId)> = producers
        .iter()
        .map(|p| (producer_score(p, previous_hash), *p))
        .collect();
    scored.sort();
    scored.dedup_by(|a, b| a.1 == b.1);

    Ok(scored.into_iter().map(|(_, p)| p).collect())
}

/// A ranking together with the producer set it was computed from.
#[derive(Debug, Clone)]
struct CachedRanking {
    previous_hash: Hash,
    /// Sorted, deduplicated input set.
    producers: Vec<ProducerId>,
    ranking: Vec<ProducerId>,
}

/// Memoizing front-end to [`compute_ranking`].
///
/// Keeps the most recent `capacity` rankings. A cached entry is only reused
/// when the producer set is unchanged, so the cache never affects results.
#[derive(Debug)]
pub struct ProducerRanker {
    capacity: usize,
    cache: Mutex<VecDeque<CachedRanking>>,
}

impl ProducerRanker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RANKING_CACHE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Total order over `producers` for the cycle following `previous_hash`.
    pub fn rank(
        &self,
        previous_hash: &Hash,
        producers: &[ProducerId],
    ) -> Result<Vec<ProducerId>, ConsensusError> {
        if producers.is_empty() {
            return Err(ConsensusError::EmptyProducerSet);
        }

        let mut set = producers.to_vec();
        set.sort();
        set.dedup();

        {
            let cache = self.cache.lock();
            if let Some(hit) = cache
                .iter()
                .find(|c| c.previous_hash == *previous_hash && c.producers == set)
            {
                return Ok(hit.ranking.clone());
            }
        }

        let ranking = compute_ranking(previous_hash, &set)?;
        tracing::trace!(
            "Ranked {} producers after {}: leader {}",
            ranking.len(),
            previous_hash.short(),
            ranking[0].short()
        );

        let mut cache = self.cache.lock();
        cache.retain(|c| c.previous_hash != *previous_hash);
        cache.push_back(CachedRanking {
            previous_hash: *previous_hash,
            producers: set,
            ranking: ranking.clone(),
        });
        while cache.len() > self.capacity {
            cache.pop_front();
        }

        Ok(ranking)
    }

    /// Rank position of every producer, for repeated lookups.
    pub fn rank_positions(
        &self,
        previous_hash: &Hash,
        producers: &[ProducerId],
    ) -> Result<HashMap<ProducerId, usize>, ConsensusError> {
        Ok(self
            .rank(previous_hash, producers)?
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p, i))
            .collect())
    }

    /// Previous hashes currently memoized, oldest first.
    pub fn cached_hashes(&self) -> Vec<Hash> {
        self.cache.lock().iter().map(|c| c.previous_hash).collect()
    }
}

impl Default for ProducerRanker {
    fn default() -> Self {
        Self::new()
    }
}
