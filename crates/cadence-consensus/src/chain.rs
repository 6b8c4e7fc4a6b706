// crates/cadence-consensus/src/chain.rs
//
// DeltaHashProvider: tracks the head of the delta chain.
//
// The head only moves forward by one link at a time: an update from
// `previous` to `new` is accepted only while `previous` is the current head.
// Replays of an advance that already happened are refused, which is what
// makes re-running a cycle's publication a no-op.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use cadence_core::{Hash, WallClock};

/// Default number of historical heads retained.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Emitted each time the head advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainAdvance {
    pub previous_hash: Hash,
    pub new_hash: Hash,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct HeadHistory {
    /// Oldest first; the back is the current head.
    entries: VecDeque<(DateTime<Utc>, Hash)>,
    seen: HashSet<Hash>,
}

/// Latest accepted delta hash, with bounded history.
pub struct DeltaHashProvider {
    history: RwLock<HeadHistory>,
    capacity: usize,
    wall_clock: Arc<dyn WallClock>,
    updates: broadcast::Sender<ChainAdvance>,
}

impl DeltaHashProvider {
    /// Start a chain at `genesis`.
    pub fn new(genesis: Hash, wall_clock: Arc<dyn WallClock>) -> Self {
        Self::with_capacity(genesis, wall_clock, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(genesis: Hash, wall_clock: Arc<dyn WallClock>, capacity: usize) -> Self {
        let mut entries = VecDeque::new();
        entries.push_back((DateTime::<Utc>::UNIX_EPOCH, genesis));
        let mut seen = HashSet::new();
        seen.insert(genesis);
        let (updates, _) = broadcast::channel(64);

        Self {
            history: RwLock::new(HeadHistory { entries, seen }),
            capacity: capacity.max(1),
            wall_clock,
            updates,
        }
    }

    /// The current head.
    pub fn latest(&self) -> Hash {
        let history = self.history.read();
        history
            .entries
            .back()
            .map(|(_, h)| *h)
            .unwrap_or(Hash::ZERO)
    }

    /// The head that was current at `as_of`.
    ///
    /// Falls back to the oldest retained head if `as_of` predates the history.
    pub fn latest_as_of(&self, as_of: DateTime<Utc>) -> Hash {
        let history = self.history.read();
        history
            .entries
            .iter()
            .rev()
            .find(|(t, _)| *t <= as_of)
            .or_else(|| history.entries.front())
            .map(|(_, h)| *h)
            .unwrap_or(Hash::ZERO)
    }

    /// Advance the head from `previous_hash` to `new_hash`.
    ///
    /// Returns `false`, leaving the head untouched, when `previous_hash` is
    /// not the current head or `new_hash` was already seen.
    pub fn try_update_latest(&self, previous_hash: Hash, new_hash: Hash) -> bool {
        let now = self.wall_clock.now();
        let advance = {
            let mut history = self.history.write();
            let head = history.entries.back().map(|(_, h)| *h);

            if head != Some(previous_hash) {
                tracing::debug!(
                    "Not advancing to {}: previous {} is not the head",
                    new_hash.short(),
                    previous_hash.short()
                );
                return false;
            }
            if history.seen.contains(&new_hash) {
                tracing::debug!("Not advancing to {}: already seen", new_hash.short());
                return false;
            }

            // Keep timestamps monotone even if the wall clock steps back.
            let last_time = history.entries.back().map(|(t, _)| *t).unwrap_or(now);
            let at = now.max(last_time);

            history.entries.push_back((at, new_hash));
            history.seen.insert(new_hash);
            while history.entries.len() > self.capacity {
                if let Some((_, evicted)) = history.entries.pop_front() {
                    history.seen.remove(&evicted);
                }
            }

            ChainAdvance {
                previous_hash,
                new_hash,
                at,
            }
        };

        tracing::info!(
            "Chain advanced {} -> {}",
            advance.previous_hash.short(),
            advance.new_hash.short()
        );
        // No receivers is fine.
        let _ = self.updates.send(advance);
        true
    }

    /// Whether `hash` has been the head at some point within retained history.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.history.read().seen.contains(hash)
    }

    /// Whether `hash` was a head that has since fallen behind both the current
    /// head and its predecessor. Unknown hashes are not superseded.
    pub fn is_superseded(&self, hash: &Hash) -> bool {
        let history = self.history.read();
        history.seen.contains(hash) && !history.entries.iter().rev().take(2).any(|(_, h)| h == hash)
    }

    /// Number of retained heads, genesis included.
    pub fn len(&self) -> usize {
        self.history.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to head advances.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainAdvance> {
        self.updates.subscribe()
    }
}
