// crates/cadence-consensus/src/retention.rs
//
// Per-previous-hash state with bounded retention.
//
// Voting and election state is only useful for the cycle in progress and the
// one just before it. State for the current and previous head is never
// evicted. Hashes that are not (yet) a head, such as next-cycle traffic from
// peers that advanced first, share a small pool of pending slots and can only
// displace each other. Heads that fell out of the window are refused.

use std::collections::{HashMap, VecDeque};

use cadence_core::Hash;

/// Default number of slots for hashes that are not the current or previous head.
pub const DEFAULT_PENDING_SLOTS: usize = 4;

/// How many retired heads are remembered and refused.
const RETIRED_MEMORY: usize = 16;

#[derive(Debug)]
struct Slot<T> {
    /// Creation order, used to pick eviction victims among pending slots.
    created: u64,
    value: T,
}

/// Map from previous hash to per-cycle state.
///
/// Holds at most the current head, the previous head and `pending_capacity`
/// other keys.
#[derive(Debug)]
pub struct RetentionWindow<T> {
    pending_capacity: usize,
    next_seq: u64,
    current: Option<Hash>,
    previous: Option<Hash>,
    retired: VecDeque<Hash>,
    slots: HashMap<Hash, Slot<T>>,
}

impl<T: Default> RetentionWindow<T> {
    pub fn new(pending_capacity: usize) -> Self {
        Self {
            pending_capacity,
            next_seq: 0,
            current: None,
            previous: None,
            retired: VecDeque::new(),
            slots: HashMap::new(),
        }
    }

    /// State for `key`, created on first use.
    ///
    /// Returns `None` when `key` is a retired head, or when it is unknown and
    /// no pending slot can be made for it. Creating a pending slot may evict
    /// the oldest other pending slot, never the current or previous head.
    pub fn entry(&mut self, key: Hash) -> Option<&mut T> {
        if !self.slots.contains_key(&key) {
            if self.retired.contains(&key) {
                tracing::debug!("Refusing state for retired head {}", key.short());
                return None;
            }
            if !self.is_head(&key) && !self.make_pending_room() {
                return None;
            }
            let created = self.next_seq;
            self.next_seq += 1;
            self.slots.insert(
                key,
                Slot {
                    created,
                    value: T::default(),
                },
            );
        }
        self.slots.get_mut(&key).map(|s| &mut s.value)
    }

    pub fn get(&self, key: &Hash) -> Option<&T> {
        self.slots.get(key).map(|s| &s.value)
    }

    /// Record that the chain head is now `head`; keep only `head` and the
    /// head before it.
    pub fn advance(&mut self, head: Hash) {
        if self.current == Some(head) {
            return;
        }
        if let Some(old) = self.previous.filter(|p| *p != head) {
            self.retired.push_back(old);
            if self.retired.len() > RETIRED_MEMORY {
                self.retired.pop_front();
            }
        }
        self.retired.retain(|h| *h != head);
        self.previous = self.current;
        self.current = Some(head);

        let (current, previous) = (self.current, self.previous);
        let before = self.slots.len();
        self.slots
            .retain(|k, _| Some(*k) == current || Some(*k) == previous);
        let dropped = before - self.slots.len();
        if dropped > 0 {
            tracing::debug!(
                "Dropped state for {} stale previous hashes on advance to {}",
                dropped,
                head.short()
            );
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> Vec<Hash> {
        self.slots.keys().copied().collect()
    }

    fn is_head(&self, key: &Hash) -> bool {
        Some(*key) == self.current || Some(*key) == self.previous
    }

    /// Ensure a pending slot is free, evicting the oldest pending slot if needed.
    fn make_pending_room(&mut self) -> bool {
        if self.pending_capacity == 0 {
            return false;
        }
        let pending = self.slots.keys().filter(|k| !self.is_head(k)).count();
        if pending < self.pending_capacity {
            return true;
        }
        let victim = self
            .slots
            .iter()
            .filter(|(k, _)| !self.is_head(k))
            .min_by_key(|(_, s)| s.created)
            .map(|(k, _)| *k);
        match victim {
            Some(k) => {
                tracing::debug!("Evicting pending state for {}", k.short());
                self.slots.remove(&k);
                true
            }
            None => false,
        }
    }
}
