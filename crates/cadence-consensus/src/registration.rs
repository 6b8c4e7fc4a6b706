// crates/cadence-consensus/src/registration.rs
//
// Outcome of feeding one candidate or vote into the voter or elector.
//
// Registration never fails with an error: traffic from outside the producer
// set or for a superseded previous hash is simply discarded, and the caller
// learns which of these happened.

/// Outcome of registering a candidate or vote received from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Stored for the first time.
    Registered,
    /// Identical to something already stored; nothing changed.
    Duplicate,
    /// Replaced an earlier vote from the same voter.
    Replaced,
    /// Discarded; the sender is not in the producer set.
    Rejected,
    /// Discarded; the previous hash is no longer the head or its predecessor.
    Stale,
}

impl Registration {
    /// Whether the stored state changed.
    pub fn changed(self) -> bool {
        matches!(self, Registration::Registered | Registration::Replaced)
    }
}
