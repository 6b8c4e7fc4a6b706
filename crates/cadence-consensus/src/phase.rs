// crates/cadence-consensus/src/phase.rs
//
// Phase events emitted by the cycle clock.
//
// Every cycle walks the same eight states, PhaseName x PhaseStatus:
//   Construction/Producing -> Construction/Collecting -> Campaigning/Producing
//   -> ... -> Synchronisation/Collecting -> (next cycle) Construction/Producing

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use cadence_core::Hash;

/// The four phases of a cycle, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhaseName {
    /// Producers build and broadcast candidate deltas.
    Construction,
    /// Producers broadcast a vote for their favourite candidate.
    Campaigning,
    /// Votes are tallied and the winner published.
    Voting,
    /// Late arrivals converge on the published winner.
    Synchronisation,
}

impl PhaseName {
    pub const ALL: [PhaseName; 4] = [
        PhaseName::Construction,
        PhaseName::Campaigning,
        PhaseName::Voting,
        PhaseName::Synchronisation,
    ];

    /// Position in `ALL`.
    pub fn index(self) -> usize {
        match self {
            PhaseName::Construction => 0,
            PhaseName::Campaigning => 1,
            PhaseName::Voting => 2,
            PhaseName::Synchronisation => 3,
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseName::Construction => write!(f, "Construction"),
            PhaseName::Campaigning => write!(f, "Campaigning"),
            PhaseName::Voting => write!(f, "Voting"),
            PhaseName::Synchronisation => write!(f, "Synchronisation"),
        }
    }
}

/// Sub-state within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhaseStatus {
    /// The local node acts.
    Producing,
    /// Late input from peers is still accepted.
    Collecting,
}

impl PhaseStatus {
    pub const ALL: [PhaseStatus; 2] = [PhaseStatus::Producing, PhaseStatus::Collecting];
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseStatus::Producing => write!(f, "Producing"),
            PhaseStatus::Collecting => write!(f, "Collecting"),
        }
    }
}

/// One sub-phase boundary crossing. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// Head of the chain when the event was emitted.
    pub previous_delta_hash: Hash,
    pub name: PhaseName,
    pub status: PhaseStatus,
    /// Monotonic emission time.
    pub timestamp: Instant,
    /// Wall-clock time of the boundary.
    pub wall_time: DateTime<Utc>,
    /// Number of whole cycles since the Unix epoch.
    pub cycle: u64,
}

impl Phase {
    /// A phase stamped with the current time, for driving the engine by hand.
    pub fn now(previous_delta_hash: Hash, name: PhaseName, status: PhaseStatus, cycle: u64) -> Self {
        Self {
            previous_delta_hash,
            name,
            status,
            timestamp: Instant::now(),
            wall_time: Utc::now(),
            cycle,
        }
    }

    pub fn is(&self, name: PhaseName, status: PhaseStatus) -> bool {
        self.name == name && self.status == status
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} {}/{} after {}",
            self.cycle,
            self.name,
            self.status,
            self.previous_delta_hash.short()
        )
    }
}
