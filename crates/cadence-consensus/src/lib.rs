// crates/cadence-consensus/src/lib.rs
//
// cadence-consensus: Cyclic delta consensus for the Cadence node.
//
// Every cycle a node walks four phases driven by a wall-clock aligned timer.
// Producers propose candidate deltas, vote for the candidate whose producer
// ranks best for the current chain head, and the plurality winner is published
// as the next head. The engine module wires these pieces together.

pub mod chain;
pub mod clock;
pub mod config;
pub mod elector;
pub mod engine;
pub mod error;
pub mod phase;
pub mod ranking;
pub mod registration;
pub mod reputation;
pub mod retention;
pub mod voter;

pub use chain::{ChainAdvance, DeltaHashProvider};
pub use clock::{CycleClock, PhaseReceiver};
pub use config::{CycleConfiguration, PhaseTiming};
pub use elector::{DeltaElector, ElectionResult};
pub use engine::{
    Collaborators, ConsensusEngine, ConsensusEngineBuilder, InboundOutcome, PhaseOutcome,
    SkipReason,
};
pub use error::ConsensusError;
pub use phase::{Phase, PhaseName, PhaseStatus};
pub use ranking::ProducerRanker;
pub use registration::Registration;
pub use reputation::{ReputationEvent, ReputationEventKind, ReputationSink};
pub use voter::DeltaVoter;
