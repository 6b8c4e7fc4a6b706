// crates/cadence-core/src/lib.rs
//
// cadence-core: Core types, collaborator traits, and crypto primitives for
// the Cadence delta-consensus node.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the hash and identity types, the messages exchanged during a
// cycle, the error type, and the interfaces of the collaborators that sit
// around the consensus engine (builder, hub, cache, producer set, clock).

pub mod crypto;
pub mod delta;
pub mod error;
pub mod hash;
pub mod identity;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use cadence_core::CandidateDelta;`

pub use delta::{CandidateDelta, FavouriteVote, InboundMessage};
pub use error::CadenceError;
pub use hash::Hash;
pub use identity::ProducerId;
pub use traits::{
    DeltaBuilder, DeltaCache, DeltaHub, MonotonicWallClock, ProducerSetProvider,
    StaticProducerSet, SystemWallClock, WallClock,
};
