// crates/cadence-consensus/src/engine.rs
//
// ConsensusEngine: wires cycle clock phases to consensus actions.
//
//   Construction/Producing -> build candidate, register it, broadcast it
//   Campaigning/Producing  -> pick favourite, register vote, broadcast it
//   Voting/Producing       -> elect winner, publish it if we hold the payload
//   Synchronisation/*, */Collecting -> no local action
//
// Registration of peer traffic is always live; only decisions and actions are
// gated by phase. Each action runs as its own task bounded by the phase's
// production + collection window, so a slow collaborator never delays the
// next phase event. Per-cycle failures are logged and skipped: the protocol
// recovers on the next cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use cadence_core::{
    DeltaBuilder, DeltaCache, DeltaHub, FavouriteVote, Hash, InboundMessage,
    ProducerId, ProducerSetProvider, SystemWallClock, WallClock,
};

use crate::chain::{DeltaHashProvider, DEFAULT_HISTORY_CAPACITY};
use crate::clock::CycleClock;
use crate::config::CycleConfiguration;
use crate::elector::DeltaElector;
use crate::error::ConsensusError;
use crate::phase::{Phase, PhaseName, PhaseStatus};
use crate::ranking::ProducerRanker;
use crate::registration::Registration;
use crate::reputation::ReputationSink;
use crate::voter::DeltaVoter;

/// Why a phase action did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The local node is not in the producer set.
    NotAProducer,
    /// The builder had nothing to propose.
    NoPendingWork,
    /// The builder failed.
    BuildFailed,
    /// The builder returned a candidate for another head or producer.
    ForeignCandidate,
    /// No candidate was seen, so there is nothing to vote for.
    NoFavourite,
    /// No vote was seen, so there is nothing to elect.
    NoWinner,
    /// The winner's payload is not held locally; another node will publish.
    PayloadNotHeld,
    /// The hub failed to broadcast.
    BroadcastFailed,
    /// The hub failed to publish.
    PublishFailed,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NotAProducer => "not a producer",
            SkipReason::NoPendingWork => "no pending work",
            SkipReason::BuildFailed => "build failed",
            SkipReason::ForeignCandidate => "builder returned a foreign candidate",
            SkipReason::NoFavourite => "no favourite",
            SkipReason::NoWinner => "no winner",
            SkipReason::PayloadNotHeld => "winner payload not held locally",
            SkipReason::BroadcastFailed => "broadcast failed",
            SkipReason::PublishFailed => "publish failed",
        };
        write!(f, "{}", s)
    }
}

/// What handling one phase event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase has no local action.
    Idle,
    /// This (phase, previous hash) was already handled.
    AlreadyActed,
    /// The chain already moved past the previous hash this action targets.
    AlreadyAdvanced,
    /// The action was skipped for this cycle.
    Skipped(SkipReason),
    /// A candidate was built, registered and broadcast.
    CandidateBroadcast(cadence_core::CandidateDelta),
    /// A favourite vote was registered and broadcast.
    FavouriteBroadcast(FavouriteVote),
    /// The winner was published and the chain advanced.
    Published { previous_hash: Hash, new_head: Hash },
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Candidate(Registration),
    Favourite(Registration),
    ChainAdvanced,
    ChainUnchanged,
}

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn DeltaBuilder>,
    pub hub: Arc<dyn DeltaHub>,
    pub cache: Arc<dyn DeltaCache>,
}

/// Remembers the last previous hash each phase acted on, so that re-entering a
/// phase for the same chain position does nothing.
#[derive(Debug, Default)]
struct ActionLedger {
    last: HashMap<PhaseName, Hash>,
}

impl ActionLedger {
    /// Claim `(name, previous_hash)`. False if already claimed.
    fn claim(&mut self, name: PhaseName, previous_hash: Hash) -> bool {
        if self.last.get(&name) == Some(&previous_hash) {
            return false;
        }
        self.last.insert(name, previous_hash);
        true
    }

    fn release(&mut self, name: PhaseName, previous_hash: Hash) {
        if self.last.get(&name) == Some(&previous_hash) {
            self.last.remove(&name);
        }
    }
}

/// Builder for [`ConsensusEngine`].
pub struct ConsensusEngineBuilder {
    local_id: ProducerId,
    config: CycleConfiguration,
    genesis: Hash,
    producers: Arc<dyn ProducerSetProvider>,
    collaborators: Collaborators,
    wall_clock: Arc<dyn WallClock>,
    reputation: ReputationSink,
    history_capacity: usize,
}

impl ConsensusEngineBuilder {
    /// Use a specific wall clock (defaults to the system clock).
    pub fn with_wall_clock(mut self, wall_clock: Arc<dyn WallClock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Send reputation events to `sink`.
    pub fn with_reputation(mut self, sink: ReputationSink) -> Self {
        self.reputation = sink;
        self
    }

    /// Number of chain heads the hash provider retains.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Validate the configuration and producer set, and assemble the engine.
    pub fn build(self) -> Result<ConsensusEngine, ConsensusError> {
        if self.producers.producers().is_empty() {
            return Err(ConsensusError::EmptyProducerSet);
        }

        let chain = Arc::new(DeltaHashProvider::with_capacity(
            self.genesis,
            self.wall_clock.clone(),
            self.history_capacity,
        ));
        let clock = CycleClock::new(self.config.clone(), chain.clone(), self.wall_clock)?;
        let ranker = Arc::new(ProducerRanker::new());
        let voter = Arc::new(
            DeltaVoter::new(ranker.clone(), self.producers.clone())
                .with_reputation(self.reputation.clone()),
        );
        let elector = Arc::new(
            DeltaElector::new(ranker.clone(), self.producers.clone())
                .with_reputation(self.reputation),
        );
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            "Consensus engine initialised for {} ({} producers, local producer: {})",
            self.local_id.short(),
            self.producers.producers().len(),
            self.producers.is_producer(&self.local_id)
        );

        Ok(ConsensusEngine {
            local_id: self.local_id,
            config: self.config,
            producers: self.producers,
            ranker,
            voter,
            elector,
            chain,
            clock,
            collaborators: self.collaborators,
            ledger: Mutex::new(ActionLedger::default()),
            shutdown,
            phase_task: Mutex::new(None),
        })
    }
}

/// Owns all per-cycle consensus state for one node.
pub struct ConsensusEngine {
    local_id: ProducerId,
    config: CycleConfiguration,
    producers: Arc<dyn ProducerSetProvider>,
    ranker: Arc<ProducerRanker>,
    voter: Arc<DeltaVoter>,
    elector: Arc<DeltaElector>,
    chain: Arc<DeltaHashProvider>,
    clock: CycleClock,
    collaborators: Collaborators,
    ledger: Mutex<ActionLedger>,
    shutdown: watch::Sender<bool>,
    phase_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsensusEngine {
    pub fn builder(
        local_id: ProducerId,
        config: CycleConfiguration,
        genesis: Hash,
        producers: Arc<dyn ProducerSetProvider>,
        collaborators: Collaborators,
    ) -> ConsensusEngineBuilder {
        ConsensusEngineBuilder {
            local_id,
            config,
            genesis,
            producers,
            collaborators,
            wall_clock: Arc::new(SystemWallClock),
            reputation: ReputationSink::disabled(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }

    pub fn local_id(&self) -> ProducerId {
        self.local_id
    }

    pub fn voter(&self) -> &Arc<DeltaVoter> {
        &self.voter
    }

    pub fn elector(&self) -> &Arc<DeltaElector> {
        &self.elector
    }

    pub fn chain(&self) -> &Arc<DeltaHashProvider> {
        &self.chain
    }

    pub fn ranker(&self) -> &Arc<ProducerRanker> {
        &self.ranker
    }

    pub fn clock(&self) -> &CycleClock {
        &self.clock
    }

    fn is_local_producer(&self) -> bool {
        self.producers.is_producer(&self.local_id)
    }

    /// Start the cycle clock and the phase loop.
    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let mut slot = self.phase_task.lock();
        if slot.is_some() {
            return Err(ConsensusError::AlreadyStarted);
        }

        let phases = self.clock.subscribe();
        self.clock.start()?;

        let engine = self.clone();
        *slot = Some(tokio::spawn(async move {
            engine.run_phases(phases).await;
        }));
        Ok(())
    }

    /// Stop the clock, cancel in-flight actions and end inbound loops.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.clock.close();
        self.clock.stopped().await;

        let handle = self.phase_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Phase loop ended abnormally: {}", e);
            }
        }
        tracing::info!("Consensus engine for {} stopped", self.local_id.short());
    }

    async fn run_phases(self: Arc<Self>, mut phases: mpsc::UnboundedReceiver<Phase>) {
        let mut actions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                maybe_phase = phases.recv() => {
                    match maybe_phase {
                        Some(phase) => self.dispatch(&mut actions, phase),
                        None => break,
                    }
                }
                Some(joined) = actions.join_next(), if !actions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Phase action panicked: {}", e);
                        }
                    }
                }
            }
        }

        // In-flight actions are cancelled; registration is atomic per call,
        // so no partial state is left behind.
        actions.shutdown().await;
        tracing::debug!("Phase loop finished");
    }

    fn dispatch(self: &Arc<Self>, actions: &mut JoinSet<()>, phase: Phase) {
        let acts = phase.status == PhaseStatus::Producing
            && phase.name != PhaseName::Synchronisation;
        if !acts {
            tracing::trace!("Phase {}: no local action", phase);
            return;
        }

        let budget = self.config.timing(phase.name).total();
        let engine = self.clone();
        actions.spawn(async move {
            match tokio::time::timeout(budget, engine.handle_phase(&phase)).await {
                Ok(outcome) => tracing::debug!("Phase {} -> {:?}", phase, outcome),
                Err(_) => tracing::warn!(
                    "Phase {} action did not finish within {:?}; skipped this cycle",
                    phase,
                    budget
                ),
            }
        });
    }

    /// Run the action for one phase event to completion.
    pub async fn handle_phase(&self, phase: &Phase) -> PhaseOutcome {
        match (phase.name, phase.status) {
            (PhaseName::Construction, PhaseStatus::Producing) => {
                self.construct(phase.previous_delta_hash).await
            }
            (PhaseName::Campaigning, PhaseStatus::Producing) => {
                self.campaign(phase.previous_delta_hash).await
            }
            (PhaseName::Voting, PhaseStatus::Producing) => {
                self.vote(phase.previous_delta_hash).await
            }
            _ => PhaseOutcome::Idle,
        }
    }

    async fn construct(&self, previous_hash: Hash) -> PhaseOutcome {
        // A new cycle starts from `previous_hash`; older state can go.
        self.voter.prune(previous_hash).await;
        self.elector.prune(previous_hash).await;

        if !self.is_local_producer() {
            return PhaseOutcome::Skipped(SkipReason::NotAProducer);
        }
        if !self.ledger.lock().claim(PhaseName::Construction, previous_hash) {
            return PhaseOutcome::AlreadyActed;
        }

        let candidate = match self.collaborators.builder.build_candidate(previous_hash).await {
            Ok(c) => c,
            Err(e) if e.is_transient() => {
                tracing::debug!("Nothing to build after {}: {}", previous_hash.short(), e);
                return PhaseOutcome::Skipped(SkipReason::NoPendingWork);
            }
            Err(e) => {
                tracing::warn!("Failed to build candidate after {}: {}", previous_hash.short(), e);
                return PhaseOutcome::Skipped(SkipReason::BuildFailed);
            }
        };

        if candidate.previous_hash != previous_hash || candidate.producer_id != self.local_id {
            tracing::warn!(
                "Builder returned candidate for {} by {}, expected {} by {}; not broadcasting",
                candidate.previous_hash.short(),
                candidate.producer_id.short(),
                previous_hash.short(),
                self.local_id.short()
            );
            return PhaseOutcome::Skipped(SkipReason::ForeignCandidate);
        }

        // A node always considers its own candidate.
        self.voter.register_candidate(candidate.clone()).await;

        if let Err(e) = self.collaborators.hub.broadcast_candidate(&candidate).await {
            tracing::warn!(
                "Failed to broadcast candidate {}: {}",
                candidate.payload_hash.short(),
                e
            );
            return PhaseOutcome::Skipped(SkipReason::BroadcastFailed);
        }

        tracing::info!(
            "Broadcast candidate {} after {}",
            candidate.payload_hash.short(),
            previous_hash.short()
        );
        PhaseOutcome::CandidateBroadcast(candidate)
    }

    async fn campaign(&self, previous_hash: Hash) -> PhaseOutcome {
        if !self.is_local_producer() {
            return PhaseOutcome::Skipped(SkipReason::NotAProducer);
        }
        if !self.ledger.lock().claim(PhaseName::Campaigning, previous_hash) {
            return PhaseOutcome::AlreadyActed;
        }

        let Some(favourite) = self.voter.favourite(&previous_hash).await else {
            tracing::debug!("No favourite after {}; not voting", previous_hash.short());
            return PhaseOutcome::Skipped(SkipReason::NoFavourite);
        };

        let vote = FavouriteVote::for_candidate(&favourite, self.local_id);
        self.elector.register_vote(vote.clone()).await;

        if let Err(e) = self
            .collaborators
            .hub
            .broadcast_favourite(self.local_id, previous_hash, favourite.payload_hash)
            .await
        {
            tracing::warn!(
                "Failed to broadcast favourite {}: {}",
                favourite.payload_hash.short(),
                e
            );
            return PhaseOutcome::Skipped(SkipReason::BroadcastFailed);
        }

        tracing::info!(
            "Voted for {} after {}",
            favourite.payload_hash.short(),
            previous_hash.short()
        );
        PhaseOutcome::FavouriteBroadcast(vote)
    }

    async fn vote(&self, previous_hash: Hash) -> PhaseOutcome {
        if self.chain.latest() != previous_hash {
            tracing::debug!("Chain already advanced past {}", previous_hash.short());
            return PhaseOutcome::AlreadyAdvanced;
        }
        if !self.ledger.lock().claim(PhaseName::Voting, previous_hash) {
            return PhaseOutcome::AlreadyActed;
        }

        let Some(winner) = self.elector.elect(&previous_hash).await else {
            return PhaseOutcome::Skipped(SkipReason::NoWinner);
        };

        if !self
            .collaborators
            .cache
            .has_full_payload(previous_hash, winner)
            .await
        {
            tracing::debug!(
                "Winner {} not held locally; waiting for it from the network",
                winner.short()
            );
            return PhaseOutcome::Skipped(SkipReason::PayloadNotHeld);
        }

        match self.collaborators.hub.publish_winner(previous_hash, winner).await {
            Ok(new_head) => {
                if self.chain.try_update_latest(previous_hash, new_head) {
                    tracing::info!(
                        "Published {} after {}; new head {}",
                        winner.short(),
                        previous_hash.short(),
                        new_head.short()
                    );
                    PhaseOutcome::Published {
                        previous_hash,
                        new_head,
                    }
                } else {
                    PhaseOutcome::AlreadyAdvanced
                }
            }
            Err(e) => {
                tracing::warn!("Failed to publish {}: {}", winner.short(), e);
                // Nothing was published, so a retry for this head is allowed.
                self.ledger.lock().release(PhaseName::Voting, previous_hash);
                PhaseOutcome::Skipped(SkipReason::PublishFailed)
            }
        }
    }

    /// Route one message from the network.
    pub async fn handle_inbound(&self, message: InboundMessage) -> InboundOutcome {
        match message {
            InboundMessage::Candidate(candidate) => {
                if self.chain.is_superseded(&candidate.previous_hash) {
                    tracing::debug!(
                        "Ignoring candidate {} for superseded head {}",
                        candidate.payload_hash.short(),
                        candidate.previous_hash.short()
                    );
                    return InboundOutcome::Candidate(Registration::Stale);
                }
                InboundOutcome::Candidate(self.voter.register_candidate(candidate).await)
            }
            InboundMessage::Favourite(vote) => {
                if self.chain.is_superseded(&vote.previous_hash) {
                    tracing::debug!(
                        "Ignoring vote from {} for superseded head {}",
                        vote.voter_id.short(),
                        vote.previous_hash.short()
                    );
                    return InboundOutcome::Favourite(Registration::Stale);
                }
                InboundOutcome::Favourite(self.elector.register_vote(vote).await)
            }
            InboundMessage::DeltaPublished {
                previous_hash,
                new_hash,
            } => {
                if self.chain.try_update_latest(previous_hash, new_hash) {
                    self.voter.prune(new_hash).await;
                    self.elector.prune(new_hash).await;
                    InboundOutcome::ChainAdvanced
                } else {
                    InboundOutcome::ChainUnchanged
                }
            }
        }
    }

    /// Drain `inbound` until it closes or the engine stops.
    pub async fn run_inbound(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe = inbound.recv() => {
                    match maybe {
                        Some(message) => {
                            let outcome = self.handle_inbound(message).await;
                            tracing::trace!("Inbound -> {:?}", outcome);
                        }
                        None => break,
                    }
                }
            }
        }
        tracing::debug!("Inbound loop for {} finished", self.local_id.short());
    }
}
