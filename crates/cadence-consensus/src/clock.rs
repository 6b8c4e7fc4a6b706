// crates/cadence-consensus/src/clock.rs
//
// CycleClock: turns wall-clock time into an ordered stream of Phase events.
//
// Nodes align purely through shared wall-clock time: the position inside the
// current cycle is `now mod cycle_duration`, so a node started mid-cycle joins
// at the sub-phase everyone else is in. A single timer task walks the eight
// per-cycle boundaries in order and fans each Phase out to every subscriber
// on an unbounded channel, so a slow consumer sees events late but never
// loses or reorders them. Timers run on the monotonic clock; once per cycle
// the wall clock is read again and, if it was stepped, the boundaries are
// realigned to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use cadence_core::WallClock;

use crate::chain::DeltaHashProvider;
use crate::config::CycleConfiguration;
use crate::error::ConsensusError;
use crate::phase::{Phase, PhaseName, PhaseStatus};

/// Wall-clock drift against the monotonic clock tolerated before realigning.
pub const RESYNC_TOLERANCE: Duration = Duration::from_millis(10);

/// Receiving end of a clock subscription. Yields `None` once the clock closes.
pub type PhaseReceiver = mpsc::UnboundedReceiver<Phase>;

/// A boundary located in absolute time: cycle number plus index into the
/// cycle's boundary list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryPosition {
    pub cycle: u64,
    pub index: usize,
}

/// The eight boundaries of a cycle with arithmetic over absolute time.
#[derive(Debug, Clone)]
pub struct PhaseSchedule {
    cycle_nanos: u128,
    boundaries: Vec<(u128, PhaseName, PhaseStatus)>,
}

impl PhaseSchedule {
    pub fn new(config: &CycleConfiguration) -> Self {
        Self {
            cycle_nanos: config.cycle_duration.as_nanos(),
            boundaries: config
                .boundaries()
                .into_iter()
                .map(|(offset, name, status)| (offset.as_nanos(), name, status))
                .collect(),
        }
    }

    /// The boundary most recently crossed at `since_epoch`, wrapping into the
    /// previous cycle when `since_epoch` falls before the first phase offset.
    pub fn current(&self, since_epoch: Duration) -> BoundaryPosition {
        let now = since_epoch.as_nanos();
        let cycle = (now / self.cycle_nanos) as u64;
        let offset = now % self.cycle_nanos;

        match self.boundaries.iter().rposition(|(b, _, _)| *b <= offset) {
            Some(index) => BoundaryPosition { cycle, index },
            None => BoundaryPosition {
                cycle: cycle.saturating_sub(1),
                index: self.boundaries.len() - 1,
            },
        }
    }

    pub fn next(&self, pos: BoundaryPosition) -> BoundaryPosition {
        if pos.index + 1 < self.boundaries.len() {
            BoundaryPosition {
                cycle: pos.cycle,
                index: pos.index + 1,
            }
        } else {
            BoundaryPosition {
                cycle: pos.cycle + 1,
                index: 0,
            }
        }
    }

    /// Absolute time of a boundary, in nanoseconds since the Unix epoch.
    pub fn at(&self, pos: BoundaryPosition) -> u128 {
        pos.cycle as u128 * self.cycle_nanos + self.boundaries[pos.index].0
    }

    pub fn label(&self, pos: BoundaryPosition) -> (PhaseName, PhaseStatus) {
        let (_, name, status) = self.boundaries[pos.index];
        (name, status)
    }

    /// Delay from `since_epoch` to the start of the next cycle; zero when
    /// exactly on a cycle boundary.
    pub fn until_next_cycle(&self, since_epoch: Duration) -> Duration {
        let into = since_epoch.as_nanos() % self.cycle_nanos;
        if into == 0 {
            Duration::ZERO
        } else {
            nanos_to_duration(self.cycle_nanos - into)
        }
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Wall-clock driven phase emitter.
pub struct CycleClock {
    config: CycleConfiguration,
    schedule: PhaseSchedule,
    chain: Arc<DeltaHashProvider>,
    wall_clock: Arc<dyn WallClock>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Phase>>>>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CycleClock {
    /// Validate `config` and prepare a clock. Nothing is emitted until `start`.
    pub fn new(
        config: CycleConfiguration,
        chain: Arc<DeltaHashProvider>,
        wall_clock: Arc<dyn WallClock>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        let schedule = PhaseSchedule::new(&config);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            schedule,
            chain,
            wall_clock,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            shutdown,
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    pub fn configuration(&self) -> &CycleConfiguration {
        &self.config
    }

    /// Register a new subscriber. Subscribers only see events emitted after
    /// they subscribe.
    pub fn subscribe(&self) -> PhaseReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.subscribers.lock().push(tx);
        }
        rx
    }

    /// Spawn the timer task on the current tokio runtime.
    pub fn start(&self) -> Result<(), ConsensusError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsensusError::AlreadyStarted);
        }
        if self.is_closed() {
            tracing::debug!("Cycle clock closed before start; not starting");
            return Ok(());
        }

        let runner = ClockLoop {
            schedule: self.schedule.clone(),
            chain: self.chain.clone(),
            subscribers: self.subscribers.clone(),
            shutdown: self.shutdown.subscribe(),
            wall_clock: self.wall_clock.clone(),
            anchor: Anchor::now(self.wall_clock.as_ref()),
        };

        tracing::info!(
            "Cycle clock started (cycle {:?}, next cycle in {:?})",
            self.config.cycle_duration,
            self.time_until_next_cycle_start()
        );

        *self.task.lock() = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    /// Stop emitting. Pending timers are cancelled and every subscriber's
    /// stream ends. Idempotent.
    pub fn close(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.subscribers.lock().clear();
        tracing::info!("Cycle clock closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for the timer task to finish after `close`.
    pub async fn stopped(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Cycle clock task ended abnormally: {}", e);
            }
        }
    }

    /// Wall-clock delay until the next cycle starts.
    pub fn time_until_next_cycle_start(&self) -> Duration {
        self.schedule.until_next_cycle(self.wall_clock.since_epoch())
    }

    /// The sub-phase the network is in right now.
    pub fn current_phase(&self) -> (PhaseName, PhaseStatus) {
        let pos = self.schedule.current(self.wall_clock.since_epoch());
        self.schedule.label(pos)
    }
}

impl Drop for CycleClock {
    fn drop(&mut self) {
        self.close();
    }
}

/// A wall-clock reading paired with the monotonic instant it was taken at.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    since_epoch: Duration,
    wall: DateTime<Utc>,
    instant: Instant,
}

impl Anchor {
    fn now(wall_clock: &dyn WallClock) -> Self {
        Self {
            since_epoch: wall_clock.since_epoch(),
            wall: wall_clock.now(),
            instant: Instant::now(),
        }
    }

    /// Monotonic delay from the anchor to `at_nanos` since the epoch; zero if
    /// already past.
    fn delay_to(&self, at_nanos: u128) -> Duration {
        nanos_to_duration(at_nanos.saturating_sub(self.since_epoch.as_nanos()))
    }
}

/// State owned by the spawned timer task.
struct ClockLoop {
    schedule: PhaseSchedule,
    chain: Arc<DeltaHashProvider>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Phase>>>>,
    shutdown: watch::Receiver<bool>,
    wall_clock: Arc<dyn WallClock>,
    anchor: Anchor,
}

impl ClockLoop {
    async fn run(mut self) {
        // Join at the sub-phase the network is already in.
        let mut pos = self.schedule.current(self.anchor.since_epoch);
        self.emit(pos, self.anchor.instant, self.anchor.wall);

        loop {
            pos = self.schedule.next(pos);
            if pos.index == 0 {
                pos = self.resync(pos);
            }
            let delay = self.anchor.delay_to(self.schedule.at(pos));
            let deadline = self.anchor.instant + delay;

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if *self.shutdown.borrow() {
                break;
            }

            let wall = self.anchor.wall
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            self.emit(pos, deadline, wall);
        }

        self.subscribers.lock().clear();
        tracing::debug!("Cycle clock loop finished");
    }

    /// Re-read the wall clock before a new cycle. When it has been stepped,
    /// later boundaries follow the new reading. A forward step of more than a
    /// cycle jumps to the boundary most recently crossed; `pos` never moves
    /// backwards, so no boundary is emitted twice.
    fn resync(&mut self, pos: BoundaryPosition) -> BoundaryPosition {
        let expected = self.anchor.since_epoch + self.anchor.instant.elapsed();
        let actual = self.wall_clock.since_epoch();
        let drift = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        if drift <= RESYNC_TOLERANCE {
            return pos;
        }

        tracing::warn!(
            "Wall clock {} by {:?}; realigning phase boundaries",
            if actual > expected { "jumped ahead" } else { "stepped back" },
            drift
        );
        self.anchor = Anchor::now(self.wall_clock.as_ref());

        let crossed = self.schedule.current(self.anchor.since_epoch);
        if self.schedule.at(crossed) > self.schedule.at(pos) + self.schedule.cycle_nanos {
            crossed
        } else {
            pos
        }
    }

    fn emit(&self, pos: BoundaryPosition, timestamp: Instant, wall_time: DateTime<Utc>) {
        let (name, status) = self.schedule.label(pos);
        let phase = Phase {
            previous_delta_hash: self.chain.latest(),
            name,
            status,
            timestamp,
            wall_time,
            cycle: pos.cycle,
        };
        tracing::debug!("Phase {}", phase);

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(phase.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PhaseTiming;
    use cadence_core::{Hash, MonotonicWallClock};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// 1 s cycle; boundaries at 0, 100, 250, 350, 500, 600, 750, 850 ms.
    fn test_config() -> CycleConfiguration {
        CycleConfiguration::uniform(ms(1000), ms(100), ms(100)).unwrap()
    }

    fn clock_at(config: CycleConfiguration, since_epoch: Duration) -> (CycleClock, Arc<DeltaHashProvider>) {
        let wall = Arc::new(MonotonicWallClock::starting_at(since_epoch));
        let chain = Arc::new(DeltaHashProvider::new(Hash::digest(b"genesis"), wall.clone()));
        let clock = CycleClock::new(config, chain.clone(), wall).unwrap();
        (clock, chain)
    }

    #[test]
    fn test_schedule_current_and_next() {
        let schedule = PhaseSchedule::new(&test_config());
        let pos = schedule.current(ms(5_600));
        assert_eq!(pos, BoundaryPosition { cycle: 5, index: 5 });
        assert_eq!(schedule.label(pos), (PhaseName::Voting, PhaseStatus::Collecting));

        let last = BoundaryPosition { cycle: 5, index: 7 };
        assert_eq!(schedule.next(last), BoundaryPosition { cycle: 6, index: 0 });
        assert_eq!(schedule.at(BoundaryPosition { cycle: 6, index: 0 }), ms(6_000).as_nanos());
    }

    #[test]
    fn test_until_next_cycle() {
        let schedule = PhaseSchedule::new(&test_config());
        assert_eq!(schedule.until_next_cycle(ms(7_000)), Duration::ZERO);
        assert_eq!(schedule.until_next_cycle(ms(7_600)), ms(400));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let config = CycleConfiguration {
            cycle_duration: ms(1000),
            phases: [
                PhaseTiming::new(ms(0), ms(400), ms(400)),
                PhaseTiming::new(ms(250), ms(100), ms(100)),
                PhaseTiming::new(ms(500), ms(100), ms(100)),
                PhaseTiming::new(ms(750), ms(100), ms(100)),
            ],
        };
        let wall = Arc::new(MonotonicWallClock::starting_at(ms(0)));
        let chain = Arc::new(DeltaHashProvider::new(Hash::ZERO, wall.clone()));
        let err = CycleClock::new(config, chain, wall).err().unwrap();
        assert!(matches!(err, ConsensusError::InvalidCycleConfiguration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_cycles_yield_sixteen_ordered_events() {
        let (clock, _) = clock_at(test_config(), ms(42_000));
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let mut events = Vec::new();
        for _ in 0..16 {
            events.push(rx.recv().await.unwrap());
        }
        clock.close();

        assert!(events[0].is(PhaseName::Construction, PhaseStatus::Producing));
        assert!(events[8].is(PhaseName::Construction, PhaseStatus::Producing));
        assert!(events[15].is(PhaseName::Synchronisation, PhaseStatus::Collecting));
        assert_eq!(events[0].cycle, 42);
        assert_eq!(events[15].cycle, 43);
        assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(events[8].timestamp - events[0].timestamp, ms(1000));

        let expected: Vec<(PhaseName, PhaseStatus)> = PhaseName::ALL
            .iter()
            .flat_map(|n| PhaseStatus::ALL.iter().map(move |s| (*n, *s)))
            .collect();
        for (i, e) in events.iter().enumerate() {
            assert_eq!((e.name, e.status), expected[i % 8]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_cycle_join() {
        let (clock, _) = clock_at(test_config(), ms(10_600));
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.is(PhaseName::Voting, PhaseStatus::Collecting));
        assert_eq!(first.cycle, 10);

        let second = rx.recv().await.unwrap();
        assert!(second.is(PhaseName::Synchronisation, PhaseStatus::Producing));
        assert_eq!(second.timestamp - first.timestamp, ms(150));
        clock.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_before_first_offset_wraps_to_previous_cycle() {
        let config = CycleConfiguration::new(
            ms(1000),
            [
                PhaseTiming::new(ms(100), ms(100), ms(100)),
                PhaseTiming::new(ms(300), ms(100), ms(100)),
                PhaseTiming::new(ms(500), ms(100), ms(100)),
                PhaseTiming::new(ms(700), ms(100), ms(100)),
            ],
        )
        .unwrap();
        let (clock, _) = clock_at(config, ms(3_050));
        assert_eq!(
            clock.current_phase(),
            (PhaseName::Synchronisation, PhaseStatus::Collecting)
        );
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.is(PhaseName::Synchronisation, PhaseStatus::Collecting));
        assert_eq!(first.cycle, 2);
        let second = rx.recv().await.unwrap();
        assert!(second.is(PhaseName::Construction, PhaseStatus::Producing));
        assert_eq!(second.cycle, 3);
        clock.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_carries_current_chain_head() {
        let (clock, chain) = clock_at(test_config(), ms(0));
        let genesis = chain.latest();
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.previous_delta_hash, genesis);

        let h1 = Hash::digest(b"h1");
        assert!(chain.try_update_latest(genesis, h1));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.previous_delta_hash, h1);
        clock.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_ends_streams_and_is_idempotent() {
        let (clock, _) = clock_at(test_config(), ms(0));
        let mut rx = clock.subscribe();
        clock.start().unwrap();
        assert!(rx.recv().await.is_some());

        clock.close();
        clock.close();
        assert!(clock.is_closed());
        clock.stopped().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_error() {
        let (clock, _) = clock_at(test_config(), ms(0));
        clock.start().unwrap();
        assert!(matches!(clock.start(), Err(ConsensusError::AlreadyStarted)));
        clock.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_step_realigns_next_cycle() {
        let wall = Arc::new(MonotonicWallClock::starting_at(ms(42_000)));
        let chain = Arc::new(DeltaHashProvider::new(Hash::digest(b"genesis"), wall.clone()));
        let clock = CycleClock::new(test_config(), chain, wall.clone()).unwrap();
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.is(PhaseName::Construction, PhaseStatus::Producing));
        wall.step(chrono::Duration::milliseconds(300));

        let mut events = Vec::new();
        loop {
            let phase = rx.recv().await.unwrap();
            let done = phase.cycle == 43 && phase.is(PhaseName::Campaigning, PhaseStatus::Producing);
            events.push(phase);
            if done {
                break;
            }
        }
        clock.close();

        // The rest of cycle 42 keeps its timers; cycle 43 follows the stepped
        // clock, so its boundaries at 43.0 s and 43.1 s are already due.
        assert_eq!(events.len(), 10);
        assert_eq!(events[6].timestamp - first.timestamp, ms(850));
        assert!(events[7].is(PhaseName::Construction, PhaseStatus::Producing));
        assert_eq!(events[7].timestamp - first.timestamp, ms(850));
        assert_eq!(events[9].timestamp - first.timestamp, ms(950));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_wall_clock_keeps_schedule() {
        let (clock, _) = clock_at(test_config(), ms(7_000));
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        let first = rx.recv().await.unwrap();
        let mut rest = Vec::new();
        for _ in 0..24 {
            rest.push(rx.recv().await.unwrap());
        }
        clock.close();
        let last = &rest[23];
        assert_eq!(last.cycle, 10);
        assert!(last.is(PhaseName::Construction, PhaseStatus::Producing));
        assert_eq!(last.timestamp - first.timestamp, ms(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_misses_nothing() {
        let (clock, _) = clock_at(test_config(), ms(0));
        let mut rx = clock.subscribe();
        clock.start().unwrap();

        // Let three full cycles pass before reading anything.
        tokio::time::sleep(ms(3_000)).await;
        let mut seen = Vec::new();
        while let Ok(phase) = rx.try_recv() {
            seen.push(phase);
        }
        clock.close();

        assert!(seen.len() >= 24);
        assert!(seen.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }
}
