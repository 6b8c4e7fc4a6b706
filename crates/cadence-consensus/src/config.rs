// crates/cadence-consensus/src/config.rs
//
// Static description of the repeating consensus cycle.
//
// A cycle is a fixed-length window split into four phases. Each phase has a
// production window (the local node acts) followed by a collection window
// (late broadcasts from slower peers are still accepted). Phases must not
// overlap and must fit inside the cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::phase::{PhaseName, PhaseStatus};

/// Timing of one phase relative to the start of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    /// Phase start relative to cycle start.
    pub offset: Duration,
    /// How long the node builds/broadcasts for.
    pub production_window: Duration,
    /// How long late input is still accepted after production ends.
    pub collection_window: Duration,
}

impl PhaseTiming {
    pub const fn new(offset: Duration, production_window: Duration, collection_window: Duration) -> Self {
        Self {
            offset,
            production_window,
            collection_window,
        }
    }

    /// Offset of the Producing -> Collecting boundary.
    pub fn collecting_offset(&self) -> Duration {
        self.offset + self.production_window
    }

    /// Offset at which the phase is considered closed.
    pub fn end(&self) -> Duration {
        self.offset + self.production_window + self.collection_window
    }

    /// Offset of the boundary that starts `status`.
    pub fn boundary(&self, status: PhaseStatus) -> Duration {
        match status {
            PhaseStatus::Producing => self.offset,
            PhaseStatus::Collecting => self.collecting_offset(),
        }
    }

    /// Production plus collection.
    pub fn total(&self) -> Duration {
        self.production_window + self.collection_window
    }
}

/// The full cycle layout: its length and one timing per phase, indexed in
/// `PhaseName::ALL` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CycleConfigurationToml", into = "CycleConfigurationToml")]
pub struct CycleConfiguration {
    pub cycle_duration: Duration,
    pub phases: [PhaseTiming; 4],
}

impl CycleConfiguration {
    /// Build and validate a configuration.
    pub fn new(cycle_duration: Duration, phases: [PhaseTiming; 4]) -> Result<Self, ConsensusError> {
        let config = Self {
            cycle_duration,
            phases,
        };
        config.validate()?;
        Ok(config)
    }

    /// Evenly split `cycle_duration` into four phases, each with the given
    /// production and collection windows at the start of its quarter.
    pub fn uniform(
        cycle_duration: Duration,
        production_window: Duration,
        collection_window: Duration,
    ) -> Result<Self, ConsensusError> {
        let quarter = cycle_duration / 4;
        let phases = [0u32, 1, 2, 3]
            .map(|i| PhaseTiming::new(quarter * i, production_window, collection_window));
        Self::new(cycle_duration, phases)
    }

    pub fn timing(&self, name: PhaseName) -> &PhaseTiming {
        &self.phases[name.index()]
    }

    /// Check the ordering and fit invariants.
    ///
    /// Zero-length windows are rejected because they make two sub-phase
    /// boundaries coincide, and the clock then cannot keep events strictly
    /// ordered.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.cycle_duration.is_zero() {
            return Err(ConsensusError::InvalidCycleConfiguration(
                "cycle duration must be greater than zero".to_string(),
            ));
        }

        for name in PhaseName::ALL {
            let timing = self.timing(name);
            if timing.production_window.is_zero() {
                return Err(ConsensusError::InvalidCycleConfiguration(format!(
                    "{} production window must be greater than zero",
                    name
                )));
            }
            if timing.collection_window.is_zero() {
                return Err(ConsensusError::InvalidCycleConfiguration(format!(
                    "{} collection window must be greater than zero",
                    name
                )));
            }
        }

        for pair in PhaseName::ALL.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let end = self.timing(current).end();
            let next_offset = self.timing(next).offset;
            if end > next_offset {
                return Err(ConsensusError::InvalidCycleConfiguration(format!(
                    "{} ends at {:?} which overlaps {} starting at {:?}",
                    current, end, next, next_offset
                )));
            }
        }

        let last = PhaseName::Synchronisation;
        let end = self.timing(last).end();
        if end > self.cycle_duration {
            return Err(ConsensusError::InvalidCycleConfiguration(format!(
                "{} ends at {:?}, beyond the cycle duration {:?}",
                last, end, self.cycle_duration
            )));
        }

        Ok(())
    }

    /// All eight sub-phase boundaries of one cycle, in time order, as
    /// `(offset within cycle, phase, status)`.
    pub fn boundaries(&self) -> Vec<(Duration, PhaseName, PhaseStatus)> {
        let mut out = Vec::with_capacity(8);
        for name in PhaseName::ALL {
            let timing = self.timing(name);
            for status in PhaseStatus::ALL {
                out.push((timing.boundary(status), name, status));
            }
        }
        // Already ordered when valid; sort anyway so callers never depend on it.
        out.sort_by_key(|(offset, _, _)| *offset);
        out
    }
}

impl Default for CycleConfiguration {
    /// 20 s cycle, phases every 5 s, 2 s production + 2 s collection each.
    fn default() -> Self {
        let window = Duration::from_secs(2);
        Self {
            cycle_duration: Duration::from_secs(20),
            phases: [
                PhaseTiming::new(Duration::from_secs(0), window, window),
                PhaseTiming::new(Duration::from_secs(5), window, window),
                PhaseTiming::new(Duration::from_secs(10), window, window),
                PhaseTiming::new(Duration::from_secs(15), window, window),
            ],
        }
    }
}

/// On-disk (TOML) shape of a phase timing, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PhaseTimingToml {
    offset_ms: u64,
    production_window_ms: u64,
    collection_window_ms: u64,
}

/// On-disk (TOML) shape of the cycle configuration, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CycleConfigurationToml {
    cycle_duration_ms: u64,
    construction: PhaseTimingToml,
    campaigning: PhaseTimingToml,
    voting: PhaseTimingToml,
    synchronisation: PhaseTimingToml,
}

impl From<PhaseTimingToml> for PhaseTiming {
    fn from(t: PhaseTimingToml) -> Self {
        PhaseTiming::new(
            Duration::from_millis(t.offset_ms),
            Duration::from_millis(t.production_window_ms),
            Duration::from_millis(t.collection_window_ms),
        )
    }
}

impl From<PhaseTiming> for PhaseTimingToml {
    fn from(t: PhaseTiming) -> Self {
        PhaseTimingToml {
            offset_ms: t.offset.as_millis() as u64,
            production_window_ms: t.production_window.as_millis() as u64,
            collection_window_ms: t.collection_window.as_millis() as u64,
        }
    }
}

impl TryFrom<CycleConfigurationToml> for CycleConfiguration {
    type Error = ConsensusError;

    fn try_from(raw: CycleConfigurationToml) -> Result<Self, Self::Error> {
        CycleConfiguration::new(
            Duration::from_millis(raw.cycle_duration_ms),
            [
                raw.construction.into(),
                raw.campaigning.into(),
                raw.voting.into(),
                raw.synchronisation.into(),
            ],
        )
    }
}

impl From<CycleConfiguration> for CycleConfigurationToml {
    fn from(c: CycleConfiguration) -> Self {
        let [construction, campaigning, voting, synchronisation] = c.phases;
        CycleConfigurationToml {
            cycle_duration_ms: c.cycle_duration.as_millis() as u64,
            construction: construction.into(),
            campaigning: campaigning.into(),
            voting: voting.into(),
            synchronisation: synchronisation.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_default_is_valid() {
        assert!(CycleConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_uniform_layout() {
        let config = CycleConfiguration::uniform(ms(1000), ms(100), ms(100)).unwrap();
        assert_eq!(config.timing(PhaseName::Voting).offset, ms(500));
        assert_eq!(config.timing(PhaseName::Synchronisation).end(), ms(950));
    }

    #[test]
    fn test_overlapping_phases_rejected() {
        let phases = [
            PhaseTiming::new(ms(0), ms(300), ms(300)),
            PhaseTiming::new(ms(500), ms(100), ms(100)),
            PhaseTiming::new(ms(700), ms(100), ms(100)),
            PhaseTiming::new(ms(900), ms(50), ms(50)),
        ];
        let err = CycleConfiguration::new(ms(1000), phases).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidCycleConfiguration(_)));
        assert!(err.to_string().contains("Construction"));
    }

    #[test]
    fn test_phase_beyond_cycle_rejected() {
        let phases = [
            PhaseTiming::new(ms(0), ms(100), ms(100)),
            PhaseTiming::new(ms(250), ms(100), ms(100)),
            PhaseTiming::new(ms(500), ms(100), ms(100)),
            PhaseTiming::new(ms(900), ms(100), ms(100)),
        ];
        assert!(CycleConfiguration::new(ms(1000), phases).is_err());
    }

    #[test]
    fn test_zero_windows_rejected() {
        assert!(CycleConfiguration::uniform(ms(1000), ms(0), ms(100)).is_err());
        assert!(CycleConfiguration::uniform(ms(1000), ms(100), ms(0)).is_err());
        assert!(CycleConfiguration::uniform(ms(0), ms(0), ms(0)).is_err());
    }

    #[test]
    fn test_boundaries_are_strictly_increasing() {
        let config = CycleConfiguration::default();
        let boundaries = config.boundaries();
        assert_eq!(boundaries.len(), 8);
        assert_eq!(boundaries[0].1, PhaseName::Construction);
        assert_eq!(boundaries[0].2, PhaseStatus::Producing);
        assert!(boundaries.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_toml_roundtrip_and_validation() {
        let text = r#"
            cycle_duration_ms = 8000
            construction = { offset_ms = 0, production_window_ms = 1000, collection_window_ms = 500 }
            campaigning = { offset_ms = 2000, production_window_ms = 1000, collection_window_ms = 500 }
            voting = { offset_ms = 4000, production_window_ms = 1000, collection_window_ms = 500 }
            synchronisation = { offset_ms = 6000, production_window_ms = 1000, collection_window_ms = 500 }
        "#;
        let config: CycleConfiguration = toml::from_str(text).unwrap();
        assert_eq!(config.cycle_duration, ms(8000));
        assert_eq!(config.timing(PhaseName::Campaigning).offset, ms(2000));

        let invalid = text.replace("offset_ms = 2000", "offset_ms = 1000");
        assert!(toml::from_str::<CycleConfiguration>(&invalid).is_err());
    }
}
