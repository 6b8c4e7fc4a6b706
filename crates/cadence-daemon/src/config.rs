// crates/cadence-daemon/src/config.rs
//
// Runtime configuration for the Cadence daemon.
// Loaded from a TOML file. Defaults apply only when the file does not exist;
// a file that fails to parse or validate stops startup.

use serde::Deserialize;
use std::fs;
use std::io;
use std::time::Duration;

use cadence_consensus::chain::DEFAULT_HISTORY_CAPACITY;
use cadence_consensus::CycleConfiguration;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// File holding one hex-encoded ed25519 secret per line, one per devnet
    /// node. Missing or short files are topped up with fresh keys.
    #[serde(default = "default_key_path")]
    pub key_path: String,

    /// Hex-encoded public keys of the producer set. When empty, every devnet
    /// node is a producer.
    #[serde(default)]
    pub producers: Vec<String>,

    /// Phase layout of a cycle.
    #[serde(default)]
    pub cycle: CycleConfiguration,

    /// Number of in-process nodes to run.
    #[serde(default = "default_devnet_nodes")]
    pub devnet_nodes: usize,

    /// Interval between synthetic transactions, in milliseconds.
    #[serde(default = "default_tx_interval_ms")]
    pub tx_interval_ms: u64,

    /// Number of chain heads each node remembers.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_key_path() -> String {
    "~/.cadence/devnet_keys".to_string()
}

fn default_devnet_nodes() -> usize {
    4
}

fn default_tx_interval_ms() -> u64 {
    500
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            key_path: default_key_path(),
            producers: Vec::new(),
            cycle: CycleConfiguration::default(),
            devnet_nodes: default_devnet_nodes(),
            tx_interval_ms: default_tx_interval_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, or `None` when no file exists there.
    ///
    /// Any other read error, and any parse or validation error, is returned.
    pub fn load_if_present(path: &str) -> Result<Option<Self>, Box<dyn std::error::Error>> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: DaemonConfig = toml::from_str(contents)?;
        if config.devnet_nodes == 0 {
            return Err("devnet_nodes must be at least 1".into());
        }
        Ok(config)
    }

    pub fn tx_interval(&self) -> Duration {
        Duration::from_millis(self.tx_interval_ms.max(1))
    }
}
