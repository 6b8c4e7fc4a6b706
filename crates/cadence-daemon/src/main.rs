// crates/cadence-daemon/src/main.rs
//
// Binary entrypoint for the Cadence devnet daemon.
//
// Parses CLI arguments, loads configuration, initializes tracing, loads or
// generates producer keys, and runs an in-process devnet of consensus
// engines until Ctrl-C.

mod cache;
mod config;
mod devnet;
mod hub;
mod keys;
mod mempool;

use clap::Parser;
use config::DaemonConfig;
use devnet::Devnet;

/// Cadence daemon: runs a local devnet of delta-consensus nodes.
#[derive(Parser, Debug)]
#[command(name = "cadence-daemon", version = "0.1.0", about = "Cadence delta-consensus devnet")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.cadence/config.toml")]
    config: String,

    /// Number of in-process nodes (overrides the config file).
    #[arg(long)]
    devnet_nodes: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = expand_tilde(&args.config);

    // Load before initializing tracing so the configured level applies; the
    // outcome is logged once the subscriber is up.
    let loaded = DaemonConfig::load_if_present(&config_path);
    let log_level = match &loaded {
        Ok(Some(cfg)) => cfg.log_level.clone(),
        _ => DaemonConfig::default().log_level,
    };

    // Initialize tracing subscriber for structured logging. RUST_LOG wins
    // over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    let mut daemon_config = match loaded {
        Ok(Some(cfg)) => {
            tracing::info!("Loaded configuration from {}", config_path);
            cfg
        }
        Ok(None) => {
            tracing::warn!("No config file at {}. Using defaults.", config_path);
            DaemonConfig::default()
        }
        Err(e) => {
            tracing::error!("Invalid configuration in {}: {}", config_path, e);
            return Err(e);
        }
    };

    // CLI --devnet-nodes flag overrides the config file value.
    if let Some(n) = args.devnet_nodes {
        if n == 0 {
            tracing::error!("--devnet-nodes must be at least 1");
            return Err("--devnet-nodes must be at least 1".into());
        }
        daemon_config.devnet_nodes = n;
    }

    tracing::info!("Cadence Daemon v0.1.0");
    tracing::info!("Devnet nodes: {}", daemon_config.devnet_nodes);
    tracing::info!(
        "Cycle: {:?} ({} producers configured)",
        daemon_config.cycle.cycle_duration,
        if daemon_config.producers.is_empty() {
            "all nodes".to_string()
        } else {
            daemon_config.producers.len().to_string()
        }
    );

    let key_path = expand_tilde(&daemon_config.key_path);
    let keypairs = keys::load_or_generate(&key_path, daemon_config.devnet_nodes)?;
    for (i, key) in keypairs.iter().enumerate() {
        tracing::info!("Node {}: producer {}", i, key.producer_id());
    }

    let devnet = Devnet::launch(&daemon_config, &keypairs)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    } else {
        tracing::info!("Received shutdown signal");
    }

    devnet.shutdown().await;
    tracing::info!("Cadence daemon shut down gracefully");

    Ok(())
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}
