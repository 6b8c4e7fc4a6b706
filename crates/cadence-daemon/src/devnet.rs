// crates/cadence-daemon/src/devnet.rs
//
// Devnet: several consensus engines in one process.
//
// Each node gets its own mempool, payload cache and loopback hub, shares the
// producer set and cycle layout, and runs three background tasks:
//   - the engine's inbound loop, draining its queue on the loopback network
//   - a chain follower that clears published transactions from the mempool
//   - a reputation logger
// A single generator feeds synthetic transactions to random nodes.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;

use cadence_consensus::chain::ChainAdvance;
use cadence_consensus::{
    Collaborators, ConsensusEngine, ReputationEvent, ReputationSink,
};
use cadence_core::crypto::Keypair;
use cadence_core::{Hash, ProducerId, ProducerSetProvider, StaticProducerSet};

use crate::cache::MemoryDeltaCache;
use crate::config::DaemonConfig;
use crate::hub::{LoopbackHub, LoopbackNetwork};
use crate::keys;
use crate::mempool::{self, Mempool, MempoolDeltaBuilder};

/// Genesis head shared by every devnet node.
pub fn devnet_genesis() -> Hash {
    Hash::digest(b"cadence-devnet-genesis")
}

/// One in-process node.
pub struct DevnetNode {
    pub engine: Arc<ConsensusEngine>,
    pub mempool: Arc<Mempool>,
}

/// A running devnet.
pub struct Devnet {
    nodes: Vec<DevnetNode>,
    network: Arc<LoopbackNetwork>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Devnet {
    /// Build one node per key and start every engine.
    pub fn launch(config: &DaemonConfig, keypairs: &[Keypair]) -> Result<Self, Box<dyn std::error::Error>> {
        let node_ids: Vec<ProducerId> = keypairs.iter().map(Keypair::producer_id).collect();
        let producers = keys::parse_producers(&config.producers)?.unwrap_or_else(|| node_ids.clone());
        let producer_set = Arc::new(StaticProducerSet::new(producers));

        let network = Arc::new(LoopbackNetwork::new());
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut nodes = Vec::with_capacity(node_ids.len());

        for id in &node_ids {
            let mempool = Arc::new(Mempool::new());
            let cache = Arc::new(MemoryDeltaCache::new());
            let collaborators = Collaborators {
                builder: Arc::new(MempoolDeltaBuilder::new(*id, mempool.clone(), cache.clone())),
                hub: Arc::new(LoopbackHub::new(*id, network.clone(), cache.clone())),
                cache: cache.clone(),
            };
            let (reputation, reputation_rx) = ReputationSink::channel();

            let engine = Arc::new(
                ConsensusEngine::builder(
                    *id,
                    config.cycle.clone(),
                    devnet_genesis(),
                    producer_set.clone(),
                    collaborators,
                )
                .with_reputation(reputation)
                .with_history_capacity(config.history_capacity)
                .build()?,
            );

            let inbound = network.join(*id);
            let advances = engine.chain().subscribe();

            tasks.spawn(engine.clone().run_inbound(inbound));
            tasks.spawn(follow_chain(
                *id,
                advances,
                mempool.clone(),
                cache.clone(),
                shutdown.subscribe(),
            ));
            tasks.spawn(log_reputation(*id, reputation_rx, shutdown.subscribe()));

            nodes.push(DevnetNode { engine, mempool });
        }

        for node in &nodes {
            node.engine.start()?;
        }

        let mempools = nodes.iter().map(|n| n.mempool.clone()).collect();
        tasks.spawn(mempool::run_tx_generator(
            mempools,
            config.tx_interval(),
            shutdown.subscribe(),
        ));

        tracing::info!(
            "Devnet running: {} nodes, {} producers",
            nodes.len(),
            producer_set.producers().len()
        );

        Ok(Self {
            nodes,
            network,
            shutdown,
            tasks,
        })
    }

    pub fn nodes(&self) -> &[DevnetNode] {
        &self.nodes
    }

    pub fn peer_count(&self) -> usize {
        self.network.len()
    }

    /// Stop every engine, then wait for the background tasks.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        for node in &self.nodes {
            node.engine.stop().await;
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Devnet task ended abnormally: {}", e);
            }
        }
        tracing::info!("Devnet stopped");
    }
}

/// Clear published transactions from this node's mempool and prune its cache.
async fn follow_chain(
    id: ProducerId,
    mut advances: broadcast::Receiver<ChainAdvance>,
    mempool: Arc<Mempool>,
    cache: Arc<MemoryDeltaCache>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let advance = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            received = advances.recv() => match received {
                Ok(advance) => advance,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Node {} missed {} chain advances", id.short(), n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Some((payload_hash, bytes)) = cache.published_payload(advance.previous_hash, advance.new_hash) {
            match mempool::decode_payload(&bytes) {
                Ok(txs) => {
                    let removed = mempool.remove_included(&txs);
                    tracing::info!(
                        "Node {}: delta {} published, {} transactions confirmed, {} pending",
                        id.short(),
                        payload_hash.short(),
                        removed,
                        mempool.len()
                    );
                }
                Err(e) => tracing::error!(
                    "Node {}: undecodable payload {}: {}",
                    id.short(),
                    payload_hash.short(),
                    e
                ),
            }
        }
        cache.prune(advance.new_hash);
    }
}

async fn log_reputation(
    id: ProducerId,
    mut events: mpsc::UnboundedReceiver<ReputationEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => tracing::warn!(
                    "Node {}: {:?} by {} after {}",
                    id.short(),
                    event.kind,
                    event.peer.short(),
                    event.previous_hash.short()
                ),
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_consensus::CycleConfiguration;
    use std::time::Duration;

    fn fast_config(nodes: usize) -> DaemonConfig {
        DaemonConfig {
            cycle: CycleConfiguration::uniform(
                Duration::from_millis(400),
                Duration::from_millis(40),
                Duration::from_millis(40),
            )
            .unwrap(),
            devnet_nodes: nodes,
            tx_interval_ms: 10,
            ..DaemonConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_devnet_advances_chain() {
        let config = fast_config(3);
        let keypairs: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let devnet = Devnet::launch(&config, &keypairs).unwrap();
        assert_eq!(devnet.peer_count(), 3);

        let mut advances = devnet.nodes()[0].engine.chain().subscribe();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(10), advances.recv())
                .await
                .unwrap()
                .unwrap();
        }

        let head = devnet.nodes()[0].engine.chain().latest();
        assert_ne!(head, devnet_genesis());
        devnet.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_producer_key_is_rejected() {
        let config = DaemonConfig {
            producers: vec!["zz".to_string()],
            ..fast_config(1)
        };
        let keypairs = vec![Keypair::generate()];
        assert!(Devnet::launch(&config, &keypairs).is_err());
    }
}
