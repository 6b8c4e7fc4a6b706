// crates/cadence-daemon/src/hub.rs
//
// Loopback DeltaHub: in-process fan-out between devnet nodes.
//
// Every node joins the LoopbackNetwork and gets an inbound queue. Broadcasts
// are pushed to every other node's queue, one spawned task per peer, so a
// slow peer never blocks the sender. Single hop; nodes do not re-broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use cadence_core::{
    CadenceError, CandidateDelta, DeltaHub, FavouriteVote, Hash, InboundMessage, ProducerId,
};

use crate::cache::MemoryDeltaCache;

/// Inbound queue depth per node.
pub const INBOUND_QUEUE: usize = 1024;

/// The chain head produced by publishing `payload_hash` after `previous_hash`.
pub fn published_head(previous_hash: Hash, payload_hash: Hash) -> Hash {
    Hash::digest_parts(&[previous_hash.as_bytes(), payload_hash.as_bytes()])
}

/// Registry of every node's inbound queue.
#[derive(Default)]
pub struct LoopbackNetwork {
    peers: RwLock<Vec<(ProducerId, mpsc::Sender<InboundMessage>)>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the queue its messages arrive on.
    pub fn join(&self, id: ProducerId) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        self.peers.write().push((id, tx));
        rx
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Push `message` to every node except `from`.
    fn fan_out(&self, from: ProducerId, message: InboundMessage) {
        let targets: Vec<(ProducerId, mpsc::Sender<InboundMessage>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| *id != from)
            .cloned()
            .collect();

        for (peer, tx) in targets {
            let message = message.clone();
            tokio::spawn(async move {
                if tx.send(message).await.is_err() {
                    tracing::debug!("Peer {} is gone; dropping message", peer.short());
                }
            });
        }
    }
}

/// One node's handle on the loopback network.
pub struct LoopbackHub {
    local_id: ProducerId,
    network: Arc<LoopbackNetwork>,
    cache: Arc<MemoryDeltaCache>,
}

impl LoopbackHub {
    pub fn new(local_id: ProducerId, network: Arc<LoopbackNetwork>, cache: Arc<MemoryDeltaCache>) -> Self {
        Self {
            local_id,
            network,
            cache,
        }
    }
}

#[async_trait]
impl DeltaHub for LoopbackHub {
    async fn broadcast_candidate(&self, candidate: &CandidateDelta) -> Result<(), CadenceError> {
        self.network
            .fan_out(self.local_id, InboundMessage::Candidate(candidate.clone()));
        Ok(())
    }

    async fn broadcast_favourite(
        &self,
        voter_id: ProducerId,
        previous_hash: Hash,
        payload_hash: Hash,
    ) -> Result<(), CadenceError> {
        let vote = FavouriteVote {
            previous_hash,
            voter_id,
            favoured_payload_hash: payload_hash,
        };
        self.network
            .fan_out(self.local_id, InboundMessage::Favourite(vote));
        Ok(())
    }

    async fn publish_winner(
        &self,
        previous_hash: Hash,
        payload_hash: Hash,
    ) -> Result<Hash, CadenceError> {
        if self.cache.payload(previous_hash, payload_hash).is_none() {
            return Err(CadenceError::Publish(format!(
                "payload {} is not held locally",
                payload_hash.short()
            )));
        }

        let new_hash = published_head(previous_hash, payload_hash);
        self.network.fan_out(
            self.local_id,
            InboundMessage::DeltaPublished {
                previous_hash,
                new_hash,
            },
        );
        Ok(new_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_every_other_node() {
        let network = Arc::new(LoopbackNetwork::new());
        let ids: Vec<ProducerId> = (1..=3u8).map(|i| ProducerId([i; 32])).collect();
        let mut queues: Vec<_> = ids.iter().map(|id| network.join(*id)).collect();
        let hub = LoopbackHub::new(ids[0], network.clone(), Arc::new(MemoryDeltaCache::new()));

        let candidate = CandidateDelta::new(Hash::digest(b"h0"), ids[0], Hash::digest(b"p"));
        hub.broadcast_candidate(&candidate).await.unwrap();

        for queue in queues.iter_mut().skip(1) {
            assert_eq!(
                queue.recv().await.unwrap(),
                InboundMessage::Candidate(candidate.clone())
            );
        }
        tokio::task::yield_now().await;
        assert!(queues[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_requires_held_payload() {
        let network = Arc::new(LoopbackNetwork::new());
        let me = ProducerId([1u8; 32]);
        let peer = ProducerId([2u8; 32]);
        network.join(me);
        let mut peer_rx = network.join(peer);
        let cache = Arc::new(MemoryDeltaCache::new());
        let hub = LoopbackHub::new(me, network, cache.clone());

        let h0 = Hash::digest(b"h0");
        let p = Hash::digest(b"p");
        assert!(matches!(
            hub.publish_winner(h0, p).await,
            Err(CadenceError::Publish(_))
        ));

        cache.insert(h0, p, b"p".to_vec());
        let head = hub.publish_winner(h0, p).await.unwrap();
        assert_eq!(head, published_head(h0, p));
        assert_eq!(
            peer_rx.recv().await.unwrap(),
            InboundMessage::DeltaPublished {
                previous_hash: h0,
                new_hash: head
            }
        );
    }
}
