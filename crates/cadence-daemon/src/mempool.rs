// crates/cadence-daemon/src/mempool.rs
//
// Pending transactions and the devnet delta builder.
//
// A candidate delta's payload is the JSON list of pending transactions at
// build time. Transactions stay pending until a delta containing them is
// published, so a losing candidate's transactions are offered again next
// cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use cadence_core::{CadenceError, CandidateDelta, DeltaBuilder, Hash, ProducerId};

use crate::cache::MemoryDeltaCache;

/// Most transactions packed into one candidate.
pub const MAX_TXS_PER_DELTA: usize = 256;

/// A synthetic devnet transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub body: String,
}

/// Decode a delta payload back into its transactions.
pub fn decode_payload(bytes: &[u8]) -> Result<Vec<Transaction>, CadenceError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Transactions waiting to be included in a published delta, ordered by id.
#[derive(Debug, Default)]
pub struct Mempool {
    pending: Mutex<BTreeMap<u64, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, tx: Transaction) {
        self.pending.lock().insert(tx.id, tx);
    }

    /// Up to `limit` pending transactions, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<Transaction> {
        self.pending.lock().values().take(limit).cloned().collect()
    }

    /// Drop transactions that were published.
    pub fn remove_included(&self, txs: &[Transaction]) -> usize {
        let mut pending = self.pending.lock();
        txs.iter().filter(|tx| pending.remove(&tx.id).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Builds candidates from a node's mempool and keeps their payloads in the
/// node's cache.
pub struct MempoolDeltaBuilder {
    local_id: ProducerId,
    mempool: Arc<Mempool>,
    cache: Arc<MemoryDeltaCache>,
}

impl MempoolDeltaBuilder {
    pub fn new(local_id: ProducerId, mempool: Arc<Mempool>, cache: Arc<MemoryDeltaCache>) -> Self {
        Self {
            local_id,
            mempool,
            cache,
        }
    }
}

#[async_trait]
impl DeltaBuilder for MempoolDeltaBuilder {
    async fn build_candidate(&self, previous_hash: Hash) -> Result<CandidateDelta, CadenceError> {
        let txs = self.mempool.snapshot(MAX_TXS_PER_DELTA);
        if txs.is_empty() {
            return Err(CadenceError::NoPendingWork);
        }

        let payload = serde_json::to_vec(&txs)?;
        let payload_hash = Hash::digest(&payload);
        if !self.cache.insert(previous_hash, payload_hash, payload) {
            return Err(CadenceError::Cache(format!(
                "cannot hold payload for superseded head {}",
                previous_hash.short()
            )));
        }

        tracing::debug!(
            "Built candidate {} with {} transactions after {}",
            payload_hash.short(),
            txs.len(),
            previous_hash.short()
        );
        Ok(CandidateDelta::new(previous_hash, self.local_id, payload_hash))
    }
}

/// Submit a synthetic transaction to a random node every `interval` until
/// `shutdown` flips to true.
pub async fn run_tx_generator(
    mempools: Vec<Arc<Mempool>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if mempools.is_empty() {
        return;
    }
    tracing::info!(
        "Transaction generator started ({} nodes, every {:?})",
        mempools.len(),
        interval
    );

    let mut ticker = tokio::time::interval(interval);
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let (target, body) = {
                    let mut rng = rand::thread_rng();
                    let target = rng.gen_range(0..mempools.len());
                    let body = hex::encode(rng.gen::<[u8; 16]>());
                    (target, body)
                };
                next_id += 1;
                mempools[target].submit(Transaction {
                    id: next_id,
                    created_at: Utc::now(),
                    body,
                });
                tracing::trace!("Submitted tx {} to node {}", next_id, target);
            }
        }
    }

    tracing::info!("Transaction generator stopped after {} transactions", next_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: u64) -> Transaction {
        Transaction {
            id,
            created_at: Utc::now(),
            body: format!("tx-{}", id),
        }
    }

    #[tokio::test]
    async fn test_empty_mempool_has_no_work() {
        let builder = MempoolDeltaBuilder::new(
            ProducerId([1u8; 32]),
            Arc::new(Mempool::new()),
            Arc::new(MemoryDeltaCache::new()),
        );
        let err = builder.build_candidate(Hash::digest(b"h0")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_build_caches_payload() {
        let mempool = Arc::new(Mempool::new());
        let cache = Arc::new(MemoryDeltaCache::new());
        mempool.submit(tx(2));
        mempool.submit(tx(1));

        let builder = MempoolDeltaBuilder::new(ProducerId([1u8; 32]), mempool.clone(), cache.clone());
        let h0 = Hash::digest(b"h0");
        let candidate = builder.build_candidate(h0).await.unwrap();

        let bytes = cache.payload(h0, candidate.payload_hash).unwrap();
        let txs = decode_payload(&bytes).unwrap();
        assert_eq!(txs.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
        // Still pending until published.
        assert_eq!(mempool.len(), 2);
    }

    #[test]
    fn test_remove_included() {
        let mempool = Mempool::new();
        for i in 1..=5 {
            mempool.submit(tx(i));
        }
        let removed = mempool.remove_included(&[tx(2), tx(4), tx(9)]);
        assert_eq!(removed, 2);
        assert_eq!(mempool.len(), 3);
    }

    #[test]
    fn test_snapshot_is_bounded() {
        let mempool = Mempool::new();
        for i in 0..(MAX_TXS_PER_DELTA as u64 + 10) {
            mempool.submit(tx(i));
        }
        assert_eq!(mempool.snapshot(MAX_TXS_PER_DELTA).len(), MAX_TXS_PER_DELTA);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_feeds_mempools_until_shutdown() {
        let pools = vec![Arc::new(Mempool::new()), Arc::new(Mempool::new())];
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_tx_generator(pools.clone(), Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(105)).await;
        tx.send_replace(true);
        task.await.unwrap();

        let total: usize = pools.iter().map(|p| p.len()).sum();
        assert!(total >= 10);
    }
}
