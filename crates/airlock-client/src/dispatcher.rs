//! Batch construction and bounded-parallel delivery.

use airlock_core::{BufferPool, DeliveryCounters, Record};
use bytes::BufMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::cluster::ClusterProvider;
use crate::transport::Transport;

/// A bounded group of records drained for one dispatch attempt.
///
/// Immutable once handed to a send; the producing side never touches it
/// again.
#[derive(Default)]
pub(crate) struct Batch {
    records: Vec<Record>,
    bytes: usize,
}

impl Batch {
    fn push(&mut self, record: Record) {
        self.bytes += record.len();
        self.records.push(record);
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Aggregate result of one flush round.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RoundOutcome {
    pub(crate) batches_sent: usize,
    pub(crate) batches_failed: usize,
}

/// Pack a drained round into chains of batches.
///
/// Each inner `Vec<Batch>` is a chain whose batches must go out in order;
/// distinct chains are independent. Whole key groups share a batch while
/// they fit under `max_batch_size`; a key whose records alone exceed the
/// cap becomes its own chain, split at the cap, so same-key order is
/// preserved within and across the batches of the round. Keys never span
/// two batches of different chains.
pub(crate) fn pack_round(
    drained: Vec<(String, Vec<Record>)>,
    max_batch_size: usize,
) -> Vec<Vec<Batch>> {
    let mut chains = Vec::new();
    let mut shared = Batch::default();

    for (_, records) in drained {
        let group_bytes: usize = records.iter().map(|r| r.len()).sum();

        if group_bytes <= max_batch_size {
            if !shared.is_empty() && shared.bytes + group_bytes > max_batch_size {
                chains.push(vec![std::mem::take(&mut shared)]);
            }
            for record in records {
                shared.push(record);
            }
        } else {
            let mut chain = Vec::new();
            let mut batch = Batch::default();
            for record in records {
                if !batch.is_empty() && batch.bytes + record.len() > max_batch_size {
                    chain.push(std::mem::take(&mut batch));
                }
                batch.push(record);
            }
            if !batch.is_empty() {
                chain.push(batch);
            }
            chains.push(chain);
        }
    }

    if !shared.is_empty() {
        chains.push(vec![shared]);
    }
    chains
}

/// Sends batches to the cluster under a concurrency bound.
pub(crate) struct Dispatcher {
    pool: Arc<BufferPool>,
    transport: Arc<dyn Transport>,
    provider: Arc<dyn ClusterProvider>,
    counters: Arc<DeliveryCounters>,
    permits: Semaphore,
    cursor: AtomicUsize,
    api_key: String,
    request_timeout: Duration,
    max_batch_size: usize,
    enable_tracing: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pool: Arc<BufferPool>,
        transport: Arc<dyn Transport>,
        provider: Arc<dyn ClusterProvider>,
        counters: Arc<DeliveryCounters>,
        parallelism: usize,
        api_key: String,
        request_timeout: Duration,
        max_batch_size: usize,
        enable_tracing: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            transport,
            provider,
            counters,
            permits: Semaphore::new(parallelism),
            cursor: AtomicUsize::new(0),
            api_key,
            request_timeout,
            max_batch_size,
            enable_tracing,
        })
    }

    /// Dispatch one drained round.
    ///
    /// Chains run concurrently, individual sends bounded by the
    /// parallelism permits; batches within a chain go out sequentially.
    /// Returns once every batch of the round has a terminal outcome.
    pub(crate) async fn dispatch_round(
        self: Arc<Self>,
        drained: Vec<(String, Vec<Record>)>,
    ) -> RoundOutcome {
        let chains = pack_round(drained, self.max_batch_size);

        let mut tasks = JoinSet::new();
        for chain in chains {
            let dispatcher = Arc::clone(&self);
            tasks.spawn(async move { dispatcher.send_chain(chain).await });
        }

        let mut outcome = RoundOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(chain_outcome) => {
                    outcome.batches_sent += chain_outcome.batches_sent;
                    outcome.batches_failed += chain_outcome.batches_failed;
                }
                Err(e) => {
                    warn!(error = %e, "dispatch task failed to complete");
                    outcome.batches_failed += 1;
                }
            }
        }
        outcome
    }

    async fn send_chain(&self, chain: Vec<Batch>) -> RoundOutcome {
        let mut outcome = RoundOutcome::default();
        for batch in chain {
            let Ok(_permit) = self.permits.acquire().await else {
                // Semaphore is never closed; fail the batch if it ever is.
                self.counters.add_lost(batch.record_count() as u64);
                outcome.batches_failed += 1;
                continue;
            };
            if self.send_batch(batch).await {
                outcome.batches_sent += 1;
            } else {
                outcome.batches_failed += 1;
            }
        }
        outcome
    }

    /// Send one batch; true on endpoint acknowledgement.
    ///
    /// Every path gives the batch's records a terminal outcome and returns
    /// their buffers (and the body buffer) to the arena.
    async fn send_batch(&self, batch: Batch) -> bool {
        let count = batch.record_count() as u64;
        let bytes = batch.bytes();

        let Some(mut body) = self.pool.acquire_reserved(bytes) else {
            self.counters.add_lost(count);
            warn!(
                records = count,
                bytes, "batch dropped: memory ceiling reached while assembling body"
            );
            return false;
        };
        for record in batch.records {
            body.put_slice(record.as_bytes());
            // Record drops here, returning its buffer before the send.
        }

        let Some(endpoint) = self.next_endpoint() else {
            self.counters.add_lost(count);
            warn!(records = count, "batch dropped: no endpoints available");
            return false;
        };

        let result = self
            .transport
            .send(&endpoint, &self.api_key, body.as_ref(), self.request_timeout)
            .await;

        match result {
            Ok(()) => {
                self.counters.add_sent(count);
                if self.enable_tracing {
                    debug!(records = count, bytes, endpoint = %endpoint, "batch delivered");
                }
                true
            }
            Err(e) => {
                // Terminal for these records: no requeue, by contract.
                self.counters.add_lost(count);
                warn!(records = count, endpoint = %endpoint, error = %e, "batch delivery failed");
                false
            }
        }
    }

    fn next_endpoint(&self) -> Option<Url> {
        let endpoints = self.provider.endpoints();
        if endpoints.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        Some(endpoints[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_core::{serialize_record, BufferPoolConfig};
    use chrono::{TimeZone, Utc};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Event {
        n: u32,
    }

    fn pool() -> Arc<BufferPool> {
        BufferPool::new(BufferPoolConfig {
            initial_buffer_size: 4096,
            initial_buffers_count: 4,
            memory_ceiling: 64 * 1024 * 1024,
            dispatch_reserve: 0,
        })
    }

    fn records(pool: &Arc<BufferPool>, key: &str, count: u32) -> Vec<Record> {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
        (0..count)
            .map(|n| serialize_record(pool, key, ts, &Event { n }, 1024).unwrap())
            .collect()
    }

    #[test]
    fn small_key_groups_share_a_batch() {
        let pool = pool();
        let drained = vec![
            ("alpha".to_string(), records(&pool, "alpha", 3)),
            ("beta".to_string(), records(&pool, "beta", 3)),
        ];

        let chains = pack_round(drained, 1024 * 1024);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].len(), 1);
        assert_eq!(chains[0][0].record_count(), 6);
    }

    #[test]
    fn oversized_key_splits_into_ordered_chain() {
        let pool = pool();
        let recs = records(&pool, "big", 10);
        let record_len = recs[0].len();
        let drained = vec![("big".to_string(), recs)];

        // Three records per batch.
        let chains = pack_round(drained, record_len * 3);
        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert_eq!(chain.len(), 4);
        assert_eq!(
            chain.iter().map(Batch::record_count).sum::<usize>(),
            10
        );
        for batch in chain {
            assert!(batch.bytes() <= record_len * 3);
        }
    }

    #[test]
    fn batch_cap_respected_across_mixed_groups() {
        let pool = pool();
        let recs_a = records(&pool, "a", 4);
        let record_len = recs_a[0].len();
        let drained = vec![
            ("a".to_string(), recs_a),
            ("b".to_string(), records(&pool, "b", 4)),
        ];

        // Each group fits alone but not together.
        let chains = pack_round(drained, record_len * 5);
        assert_eq!(chains.len(), 2);
        for chain in &chains {
            assert_eq!(chain.len(), 1);
            assert_eq!(chain[0].record_count(), 4);
        }
    }

    #[test]
    fn per_key_order_survives_packing() {
        let pool = pool();
        let recs = records(&pool, "ordered", 9);
        let record_len = recs[0].len();
        let drained = vec![("ordered".to_string(), recs)];

        let chains = pack_round(drained, record_len * 2);
        let mut seen = Vec::new();
        for batch in &chains[0] {
            for record in &batch.records {
                let decoded = airlock_core::decode_records(record.as_bytes()).unwrap();
                seen.push(decoded[0].clone());
            }
        }
        assert_eq!(seen.len(), 9);
        for (i, decoded) in seen.iter().enumerate() {
            let event: u32 = bincode::deserialize(&decoded.payload).unwrap();
            assert_eq!(event as usize, i);
        }
    }
}
