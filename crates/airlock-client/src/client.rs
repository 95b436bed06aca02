//! The client façade.

use airlock_core::{serialize_record, BufferPool, BufferPoolConfig, DeliveryCounters};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::AirlockConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::partition::PartitionStore;
use crate::scheduler::run_flush_loop;
use crate::transport::{HttpTransport, Transport};

const STATE_RUNNING: u8 = 0;
const STATE_DISPOSING: u8 = 1;
const STATE_DISPOSED: u8 = 2;

/// State shared between the façade, the flush loop, and in-flight sends.
pub(crate) struct ClientShared {
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) store: PartitionStore,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) counters: Arc<DeliveryCounters>,
    pub(crate) state: AtomicU8,
    pub(crate) max_record_size: usize,
    pub(crate) send_period: Duration,
    pub(crate) send_period_cap: Duration,
    pub(crate) enable_tracing: bool,
    pub(crate) enable_metrics: bool,
}

/// Fire-and-forget telemetry-shipping client.
///
/// `push` serializes on the caller's thread, appends to the routing key's
/// partition, and returns. It never blocks on network I/O and never
/// fails outward: every problem (oversize record, memory ceiling, closed
/// client, terminal send failure) resolves to a dropped record and a
/// lost-counter increment. A background flush loop drains partitions on a
/// backoff-capped period and ships batches with bounded parallelism.
///
/// Must be constructed inside a Tokio runtime. Call [`close`](Self::close)
/// to stop intake and flush everything still buffered; dropping an unclosed
/// client triggers a best-effort background flush instead.
pub struct AirlockClient {
    shared: Arc<ClientShared>,
    shutdown_tx: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl AirlockClient {
    /// Create a client shipping over HTTP.
    pub fn new(config: AirlockConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: AirlockConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::build(config, transport, None)
    }

    pub(crate) fn build(
        config: AirlockConfig,
        transport: Arc<dyn Transport>,
        parallelism_override: Option<usize>,
    ) -> Result<Self> {
        let parallelism = parallelism_override.unwrap_or(config.parallelism);
        validate(&config, parallelism)?;

        let pool = BufferPool::new(BufferPoolConfig {
            initial_buffer_size: config.initial_pooled_buffer_size,
            initial_buffers_count: config.initial_pooled_buffers_count,
            memory_ceiling: config.max_memory_consumption,
            dispatch_reserve: config.max_batch_size,
        });
        let counters = Arc::new(DeliveryCounters::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&pool),
            transport,
            Arc::clone(&config.cluster_provider),
            Arc::clone(&counters),
            parallelism,
            config.api_key.clone(),
            config.request_timeout,
            config.max_batch_size,
            config.enable_tracing,
        );

        let shared = Arc::new(ClientShared {
            store: PartitionStore::new(config.max_memory_consumption),
            pool,
            dispatcher,
            counters,
            state: AtomicU8::new(STATE_RUNNING),
            max_record_size: config.max_record_size,
            send_period: config.send_period,
            send_period_cap: config.send_period_cap,
            enable_tracing: config.enable_tracing,
            enable_metrics: config.enable_metrics,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_task = tokio::spawn(run_flush_loop(Arc::clone(&shared), shutdown_rx));

        debug!(parallelism, "airlock client started");
        Ok(Self {
            shared,
            shutdown_tx,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }

    /// Push one event under a routing key.
    ///
    /// `timestamp_of` extracts the event's own timestamp; use
    /// [`push_now`](Self::push_now) for wall-clock stamping. Valid only
    /// while the client is running; after [`close`](Self::close) has begun
    /// the event is rejected and counted as lost.
    pub fn push<T, F>(&self, routing_key: &str, event: &T, timestamp_of: F)
    where
        T: Serialize,
        F: FnOnce(&T) -> DateTime<Utc>,
    {
        if self.shared.state.load(Ordering::Acquire) != STATE_RUNNING {
            self.shared.counters.add_lost(1);
            if self.shared.enable_tracing {
                trace!(routing_key, "push rejected: client closed");
            }
            return;
        }

        let timestamp = timestamp_of(event);
        let record = match serialize_record(
            &self.shared.pool,
            routing_key,
            timestamp,
            event,
            self.shared.max_record_size,
        ) {
            Ok(record) => record,
            Err(e) => {
                self.shared.counters.add_lost(1);
                if self.shared.enable_tracing {
                    trace!(routing_key, error = %e, "event dropped at serialization");
                }
                return;
            }
        };

        if let Err(e) = self.shared.store.append(routing_key, record) {
            self.shared.counters.add_lost(1);
            if self.shared.enable_tracing {
                trace!(routing_key, error = %e, "event dropped at partition append");
            }
        }
    }

    /// Push one event stamped with the current wall clock.
    pub fn push_now<T: Serialize>(&self, routing_key: &str, event: &T) {
        self.push(routing_key, event, |_| Utc::now());
    }

    /// Delivery counters. Readable at any point in the lifecycle.
    pub fn counters(&self) -> &DeliveryCounters {
        &self.shared.counters
    }

    /// Stop intake, run one final flush-and-wait, release resources.
    ///
    /// Idempotent: the second and later calls are no-ops. In-flight sends
    /// of the final round complete bounded by the request timeout.
    pub async fn close(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_DISPOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                // Failing to drain never prevents completing disposal.
                warn!(error = %e, "flush loop did not shut down cleanly");
            }
        }

        self.shared.state.store(STATE_DISPOSED, Ordering::Release);
        debug!(
            sent_items = self.shared.counters.sent_items(),
            lost_items = self.shared.counters.lost_items(),
            "airlock client disposed"
        );
    }
}

impl Drop for AirlockClient {
    fn drop(&mut self) {
        if self.shared.state.load(Ordering::Acquire) == STATE_RUNNING {
            // Not closed: stop intake and let the flush loop finish in the
            // background with whatever is still buffered.
            self.shared.state.store(STATE_DISPOSING, Ordering::Release);
            let _ = self.shutdown_tx.send(true);
        }
    }
}

fn validate(config: &AirlockConfig, parallelism: usize) -> Result<()> {
    if config.cluster_provider.endpoints().is_empty() {
        return Err(Error::Config(
            "cluster provider returned no endpoints".into(),
        ));
    }
    if config.api_key.is_empty() {
        return Err(Error::Config("api key must not be empty".into()));
    }
    if parallelism == 0 {
        return Err(Error::Config("parallelism must be at least 1".into()));
    }
    if config.send_period.is_zero() {
        return Err(Error::Config("send period must be non-zero".into()));
    }
    if config.send_period_cap < config.send_period {
        return Err(Error::Config(
            "send period cap must not be below the send period".into(),
        ));
    }
    if config.request_timeout.is_zero() {
        return Err(Error::Config("request timeout must be non-zero".into()));
    }
    if config.max_record_size == 0 {
        return Err(Error::Config("maximum record size must be non-zero".into()));
    }
    if config.max_batch_size < config.max_record_size {
        return Err(Error::Config(
            "maximum batch size must hold at least one record".into(),
        ));
    }
    if config.max_memory_consumption < 2 * config.max_batch_size {
        return Err(Error::Config(
            "memory ceiling must be at least twice the maximum batch size".into(),
        ));
    }
    if config
        .initial_pooled_buffer_size
        .saturating_mul(config.initial_pooled_buffers_count)
        > config.max_memory_consumption
    {
        return Err(Error::Config(
            "pre-warmed pool would exceed the memory ceiling".into(),
        ));
    }
    Ok(())
}
