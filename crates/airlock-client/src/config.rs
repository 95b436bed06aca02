//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cluster::ClusterProvider;

/// Configuration for an Airlock client.
///
/// All limits are hard: the client drops (and counts as lost) rather than
/// exceed any of them.
#[derive(Clone)]
pub struct AirlockConfig {
    /// Opaque credential forwarded to the transport on every request.
    pub api_key: String,
    /// Supplies candidate ingestion endpoints.
    pub cluster_provider: Arc<dyn ClusterProvider>,
    /// Baseline flush interval.
    pub send_period: Duration,
    /// Ceiling on flush-interval growth under backoff.
    pub send_period_cap: Duration,
    /// Per-request transport timeout.
    pub request_timeout: Duration,
    /// Maximum encoded size of one record.
    pub max_record_size: usize,
    /// Maximum size of one outbound batch.
    pub max_batch_size: usize,
    /// Hard ceiling on memory held by partitions and pooled buffers.
    pub max_memory_consumption: usize,
    /// Capacity of each pre-warmed arena buffer.
    pub initial_pooled_buffer_size: usize,
    /// Number of arena buffers to pre-warm.
    pub initial_pooled_buffers_count: usize,
    /// Emit per-batch diagnostics. No effect on delivery semantics.
    pub enable_tracing: bool,
    /// Emit per-round counter and arena diagnostics. No effect on delivery.
    pub enable_metrics: bool,
    /// Bound on concurrent outbound requests.
    pub parallelism: usize,
}

impl AirlockConfig {
    pub fn builder() -> AirlockConfigBuilder {
        AirlockConfigBuilder::default()
    }
}

impl fmt::Debug for AirlockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirlockConfig")
            .field("cluster_provider", &self.cluster_provider)
            .field("send_period", &self.send_period)
            .field("send_period_cap", &self.send_period_cap)
            .field("request_timeout", &self.request_timeout)
            .field("max_record_size", &self.max_record_size)
            .field("max_batch_size", &self.max_batch_size)
            .field("max_memory_consumption", &self.max_memory_consumption)
            .field("initial_pooled_buffer_size", &self.initial_pooled_buffer_size)
            .field(
                "initial_pooled_buffers_count",
                &self.initial_pooled_buffers_count,
            )
            .field("enable_tracing", &self.enable_tracing)
            .field("enable_metrics", &self.enable_metrics)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AirlockConfig`].
pub struct AirlockConfigBuilder {
    api_key: String,
    cluster_provider: Option<Arc<dyn ClusterProvider>>,
    send_period: Duration,
    send_period_cap: Duration,
    request_timeout: Duration,
    max_record_size: usize,
    max_batch_size: usize,
    max_memory_consumption: usize,
    initial_pooled_buffer_size: usize,
    initial_pooled_buffers_count: usize,
    enable_tracing: bool,
    enable_metrics: bool,
    parallelism: usize,
}

impl Default for AirlockConfigBuilder {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            cluster_provider: None,
            send_period: Duration::from_secs(2),
            send_period_cap: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            max_record_size: 1024 * 1024,
            max_batch_size: 10 * 1024 * 1024,
            max_memory_consumption: 256 * 1024 * 1024,
            initial_pooled_buffer_size: 1024 * 1024,
            initial_pooled_buffers_count: 8,
            enable_tracing: false,
            enable_metrics: false,
            parallelism: 4,
        }
    }
}

impl AirlockConfigBuilder {
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn cluster_provider(mut self, provider: Arc<dyn ClusterProvider>) -> Self {
        self.cluster_provider = Some(provider);
        self
    }

    pub fn send_period(mut self, period: Duration) -> Self {
        self.send_period = period;
        self
    }

    pub fn send_period_cap(mut self, cap: Duration) -> Self {
        self.send_period_cap = cap;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    pub fn max_batch_size(mut self, bytes: usize) -> Self {
        self.max_batch_size = bytes;
        self
    }

    pub fn max_memory_consumption(mut self, bytes: usize) -> Self {
        self.max_memory_consumption = bytes;
        self
    }

    pub fn initial_pooled_buffer_size(mut self, bytes: usize) -> Self {
        self.initial_pooled_buffer_size = bytes;
        self
    }

    pub fn initial_pooled_buffers_count(mut self, count: usize) -> Self {
        self.initial_pooled_buffers_count = count;
        self
    }

    pub fn enable_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Build the configuration.
    ///
    /// Structural validation (limit sanity, endpoint presence) happens at
    /// client construction, where the parallelism override of the parallel
    /// façade is also known.
    pub fn build(self) -> AirlockConfig {
        AirlockConfig {
            api_key: self.api_key,
            cluster_provider: self
                .cluster_provider
                .unwrap_or_else(|| Arc::new(crate::cluster::FixedClusterProvider::from_endpoints(Vec::new()))),
            send_period: self.send_period,
            send_period_cap: self.send_period_cap,
            request_timeout: self.request_timeout,
            max_record_size: self.max_record_size,
            max_batch_size: self.max_batch_size,
            max_memory_consumption: self.max_memory_consumption,
            initial_pooled_buffer_size: self.initial_pooled_buffer_size,
            initial_pooled_buffers_count: self.initial_pooled_buffers_count,
            enable_tracing: self.enable_tracing,
            enable_metrics: self.enable_metrics,
            parallelism: self.parallelism,
        }
    }
}
