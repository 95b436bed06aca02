//! Client variant with an explicit dispatch-parallelism override.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use airlock_core::DeliveryCounters;

use crate::client::AirlockClient;
use crate::config::AirlockConfig;
use crate::error::Result;
use crate::transport::{HttpTransport, Transport};

/// [`AirlockClient`] with a fixed degree of dispatch parallelism chosen at
/// construction, independent of the configured default.
///
/// Shares the partition store, scheduler, and dispatcher contracts of the
/// default client; only the concurrency bound on outbound requests
/// differs.
pub struct ParallelAirlockClient {
    inner: AirlockClient,
}

impl ParallelAirlockClient {
    /// Create a client shipping over HTTP with `parallelism` concurrent
    /// outbound requests.
    pub fn new(config: AirlockConfig, parallelism: usize) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, parallelism, transport)
    }

    /// Same, over a custom transport.
    pub fn with_transport(
        config: AirlockConfig,
        parallelism: usize,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Ok(Self {
            inner: AirlockClient::build(config, transport, Some(parallelism))?,
        })
    }

    /// See [`AirlockClient::push`].
    pub fn push<T, F>(&self, routing_key: &str, event: &T, timestamp_of: F)
    where
        T: Serialize,
        F: FnOnce(&T) -> DateTime<Utc>,
    {
        self.inner.push(routing_key, event, timestamp_of);
    }

    /// See [`AirlockClient::push_now`].
    pub fn push_now<T: Serialize>(&self, routing_key: &str, event: &T) {
        self.inner.push_now(routing_key, event);
    }

    /// See [`AirlockClient::counters`].
    pub fn counters(&self) -> &DeliveryCounters {
        self.inner.counters()
    }

    /// See [`AirlockClient::close`].
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
