//! Airlock client: buffering, batching, and reliable delivery of telemetry
//! events to a remote ingestion cluster.
//!
//! # Design
//!
//! - **Bounded memory**: all record bytes live in a pooled buffer arena
//!   with a hard ceiling; when the ceiling is reached the client drops and
//!   counts rather than allocate past it.
//! - **Fire-and-forget**: `push` serializes on the caller's thread, appends
//!   to a per-routing-key partition, and returns. It never blocks on
//!   network I/O and never fails outward.
//! - **Batched delivery**: a timer loop drains partitions on a
//!   backoff-capped period; the dispatcher packs records into size-bounded
//!   batches and ships them with bounded parallelism, preserving per-key
//!   order.
//! - **No retries**: a failed batch's records are counted lost. Retry
//!   queues would reintroduce the unbounded memory the arena exists to
//!   prevent; the counters are the observable signal.
//!
//! # Example
//!
//! ```rust,no_run
//! use airlock_client::{AirlockClient, AirlockConfig, FixedClusterProvider};
//! use std::sync::Arc;
//! use url::Url;
//!
//! # #[derive(serde::Serialize)]
//! # struct LogEvent { message: String, timestamp: chrono::DateTime<chrono::Utc> }
//! # async fn example() -> airlock_client::Result<()> {
//! let config = AirlockConfig::builder()
//!     .api_key("UniversalApiKey")
//!     .cluster_provider(Arc::new(FixedClusterProvider::new(
//!         Url::parse("http://localhost:6306").expect("valid endpoint"),
//!     )))
//!     .build();
//!
//! let client = AirlockClient::new(config)?;
//! let event = LogEvent {
//!     message: "hello".into(),
//!     timestamp: chrono::Utc::now(),
//! };
//! client.push("vostok/ci/core/logs", &event, |e| e.timestamp);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cluster;
pub mod config;
mod dispatcher;
pub mod error;
pub mod parallel;
pub mod partition;
mod scheduler;
pub mod transport;

pub use client::AirlockClient;
pub use cluster::{ClusterProvider, FixedClusterProvider};
pub use config::{AirlockConfig, AirlockConfigBuilder};
pub use error::{Error, Result};
pub use parallel::ParallelAirlockClient;
pub use partition::PartitionStore;
pub use transport::{HttpTransport, Transport, API_KEY_HEADER};

// Re-export the counters type callers receive from `counters()`.
pub use airlock_core::DeliveryCounters;
