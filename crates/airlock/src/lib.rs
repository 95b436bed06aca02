//! # Airlock
//!
//! Telemetry-shipping client: bounded-memory buffering, batching, and
//! best-effort delivery of typed events to a remote ingestion cluster.
//!
//! This crate re-exports the commonly used types from [`airlock_core`] and
//! [`airlock_client`] behind one door.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use airlock::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(serde::Serialize)]
//! struct LogEvent {
//!     message: String,
//!     timestamp: chrono::DateTime<chrono::Utc>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> airlock::client::Result<()> {
//!     let config = AirlockConfig::builder()
//!         .api_key("UniversalApiKey")
//!         .cluster_provider(Arc::new(FixedClusterProvider::new(
//!             url::Url::parse("http://localhost:6306").expect("valid endpoint"),
//!         )))
//!         .build();
//!
//!     let client = AirlockClient::new(config)?;
//!     client.push_now(
//!         "vostok/ci/core/logs",
//!         &LogEvent {
//!             message: "hello".into(),
//!             timestamp: chrono::Utc::now(),
//!         },
//!     );
//!     client.close().await;
//!
//!     println!(
//!         "sent: {}, lost: {}",
//!         client.counters().sent_items(),
//!         client.counters().lost_items()
//!     );
//!     Ok(())
//! }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

// Re-export the primitive crate.
pub use airlock_core as core;

// Re-export the client crate.
pub use airlock_client as client;

pub use airlock_client::{AirlockClient, ParallelAirlockClient};

/// Prelude module for convenient imports.
///
/// ```rust
/// use airlock::prelude::*;
/// ```
pub mod prelude {
    pub use airlock_client::{
        AirlockClient, AirlockConfig, ClusterProvider, FixedClusterProvider,
        ParallelAirlockClient, Transport,
    };
    pub use airlock_core::DeliveryCounters;
}
