//! End-to-end pipeline tests against an in-process transport.
//!
//! The recording transport stands in for the ingestion cluster: it captures
//! every batch body (in completion order) so tests can decode them with the
//! record codec and assert delivery counts and per-key ordering.

use airlock_client::{
    AirlockClient, AirlockConfig, Error, FixedClusterProvider, ParallelAirlockClient, Result,
    Transport,
};
use airlock_core::{decode_records, DecodedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Default)]
struct RecordingTransport {
    deliveries: Mutex<Vec<(String, Vec<u8>)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.failing.store(true, Ordering::Relaxed);
        Arc::new(transport)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn endpoints_seen(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// All delivered records, in batch completion order.
    fn decoded(&self) -> Vec<DecodedRecord> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, body)| decode_records(body).expect("well-formed batch body"))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        endpoint: &Url,
        _api_key: &str,
        body: &[u8],
        _timeout: Duration,
    ) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Transport("injected failure".into()));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((endpoint.to_string(), body.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEvent {
    seq: u64,
    message: String,
    timestamp: DateTime<Utc>,
}

fn log_event(seq: u64) -> LogEvent {
    let base = Utc.timestamp_millis_opt(1_700_000_000_000).single().unwrap();
    LogEvent {
        seq,
        message: format!("Testing AirlockClient {seq}"),
        timestamp: base - ChronoDuration::seconds(seq as i64 * 10),
    }
}

fn test_config() -> AirlockConfig {
    AirlockConfig::builder()
        .api_key("UniversalApiKey")
        .cluster_provider(Arc::new(FixedClusterProvider::new(
            Url::parse("http://localhost:6306").unwrap(),
        )))
        .send_period(Duration::from_millis(50))
        .send_period_cap(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(5))
        .max_record_size(1024)
        .max_batch_size(64 * 1024)
        .max_memory_consumption(8 * 1024 * 1024)
        .initial_pooled_buffer_size(4096)
        .initial_pooled_buffers_count(4)
        .parallelism(4)
        .build()
}

fn seq_of(decoded: &DecodedRecord) -> u64 {
    let event: LogEvent = bincode::deserialize(&decoded.payload).expect("payload decodes");
    event.seq
}

#[tokio::test]
async fn push_log_events_zero_loss() {
    let transport = RecordingTransport::new();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    let routing_key = "vostok/ci/core/logs";
    for seq in 0..1000 {
        client.push(routing_key, &log_event(seq), |e| e.timestamp);
    }
    client.close().await;

    assert_eq!(client.counters().lost_items(), 0);
    assert_eq!(client.counters().sent_items(), 1000);

    let decoded = transport.decoded();
    assert_eq!(decoded.len(), 1000);
    assert!(decoded.iter().all(|r| r.routing_key == routing_key));
}

#[tokio::test]
async fn same_key_records_arrive_in_push_order() {
    let transport = RecordingTransport::new();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    for seq in 0..300 {
        client.push("stream/alpha", &log_event(seq), |e| e.timestamp);
        client.push("stream/beta", &log_event(seq + 1000), |e| e.timestamp);
    }
    // Let at least one timer round ship part of the stream.
    tokio::time::sleep(Duration::from_millis(120)).await;
    for seq in 300..600 {
        client.push("stream/alpha", &log_event(seq), |e| e.timestamp);
        client.push("stream/beta", &log_event(seq + 1000), |e| e.timestamp);
    }
    client.close().await;

    assert_eq!(client.counters().lost_items(), 0);
    assert_eq!(client.counters().sent_items(), 1200);

    let decoded = transport.decoded();
    let alpha: Vec<u64> = decoded
        .iter()
        .filter(|r| r.routing_key == "stream/alpha")
        .map(seq_of)
        .collect();
    let beta: Vec<u64> = decoded
        .iter()
        .filter(|r| r.routing_key == "stream/beta")
        .map(seq_of)
        .collect();

    assert_eq!(alpha, (0..600).collect::<Vec<_>>());
    assert_eq!(beta, (1000..1600).collect::<Vec<_>>());
}

#[tokio::test]
async fn oversize_record_is_lost_and_never_dispatched() {
    let transport = RecordingTransport::new();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    let oversize = LogEvent {
        seq: 0,
        message: "x".repeat(2048),
        timestamp: Utc::now(),
    };
    client.push("stream", &oversize, |e| e.timestamp);

    // Counted lost immediately, before any flush.
    assert_eq!(client.counters().lost_items(), 1);

    client.close().await;
    assert_eq!(client.counters().sent_items(), 0);
    assert_eq!(client.counters().lost_items(), 1);
    assert!(transport.decoded().is_empty());
}

#[tokio::test]
async fn memory_ceiling_drops_excess_instead_of_growing() {
    let transport = RecordingTransport::new();
    let config = AirlockConfig::builder()
        .api_key("UniversalApiKey")
        .cluster_provider(Arc::new(FixedClusterProvider::new(
            Url::parse("http://localhost:6306").unwrap(),
        )))
        .send_period(Duration::from_secs(10))
        .send_period_cap(Duration::from_secs(20))
        .request_timeout(Duration::from_secs(5))
        .max_record_size(1024)
        .max_batch_size(64 * 1024)
        .max_memory_consumption(256 * 1024)
        .initial_pooled_buffer_size(4096)
        .initial_pooled_buffers_count(4)
        .parallelism(2)
        .build();
    let client = AirlockClient::with_transport(config, transport.clone()).unwrap();

    for seq in 0..1000 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    let lost_before_close = client.counters().lost_items();
    assert!(lost_before_close > 0, "ceiling should have rejected excess");

    client.close().await;

    let sent = client.counters().sent_items();
    let lost = client.counters().lost_items();
    assert!(sent > 0, "records under the ceiling should still deliver");
    assert_eq!(sent + lost, 1000);

    // Whatever was delivered kept push order.
    let seqs: Vec<u64> = transport.decoded().iter().map(seq_of).collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn push_after_close_is_rejected_and_counted() {
    let transport = RecordingTransport::new();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    for seq in 0..10 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    client.close().await;
    assert_eq!(client.counters().sent_items(), 10);
    assert_eq!(client.counters().lost_items(), 0);

    client.push("stream", &log_event(99), |e| e.timestamp);
    assert_eq!(client.counters().sent_items(), 10);
    assert_eq!(client.counters().lost_items(), 1);
    assert_eq!(transport.decoded().len(), 10);
}

#[tokio::test]
async fn double_close_is_a_noop() {
    let transport = RecordingTransport::new();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    for seq in 0..5 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    client.close().await;
    client.close().await;

    assert_eq!(client.counters().sent_items(), 5);
    assert_eq!(client.counters().lost_items(), 0);
    assert_eq!(transport.decoded().len(), 5);
}

#[tokio::test]
async fn failing_endpoint_loses_everything_quietly() {
    let transport = RecordingTransport::failing();
    let client =
        ParallelAirlockClient::with_transport(test_config(), 1, transport.clone()).unwrap();

    let keys = ["stream/a", "stream/b", "stream/c"];
    for seq in 0..500 {
        let key = keys[seq as usize % keys.len()];
        client.push(key, &log_event(seq), |e| e.timestamp);
    }
    client.close().await;

    assert_eq!(client.counters().lost_items(), 500);
    assert_eq!(client.counters().sent_items(), 0);
    assert!(transport.decoded().is_empty());
}

#[tokio::test]
async fn client_recovers_after_failed_rounds() {
    let transport = RecordingTransport::failing();
    let client = AirlockClient::with_transport(test_config(), transport.clone()).unwrap();

    for seq in 0..10 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    // At least one round fails while the endpoint is down.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(client.counters().lost_items(), 10);

    transport.set_failing(false);
    for seq in 10..20 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    client.close().await;

    assert_eq!(client.counters().sent_items(), 10);
    assert_eq!(client.counters().lost_items(), 10);
}

#[tokio::test]
async fn batches_rotate_across_cluster_endpoints() {
    let transport = RecordingTransport::new();
    let config = AirlockConfig::builder()
        .api_key("UniversalApiKey")
        .cluster_provider(Arc::new(FixedClusterProvider::from_endpoints(vec![
            Url::parse("http://node-a:6306").unwrap(),
            Url::parse("http://node-b:6306").unwrap(),
        ])))
        .send_period(Duration::from_millis(50))
        .send_period_cap(Duration::from_secs(5))
        .build();
    let client = AirlockClient::with_transport(config, transport.clone()).unwrap();

    for seq in 0..10 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    tokio::time::sleep(Duration::from_millis(120)).await;
    for seq in 10..20 {
        client.push("stream", &log_event(seq), |e| e.timestamp);
    }
    client.close().await;

    assert_eq!(client.counters().sent_items(), 20);
    let endpoints = transport.endpoints_seen();
    assert!(endpoints.len() >= 2);
    assert!(endpoints.iter().any(|e| e.contains("node-a")));
    assert!(endpoints.iter().any(|e| e.contains("node-b")));
}
