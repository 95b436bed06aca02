//! Process-wide delivery counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters of terminal record outcomes.
///
/// Every record ends up in exactly one of the two: `sent_items` once the
/// endpoint acknowledged the batch carrying it, `lost_items` when it was
/// dropped for size, capacity, closed-client, or terminal send failure.
/// Counters never decrement and are never reset during a client's lifetime.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    sent: AtomicU64,
    lost: AtomicU64,
}

impl DeliveryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records acknowledged by the endpoint so far.
    pub fn sent_items(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Records that will never reach the endpoint.
    pub fn lost_items(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn add_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_lost(&self, count: u64) {
        self.lost.fetch_add(count, Ordering::Relaxed);
    }
}
