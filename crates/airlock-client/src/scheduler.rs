//! Timer-driven flush loop with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::ClientShared;

/// Flush-interval state machine: base period, doubled after any failed
/// round, capped, reset to base by a fully successful round.
pub(crate) struct BackoffInterval {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl BackoffInterval {
    pub(crate) fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: base,
        }
    }

    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    pub(crate) fn on_success(&mut self) {
        self.current = self.base;
    }

    pub(crate) fn on_failure(&mut self) {
        self.current = self.current.checked_mul(2).unwrap_or(self.cap).min(self.cap);
    }
}

/// The per-client flush loop.
///
/// One logical timer: each tick drains the store and hands the round to
/// the dispatcher, awaiting it before arming the next tick, so rounds
/// never overlap. Shutdown (signal or sender dropped) runs one final
/// drain-and-dispatch before the task exits.
pub(crate) async fn run_flush_loop(
    shared: Arc<ClientShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = BackoffInterval::new(shared.send_period, shared.send_period_cap);

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval.current()) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let outcome = flush_once(&shared).await;
        if outcome.batches_failed == 0 {
            interval.on_success();
        } else {
            interval.on_failure();
            warn!(
                failed_batches = outcome.batches_failed,
                next_flush = ?interval.current(),
                "flush round had failures, backing off"
            );
        }
    }

    // Final synchronous flush before stopping. Intake is already rejected
    // at this point, but a push that raced the shutdown signal may still
    // land one record, so drain until the store is empty.
    loop {
        let outcome = flush_once(&shared).await;
        if outcome.batches_failed > 0 {
            warn!(
                failed_batches = outcome.batches_failed,
                "final flush had failures"
            );
        }
        if shared.store.resident_bytes() == 0 {
            break;
        }
    }
    debug!("flush loop stopped");
}

async fn flush_once(shared: &Arc<ClientShared>) -> crate::dispatcher::RoundOutcome {
    let drained = shared.store.drain_all();
    let outcome = if drained.is_empty() {
        crate::dispatcher::RoundOutcome::default()
    } else {
        Arc::clone(&shared.dispatcher).dispatch_round(drained).await
    };

    if shared.enable_metrics {
        let arena = shared.pool.stats();
        debug!(
            sent_items = shared.counters.sent_items(),
            lost_items = shared.counters.lost_items(),
            resident_bytes = shared.store.resident_bytes(),
            arena_bytes = arena.resident_bytes,
            arena_reuses = arena.reuses,
            "flush round complete"
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut interval =
            BackoffInterval::new(Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(interval.current(), Duration::from_secs(2));

        interval.on_failure();
        assert_eq!(interval.current(), Duration::from_secs(4));
        interval.on_failure();
        assert_eq!(interval.current(), Duration::from_secs(8));
        interval.on_failure();
        assert_eq!(interval.current(), Duration::from_secs(10));
        interval.on_failure();
        assert_eq!(interval.current(), Duration::from_secs(10));
    }

    #[test]
    fn success_resets_to_base() {
        let mut interval =
            BackoffInterval::new(Duration::from_secs(2), Duration::from_secs(300));
        interval.on_failure();
        interval.on_failure();
        interval.on_success();
        assert_eq!(interval.current(), Duration::from_secs(2));
    }
}
