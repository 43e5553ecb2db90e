//! Metrics registry.
//!
//! - Counters only grow; `retry_queue_depth` is the one gauge
//! - Relaxed atomics: exact totals, no cross-counter consistency

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident => $increment:ident;)*) => {
        /// Registry of replication and delivery counters.
        ///
        /// Shared by the replication core and the delivery engine through an
        /// `Arc`.
        #[derive(Debug, Default)]
        pub struct MetricsRegistry {
            $($(#[$doc])* $name: AtomicU64,)*
            retry_queue_depth: AtomicU64,
        }

        impl MetricsRegistry {
            $(
                $(#[$doc])*
                pub fn $increment(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Point-in-time copy of every counter.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                    retry_queue_depth: self.retry_queue_depth.load(Ordering::Relaxed),
                }
            }
        }

        /// A point-in-time snapshot of all metrics
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            $(pub $name: u64,)*
            pub retry_queue_depth: u64,
        }
    };
}

counters! {
    /// Operations accepted by `submit`
    operations_submitted => increment_operations_submitted;
    /// Mutations rejected synchronously by validation
    operations_rejected => increment_operations_rejected;
    operations_confirmed => increment_operations_confirmed;
    operations_failed => increment_operations_failed;
    operations_rolled_back => increment_operations_rolled_back;
    operations_timed_out => increment_operations_timed_out;
    operations_cancelled => increment_operations_cancelled;
    /// Transaction outcomes that arrived after the operation settled
    late_outcomes_discarded => increment_late_outcomes_discarded;

    /// Feed updates applied to the confirmed map
    feed_updates => increment_feed_updates;
    stale_snapshots_ignored => increment_stale_snapshots_ignored;

    conflicts_detected => increment_conflicts_detected;
    conflicts_auto_resolved => increment_conflicts_auto_resolved;
    conflicts_resolved => increment_conflicts_resolved;
    conflicts_expired => increment_conflicts_expired;

    /// Per-recipient delivery attempts, first tries and retries
    deliveries_attempted => increment_deliveries_attempted;
    deliveries_succeeded => increment_deliveries_succeeded;
    deliveries_failed => increment_deliveries_failed;
    deliveries_retried => increment_deliveries_retried;
    /// Given up after max attempts or max age
    deliveries_dropped => increment_deliveries_dropped;
    /// Pushed out of a full retry queue
    deliveries_evicted => increment_deliveries_evicted;
    recipients_unresolved => increment_recipients_unresolved;
    rate_limit_deferrals => increment_rate_limit_deferrals;
    batches_dispatched => increment_batches_dispatched;
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `n` stale feed snapshots at once.
    pub fn add_stale_snapshots_ignored(&self, n: u64) {
        self.stale_snapshots_ignored.fetch_add(n, Ordering::Relaxed);
    }

    /// Record the current retry queue size.
    pub fn set_retry_queue_depth(&self, depth: usize) {
        self.retry_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    /// Current snapshot as a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_operations_submitted();
        registry.increment_operations_submitted();
        registry.increment_operations_confirmed();
        registry.increment_deliveries_dropped();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.operations_submitted, 2);
        assert_eq!(snapshot.operations_confirmed, 1);
        assert_eq!(snapshot.deliveries_dropped, 1);
        assert_eq!(snapshot.operations_failed, 0);
    }

    #[test]
    fn test_add_stale_snapshots() {
        let registry = MetricsRegistry::new();
        registry.increment_stale_snapshots_ignored();
        registry.add_stale_snapshots_ignored(3);
        registry.add_stale_snapshots_ignored(0);
        assert_eq!(registry.snapshot().stale_snapshots_ignored, 4);
    }

    #[test]
    fn test_queue_depth_gauge() {
        let registry = MetricsRegistry::new();
        registry.set_retry_queue_depth(12);
        registry.set_retry_queue_depth(3);
        assert_eq!(registry.snapshot().retry_queue_depth, 3);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_conflicts_detected();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["conflicts_detected"], 1);
        assert_eq!(parsed["deliveries_succeeded"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_deliveries_attempted();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.snapshot().deliveries_attempted, 1000);
    }
}
