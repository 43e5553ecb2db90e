//! Observable events.
//!
//! Event names are stable identifiers, used as the `event` field of every
//! log line.

use std::fmt;

/// Observable events in billsync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    ConfigLoaded,
    CoreStarted,
    CoreStopped,
    EngineStopped,
    FeedAttached,
    FeedClosed,

    // Operations
    OperationSubmitted,
    OperationRejected,
    OperationConfirmed,
    OperationFailed,
    OperationRolledBack,
    OperationTimedOut,
    OperationCancelled,
    LateOutcomeDiscarded,

    // Replication
    FeedApplied,
    StaleSnapshotIgnored,

    // Conflicts
    ConflictDetected,
    ConflictAutoResolved,
    ConflictResolved,
    ConflictExpired,

    // Delivery
    DeliveryQueued,
    DeliveryBatchDispatched,
    DeliveryFailed,
    DeliveryRetried,
    DeliveryDropped,
    DeliveryEvicted,
    DeliveryDeferred,
    RecipientUnresolved,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::CoreStarted => "CORE_STARTED",
            Event::CoreStopped => "CORE_STOPPED",
            Event::EngineStopped => "ENGINE_STOPPED",
            Event::FeedAttached => "FEED_ATTACHED",
            Event::FeedClosed => "FEED_CLOSED",

            Event::OperationSubmitted => "OPERATION_SUBMITTED",
            Event::OperationRejected => "OPERATION_REJECTED",
            Event::OperationConfirmed => "OPERATION_CONFIRMED",
            Event::OperationFailed => "OPERATION_FAILED",
            Event::OperationRolledBack => "OPERATION_ROLLED_BACK",
            Event::OperationTimedOut => "OPERATION_TIMED_OUT",
            Event::OperationCancelled => "OPERATION_CANCELLED",
            Event::LateOutcomeDiscarded => "LATE_OUTCOME_DISCARDED",

            Event::FeedApplied => "FEED_APPLIED",
            Event::StaleSnapshotIgnored => "STALE_SNAPSHOT_IGNORED",

            Event::ConflictDetected => "CONFLICT_DETECTED",
            Event::ConflictAutoResolved => "CONFLICT_AUTO_RESOLVED",
            Event::ConflictResolved => "CONFLICT_RESOLVED",
            Event::ConflictExpired => "CONFLICT_EXPIRED",

            Event::DeliveryQueued => "DELIVERY_QUEUED",
            Event::DeliveryBatchDispatched => "DELIVERY_BATCH_DISPATCHED",
            Event::DeliveryFailed => "DELIVERY_FAILED",
            Event::DeliveryRetried => "DELIVERY_RETRIED",
            Event::DeliveryDropped => "DELIVERY_DROPPED",
            Event::DeliveryEvicted => "DELIVERY_EVICTED",
            Event::DeliveryDeferred => "DELIVERY_DEFERRED",
            Event::RecipientUnresolved => "RECIPIENT_UNRESOLVED",
        }
    }

    /// Events that indicate a user-visible failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::OperationRejected
                | Event::OperationFailed
                | Event::OperationTimedOut
                | Event::ConflictDetected
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        for event in [
            Event::OperationSubmitted,
            Event::ConflictAutoResolved,
            Event::DeliveryBatchDispatched,
            Event::StaleSnapshotIgnored,
        ] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'), "{name}");
        }
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::OperationTimedOut.is_failure());
        assert!(!Event::OperationConfirmed.is_failure());
        assert!(!Event::DeliveryFailed.is_failure());
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(Event::FeedApplied.to_string(), "FEED_APPLIED");
    }
}
