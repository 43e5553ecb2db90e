//! Operation state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{TransitionError, TransitionResult};

/// Lifecycle state of an optimistic operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Applied locally; transaction not yet dispatched
    Optimistic,
    /// Transaction in flight
    Confirming,
    /// Store accepted the write
    Confirmed,
    /// Store rejected the write
    Failed,
    /// Failure shown long enough; effect is gone
    RolledBack,
    /// Cancelled by the user or system
    Cancelled,
    /// No answer before the deadline
    TimedOut,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    /// Still pending: contributes its effect to the optimistic view.
    #[inline]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Optimistic | Self::Confirming)
    }

    /// An outcome has been reached and can never change.
    #[inline]
    pub fn is_settled(&self) -> bool {
        !self.is_live()
    }

    pub fn can_transition_to(&self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Optimistic, Confirming) => true,
            (Optimistic | Confirming, Confirmed | Failed | TimedOut | Cancelled) => true,
            (Failed, RolledBack) => true,
            _ => false,
        }
    }

    /// Validate and return the next state.
    pub fn transition(self, next: OperationState) -> TransitionResult<OperationState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
