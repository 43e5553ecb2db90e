//! # Transition Errors

use thiserror::Error;

use super::state::OperationState;

/// Result type for state transitions
pub type TransitionResult<T> = Result<T, TransitionError>;

/// Attempted a transition the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal operation transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: OperationState,
    pub to: OperationState,
}
