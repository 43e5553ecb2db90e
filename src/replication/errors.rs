//! # Replication Errors
//!
//! `OperationError` is what a settled, unsuccessful operation carries.
//! `CoreError` is returned synchronously by the core's own API.

use thiserror::Error;

use crate::conflict::{Conflict, ConflictPrompt};
use crate::record::{OperationId, RecordId, ValidationError};
use crate::store::{StoreError, TxAbort};

/// Result type for core API calls
pub type CoreResult<T> = Result<T, CoreError>;

/// Why an operation did not confirm
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    #[error("Invalid bill: {0}")]
    Validation(ValidationError),

    #[error("Not authorized to modify record {0}")]
    Unauthorized(RecordId),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Conflicting edit on record {} ({} severity)", .0.record_id, .0.severity)]
    ConflictDetected(Box<Conflict>),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write aborted: {0}")]
    Aborted(String),

    #[error("No response before the deadline")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,
}

impl OperationError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ConflictDetected(_) => "CONFLICT_DETECTED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Aborted(_) => "ABORTED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Message for the person who issued the operation.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Unauthorized(_) => "You don't have permission to change this bill.".to_string(),
            Self::NotFound(_) => "This bill no longer exists.".to_string(),
            Self::ConflictDetected(conflict) => ConflictPrompt::for_conflict(conflict).message,
            Self::Unavailable(_) => "Couldn't reach the server. Your change was not saved.".to_string(),
            Self::Aborted(_) => "The server rejected this change.".to_string(),
            Self::Timeout => "Saving is taking too long. Check your connection and try again.".to_string(),
            Self::Cancelled => "Change cancelled.".to_string(),
        }
    }

    /// The conflict, if this is a conflict failure.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::ConflictDetected(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Unauthorized(id) => Self::Unauthorized(id),
            StoreError::Unavailable(reason) => Self::Unavailable(reason),
            StoreError::Aborted(TxAbort::Conflict { conflict, .. }) => Self::ConflictDetected(conflict),
            StoreError::Aborted(TxAbort::Invalid(e)) => Self::Validation(e),
            StoreError::Aborted(abort) => Self::Aborted(abort.to_string()),
        }
    }
}

impl From<ValidationError> for OperationError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// Errors from the core's synchronous API
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Mutation rejected before any optimistic effect was applied
    #[error("Invalid bill: {0}")]
    Validation(#[from] ValidationError),

    /// Update or delete of a record the core has never seen
    #[error("Unknown record: {0}")]
    UnknownRecord(RecordId),

    #[error("No active conflict for operation {0}")]
    ConflictNotFound(OperationId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::UnknownRecord(_) => "UNKNOWN_RECORD",
            Self::ConflictNotFound(_) => "CONFLICT_NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub(crate) fn lock_poisoned() -> Self {
        Self::Internal("Lock poisoned".to_string())
    }
}
