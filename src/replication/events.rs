//! Change notifications pushed by the replication core.
//!
//! The presentation layer subscribes and re-reads whatever view it shows;
//! events say what changed, not the new contents.

use serde::Serialize;

use crate::conflict::ConflictSeverity;
use crate::operation::OperationState;
use crate::record::{OperationId, RecordId};

/// How an active conflict left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDisposal {
    Resolved,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// The optimistic view and balances were rebuilt
    ViewReconciled { revision: u64, records: usize },

    /// An operation moved to a new state
    OperationChanged {
        operation_id: OperationId,
        record_id: RecordId,
        state: OperationState,
    },

    ConflictRegistered {
        operation_id: OperationId,
        record_id: RecordId,
        severity: ConflictSeverity,
    },

    ConflictCleared {
        operation_id: OperationId,
        disposal: ConflictDisposal,
    },
}
