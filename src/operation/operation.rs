//! Optimistic operation record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::errors::TransitionResult;
use super::state::OperationState;
use crate::record::{Bill, OperationId, ParticipantId, RecordId};

/// What an operation does to its target record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation requested by the presentation layer.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Write a new bill
    Create(Bill),
    /// Replace a bill; the snapshot's `version` is the version it was
    /// derived from
    Update(Bill),
    /// Soft-delete a bill
    Delete(RecordId),
}

impl Mutation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Update(_) => OperationKind::Update,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    pub fn target(&self) -> RecordId {
        match self {
            Self::Create(bill) | Self::Update(bill) => bill.id,
            Self::Delete(id) => *id,
        }
    }
}

/// One attempt at a mutation, tracked from issue to settlement.
#[derive(Debug, Clone, Serialize)]
pub struct OptimisticOperation {
    pub id: OperationId,
    /// Issue order within the owning core
    pub sequence: u64,
    pub kind: OperationKind,
    pub target: RecordId,
    /// Snapshot to write; `None` for deletes
    pub proposed: Option<Bill>,
    /// Confirmed snapshot the mutation was derived from
    pub base: Option<Bill>,
    pub expected_version: Option<u64>,
    pub issued_by: ParticipantId,
    pub issued_at: DateTime<Utc>,
    #[serde(skip)]
    pub deadline: Instant,
    state: OperationState,
    /// User-facing reason for a non-confirmed outcome
    pub failure: Option<String>,
}

impl OptimisticOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u64,
        kind: OperationKind,
        target: RecordId,
        proposed: Option<Bill>,
        base: Option<Bill>,
        expected_version: Option<u64>,
        issued_by: ParticipantId,
        deadline: Instant,
    ) -> Self {
        Self {
            id: OperationId::new(),
            sequence,
            kind,
            target,
            proposed,
            base,
            expected_version,
            issued_by,
            issued_at: Utc::now(),
            deadline,
            state: OperationState::Optimistic,
            failure: None,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: OperationState) -> TransitionResult<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    /// Settle with a user-facing failure reason.
    pub fn settle_with(&mut self, next: OperationState, reason: impl Into<String>) -> TransitionResult<()> {
        self.transition(next)?;
        self.failure = Some(reason.into());
        Ok(())
    }
}
