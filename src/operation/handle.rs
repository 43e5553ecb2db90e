//! Caller-side view of a submitted operation.

use tokio::sync::watch;

use super::operation::OperationKind;
use super::state::OperationState;
use crate::record::{OperationId, RecordId};

/// Returned by `submit`; tracks the operation's state as it changes.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    id: OperationId,
    record_id: RecordId,
    kind: OperationKind,
    state: watch::Receiver<OperationState>,
}

impl OperationHandle {
    pub(crate) fn new(
        id: OperationId,
        record_id: RecordId,
        kind: OperationKind,
        state: watch::Receiver<OperationState>,
    ) -> Self {
        Self {
            id,
            record_id,
            kind,
            state,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Latest known state.
    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    /// Wait until the operation settles and return its outcome.
    pub async fn settled(&self) -> OperationState {
        let mut rx = self.state.clone();
        if let Ok(state) = rx.wait_for(|s| s.is_settled()).await {
            return *state;
        }
        // Core dropped before settling.
        let last = *rx.borrow();
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settled_waits_for_outcome() {
        let (tx, rx) = watch::channel(OperationState::Optimistic);
        let handle = OperationHandle::new(OperationId::new(), RecordId::new(), OperationKind::Create, rx);
        assert_eq!(handle.state(), OperationState::Optimistic);

        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.settled().await }
        });
        tx.send(OperationState::Confirming).unwrap();
        tx.send(OperationState::Confirmed).unwrap();

        assert_eq!(waiter.await.unwrap(), OperationState::Confirmed);
        assert_eq!(handle.state(), OperationState::Confirmed);
    }

    #[tokio::test]
    async fn test_settled_after_sender_dropped() {
        let (tx, rx) = watch::channel(OperationState::Optimistic);
        let handle = OperationHandle::new(OperationId::new(), RecordId::new(), OperationKind::Update, rx);
        drop(tx);
        assert_eq!(handle.settled().await, OperationState::Optimistic);
    }
}
