//! # Write Protocol
//!
//! Optimistic concurrency control against the remote store.
//!
//! Update and delete run as one atomic transaction:
//!
//! 1. Read the current server snapshot
//! 2. Fail with `NotFound` if absent or soft-deleted, `Unauthorized` if the
//!    caller does not own it
//! 3. If the caller's expected version is stale, classify the difference:
//!    auto-resolvable conflicts are merged and written, anything else
//!    aborts with the conflict and writes nothing
//! 4. Otherwise write the proposal at `server.version + 1`
//!
//! Create has no version race and always writes version 1 after
//! validating the bill.

use std::sync::{Arc, Mutex};

use chrono::Utc;

use super::adapter::{RemoteStore, TransactFn, WriteOp};
use super::errors::{StoreError, StoreResult, TxAbort};
use crate::conflict::{Conflict, ConflictClassifier};
use crate::record::{validate_bill, Bill, OperationId, ParticipantId, RecordId};

/// A successful write.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Snapshot as persisted by the store
    pub record: Bill,
    /// Set when a stale write was merged automatically
    pub auto_resolved: Option<Conflict>,
}

/// Update of an existing bill.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub operation_id: OperationId,
    pub actor: ParticipantId,
    pub proposed: Bill,
    /// Version the proposal was derived from
    pub expected_version: Option<u64>,
    /// Snapshot the proposal was derived from, for three-way merges
    pub base: Option<Bill>,
}

/// Soft delete of an existing bill.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub operation_id: OperationId,
    pub actor: ParticipantId,
    pub record_id: RecordId,
    pub expected_version: Option<u64>,
    pub base: Option<Bill>,
}

/// Stamp the store-facing metadata onto a snapshot.
fn stamp(mut bill: Bill, version: u64, operation_id: OperationId) -> Bill {
    bill.version = version;
    bill.operation_id = Some(operation_id);
    bill.updated_at = Utc::now();
    bill
}

/// Steps 1 and 2: the record must exist, be live, and belong to `actor`.
fn authorize<'a>(current: Option<&'a Bill>, record_id: RecordId, actor: &ParticipantId) -> StoreResult<&'a Bill> {
    let server = match current {
        Some(bill) if !bill.is_deleted => bill,
        _ => return Err(StoreError::NotFound(record_id)),
    };
    if &server.owner != actor {
        return Err(StoreError::Unauthorized(record_id));
    }
    Ok(server)
}

/// Write a new bill at version 1.
pub async fn create(
    store: &dyn RemoteStore,
    actor: &ParticipantId,
    draft: Bill,
    operation_id: OperationId,
) -> StoreResult<CommitOutcome> {
    validate_bill(&draft).map_err(|e| StoreError::Aborted(TxAbort::Invalid(e)))?;

    let now = Utc::now();
    let mut record = stamp(draft, 1, operation_id);
    record.owner = actor.clone();
    record.created_at = now;
    record.is_deleted = false;
    record.deleted_by = None;
    record.deleted_at = None;

    store.batch_write(vec![WriteOp::Create(record.clone())]).await?;

    Ok(CommitOutcome {
        record,
        auto_resolved: None,
    })
}

/// Conditionally update an existing bill.
pub async fn update(
    store: &dyn RemoteStore,
    classifier: ConflictClassifier,
    request: UpdateRequest,
) -> StoreResult<CommitOutcome> {
    validate_bill(&request.proposed).map_err(|e| StoreError::Aborted(TxAbort::Invalid(e)))?;

    let record_id = request.proposed.id;
    let resolved: Arc<Mutex<Option<Conflict>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&resolved);

    let body: TransactFn = Box::new(move |current: Option<&Bill>| {
        let server = authorize(current, record_id, &request.actor)?;
        let next_version = server.version + 1;

        let mut proposal = request.proposed.clone();
        proposal.owner = server.owner.clone();
        proposal.created_at = server.created_at;

        if let Some(expected) = request.expected_version {
            if expected != server.version {
                if let Some(conflict) = classifier.detect(request.operation_id, &proposal, server) {
                    if !classifier.can_auto_resolve(&conflict) {
                        return Err(StoreError::Aborted(TxAbort::Conflict {
                            conflict: Box::new(conflict),
                            server: Box::new(server.clone()),
                        }));
                    }
                    proposal = classifier.auto_resolve(&proposal, server, request.base.as_ref());
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(conflict);
                    }
                }
            }
        }

        Ok(stamp(proposal, next_version, request.operation_id))
    });

    let record = store.transact(record_id, body).await?;
    let auto_resolved = resolved.lock().ok().and_then(|mut r| r.take());

    Ok(CommitOutcome {
        record,
        auto_resolved,
    })
}

/// Soft-delete an existing bill.
///
/// Deletion is an update that sets `is_deleted` and stamps the actor and
/// time, under the same version rule. A stale delete aborts only when the
/// server moved in a way that is not auto-resolvable.
pub async fn delete(
    store: &dyn RemoteStore,
    classifier: ConflictClassifier,
    request: DeleteRequest,
) -> StoreResult<CommitOutcome> {
    let record_id = request.record_id;
    let body: TransactFn = Box::new(move |current: Option<&Bill>| {
        let server = authorize(current, record_id, &request.actor)?;

        if let (Some(expected), Some(base)) = (request.expected_version, request.base.as_ref()) {
            if expected != server.version {
                if let Some(conflict) = classifier.detect(request.operation_id, base, server) {
                    if !classifier.can_auto_resolve(&conflict) {
                        return Err(StoreError::Aborted(TxAbort::Conflict {
                            conflict: Box::new(conflict),
                            server: Box::new(server.clone()),
                        }));
                    }
                }
            }
        }

        let mut tombstone = server.clone();
        tombstone.is_deleted = true;
        tombstone.deleted_by = Some(request.actor.clone());
        tombstone.deleted_at = Some(Utc::now());
        Ok(stamp(tombstone, server.version + 1, request.operation_id))
    });

    let record = store.transact(record_id, body).await?;
    Ok(CommitOutcome {
        record,
        auto_resolved: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictSeverity;
    use crate::record::{LineItem, Participant};
    use crate::store::MemoryStore;

    fn alice() -> ParticipantId {
        ParticipantId::new("alice")
    }

    fn draft() -> Bill {
        Bill::draft("alice", "Dinner")
            .with_participant(Participant::new("alice", "Alice"))
            .with_participant(Participant::new("bob", "Bob"))
            .with_item(LineItem::new("Pizza", 50.0, ["alice", "bob"]))
    }

    async fn seeded(store: &MemoryStore) -> Bill {
        create(store, &alice(), draft(), OperationId::new())
            .await
            .unwrap()
            .record
    }

    #[tokio::test]
    async fn test_create_writes_version_one() {
        let store = MemoryStore::new();
        let op = OperationId::new();
        let outcome = create(&store, &alice(), draft(), op).await.unwrap();
        assert_eq!(outcome.record.version, 1);
        assert_eq!(outcome.record.operation_id, Some(op));
        assert_eq!(store.get(&outcome.record.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_create_validates() {
        let store = MemoryStore::new();
        let invalid = Bill::draft("alice", "Nothing");
        let err = create(&store, &alice(), invalid, OperationId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(TxAbort::Invalid(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_increments_version() {
        let store = MemoryStore::new();
        let current = seeded(&store).await;
        let mut proposed = current.clone();
        proposed.name = "Dinner with Bob".into();

        let outcome = update(
            &store,
            ConflictClassifier::default(),
            UpdateRequest {
                operation_id: OperationId::new(),
                actor: alice(),
                expected_version: Some(current.version),
                base: Some(current.clone()),
                proposed,
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.record.version, 2);
        assert!(outcome.auto_resolved.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryStore::new();
        let err = update(
            &store,
            ConflictClassifier::default(),
            UpdateRequest {
                operation_id: OperationId::new(),
                actor: alice(),
                expected_version: Some(1),
                base: None,
                proposed: draft(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_requires_owner() {
        let store = MemoryStore::new();
        let current = seeded(&store).await;
        let err = update(
            &store,
            ConflictClassifier::default(),
            UpdateRequest {
                operation_id: OperationId::new(),
                actor: ParticipantId::new("bob"),
                expected_version: Some(current.version),
                base: None,
                proposed: current,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_stale_critical_update_aborts() {
        let store = MemoryStore::new();
        let current = seeded(&store).await;
        store
            .remote_edit(&current.id, |b| b.total_amount = 60.0)
            .unwrap();

        let mut proposed = current.clone();
        proposed.name = "Mine".into();
        let err = update(
            &store,
            ConflictClassifier::default(),
            UpdateRequest {
                operation_id: OperationId::new(),
                actor: alice(),
                expected_version: Some(current.version),
                base: Some(current.clone()),
                proposed,
            },
        )
        .await
        .unwrap_err();

        match err {
            StoreError::Aborted(TxAbort::Conflict { conflict, server }) => {
                assert_eq!(conflict.severity, ConflictSeverity::Critical);
                assert_eq!(server.version, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.get(&current.id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let store = MemoryStore::new();
        let current = seeded(&store).await;
        let outcome = delete(
            &store,
            ConflictClassifier::default(),
            DeleteRequest {
                operation_id: OperationId::new(),
                actor: alice(),
                record_id: current.id,
                expected_version: Some(1),
                base: Some(current.clone()),
            },
        )
        .await
        .unwrap();

        assert!(outcome.record.is_deleted);
        assert_eq!(outcome.record.version, 2);
        assert_eq!(outcome.record.deleted_by, Some(alice()));
        let stored = store.get(&current.id).unwrap();
        assert!(stored.is_deleted);
        assert!(stored.deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_deleted_record_is_not_found() {
        let store = MemoryStore::new();
        let current = seeded(&store).await;
        store.remote_edit(&current.id, |b| b.is_deleted = true).unwrap();

        let err = delete(
            &store,
            ConflictClassifier::default(),
            DeleteRequest {
                operation_id: OperationId::new(),
                actor: alice(),
                record_id: current.id,
                expected_version: None,
                base: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
