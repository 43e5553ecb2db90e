//! # Replication Core
//!
//! Dual-state store for one actor:
//!
//! - **confirmed**: snapshots from the store's feed and from acknowledged
//!   writes
//! - **optimistic view**: confirmed plus the effect of every live
//!   operation, rebuilt by [`reconcile`] after each change
//!
//! All mutation happens under one mutex. The feed task, transaction tasks
//! and timers only ever call back into the core, so the state has a
//! single writer at a time and reconciliation never runs concurrently with
//! itself. The lock is never held across an `.await`.
//!
//! Background tasks hold a `Weak` reference: dropping the last
//! [`ReplicationCore`] clone stops them from touching the state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::balance::BalanceSummary;
use super::config::ReplicationConfig;
use super::errors::{CoreError, CoreResult, OperationError};
use super::events::{ConflictDisposal, CoreEvent};
use super::reconcile::reconcile;
use crate::conflict::{ActiveConflict, Conflict, ConflictClassifier, ConflictRegistry, ConflictSeverity, ResolutionPolicy};
use crate::delivery::{DeliveryHandle, DeliveryRequest, NotificationPayload};
use crate::observability::{Event, MetricsRegistry};
use crate::operation::{Mutation, OperationHandle, OperationKind, OperationState, OptimisticOperation};
use crate::record::{validate_bill, Bill, OperationId, ParticipantId, RecordId};
use crate::scheduler::DelayedTask;
use crate::store::{
    protocol, CommitOutcome, DeleteRequest, FeedFilter, RemoteStore, StoreError, StoreResult, TxAbort, UpdateRequest,
};

/// An operation plus everything the core attaches to it.
struct LiveOperation {
    op: OptimisticOperation,
    state_tx: watch::Sender<OperationState>,
    error: Option<OperationError>,
    /// Timeout while pending, then the rollback or removal timer
    timer: Option<DelayedTask>,
    transaction: Option<AbortHandle>,
}

impl LiveOperation {
    /// Move to `next`, recording `error`. False if the move is illegal.
    fn settle(&mut self, next: OperationState, error: Option<OperationError>) -> bool {
        let moved = match &error {
            Some(err) => self.op.settle_with(next, err.user_message()),
            None => self.op.transition(next),
        };
        if moved.is_err() {
            return false;
        }
        if error.is_some() {
            self.error = error;
        }
        self.state_tx.send_replace(next);
        true
    }
}

#[derive(Default)]
struct CoreState {
    confirmed: BTreeMap<RecordId, Bill>,
    /// Acknowledged writes the feed has not shown yet
    pending_acks: HashMap<RecordId, Bill>,
    /// Highest version the feed has shown per record, kept after the
    /// record leaves the feed
    feed_versions: HashMap<RecordId, u64>,
    /// Records the feed showed once and has since dropped
    departed: HashSet<RecordId>,
    operations: HashMap<OperationId, LiveOperation>,
    next_sequence: u64,
    view: Vec<Bill>,
    balances: BalanceSummary,
    revision: u64,
    conflicts: ConflictRegistry,
    conflict_timers: HashMap<OperationId, DelayedTask>,
    feed: Option<JoinHandle<()>>,
}

impl CoreState {
    /// Highest version known for a record, from the feed or an ack.
    fn known_version(&self, id: &RecordId) -> u64 {
        let confirmed = self.confirmed.get(id).map(|b| b.version).unwrap_or(0);
        let acked = self.pending_acks.get(id).map(|b| b.version).unwrap_or(0);
        let fed = self.feed_versions.get(id).copied().unwrap_or(0);
        confirmed.max(acked).max(fed)
    }

    /// Fold an authoritative snapshot learned outside the feed.
    ///
    /// Deleted records never come back, so nothing is folded in for a
    /// record the feed has dropped.
    fn absorb(&mut self, record: Bill) {
        if self.known_version(&record.id) >= record.version || self.departed.contains(&record.id) {
            return;
        }
        if record.is_deleted {
            self.confirmed.remove(&record.id);
        } else {
            self.confirmed.insert(record.id, record.clone());
        }
        self.pending_acks.insert(record.id, record);
    }

    fn is_visible(&self, id: &RecordId) -> bool {
        self.view.iter().any(|b| &b.id == id)
    }
}

struct CoreInner {
    actor: ParticipantId,
    config: ReplicationConfig,
    store: Arc<dyn RemoteStore>,
    classifier: ConflictClassifier,
    delivery: Option<DeliveryHandle>,
    metrics: Arc<MetricsRegistry>,
    events: broadcast::Sender<CoreEvent>,
    state: Mutex<CoreState>,
}

/// Work handed to a transaction task.
enum Transaction {
    Create { draft: Bill },
    Update(UpdateRequest),
    Delete(DeleteRequest),
}

async fn execute(
    store: &dyn RemoteStore,
    classifier: ConflictClassifier,
    actor: &ParticipantId,
    operation_id: OperationId,
    transaction: Transaction,
) -> StoreResult<CommitOutcome> {
    match transaction {
        Transaction::Create { draft } => protocol::create(store, actor, draft, operation_id).await,
        Transaction::Update(request) => protocol::update(store, classifier, request).await,
        Transaction::Delete(request) => protocol::delete(store, classifier, request).await,
    }
}

/// Optimistic replication engine for one actor.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReplicationCore {
    inner: Arc<CoreInner>,
}

impl std::fmt::Debug for ReplicationCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCore")
            .field("actor", &self.inner.actor)
            .finish_non_exhaustive()
    }
}

impl ReplicationCore {
    /// Build a core acting as `actor` against `store`.
    ///
    /// Confirmed operations are fanned out through `delivery` when given.
    pub fn new(
        actor: impl Into<ParticipantId>,
        config: ReplicationConfig,
        store: Arc<dyn RemoteStore>,
        delivery: Option<DeliveryHandle>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let actor = actor.into();
        info!(event = Event::CoreStarted.as_str(), actor = %actor);
        Self {
            inner: Arc::new(CoreInner {
                classifier: ConflictClassifier::new(config.currency_epsilon),
                actor,
                config,
                store,
                delivery,
                metrics,
                events,
                state: Mutex::new(CoreState::default()),
            }),
        }
    }

    pub fn actor(&self) -> &ParticipantId {
        &self.inner.actor
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.inner.metrics)
    }

    /// Change notifications, pushed after every reconciliation and state
    /// change. Slow receivers skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, CoreState>> {
        self.inner.state.lock().map_err(|_| CoreError::lock_poisoned())
    }

    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn weak(&self) -> Weak<CoreInner> {
        Arc::downgrade(&self.inner)
    }

    /// Run `action` for `operation_id` after `delay`, if the core still exists.
    fn schedule(&self, delay: Duration, operation_id: OperationId, action: fn(&ReplicationCore, OperationId)) -> DelayedTask {
        let weak = self.weak();
        DelayedTask::after(delay, move || {
            if let Some(inner) = weak.upgrade() {
                action(&ReplicationCore { inner }, operation_id);
            }
        })
    }

    // ==================
    // Submission
    // ==================

    /// Apply a mutation optimistically and send it to the store.
    ///
    /// Invalid bills are rejected here, before any optimistic effect. The
    /// returned handle tracks the operation to its outcome. Must be called
    /// within a tokio runtime.
    pub fn submit(&self, mutation: Mutation) -> CoreResult<OperationHandle> {
        let inner = &self.inner;
        let kind = mutation.kind();
        let target = mutation.target();

        if let Mutation::Create(bill) | Mutation::Update(bill) = &mutation {
            if let Err(err) = validate_bill(bill) {
                inner.metrics.increment_operations_rejected();
                warn!(
                    event = Event::OperationRejected.as_str(),
                    kind = %kind,
                    record = %target,
                    code = err.code(),
                    "{}",
                    err
                );
                return Err(err.into());
            }
        }

        let mut state = self.lock()?;

        let (proposed, base, expected_version) = match mutation {
            Mutation::Create(mut draft) => {
                draft.owner = inner.actor.clone();
                draft.version = 0;
                draft.operation_id = None;
                (Some(draft), None, None)
            }
            Mutation::Update(bill) => {
                if !state.confirmed.contains_key(&target) && !state.is_visible(&target) {
                    return Err(CoreError::UnknownRecord(target));
                }
                let expected = (bill.version > 0).then_some(bill.version);
                // Only a base of the exact version the edit was made on is useful
                // for a three-way merge.
                let base = state
                    .confirmed
                    .get(&target)
                    .filter(|b| Some(b.version) == expected)
                    .cloned();
                (Some(bill), base, expected)
            }
            Mutation::Delete(_) => {
                let base = state
                    .confirmed
                    .get(&target)
                    .cloned()
                    .or_else(|| state.view.iter().find(|b| b.id == target).cloned());
                let Some(base) = base else {
                    return Err(CoreError::UnknownRecord(target));
                };
                let expected = (base.version > 0).then_some(base.version);
                (None, Some(base), expected)
            }
        };

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let deadline = Instant::now() + inner.config.operation_timeout;
        let op = OptimisticOperation::new(
            sequence,
            kind,
            target,
            proposed,
            base,
            expected_version,
            inner.actor.clone(),
            deadline,
        );
        let operation_id = op.id;

        let transaction = match kind {
            OperationKind::Create => Transaction::Create {
                draft: op.proposed.clone().ok_or(CoreError::Internal("create without proposal".into()))?,
            },
            OperationKind::Update => Transaction::Update(UpdateRequest {
                operation_id,
                actor: inner.actor.clone(),
                proposed: op.proposed.clone().ok_or(CoreError::Internal("update without proposal".into()))?,
                expected_version: op.expected_version,
                base: op.base.clone(),
            }),
            OperationKind::Delete => Transaction::Delete(DeleteRequest {
                operation_id,
                actor: inner.actor.clone(),
                record_id: target,
                expected_version: op.expected_version,
                base: op.base.clone(),
            }),
        };

        let (state_tx, state_rx) = watch::channel(OperationState::Optimistic);
        let handle = OperationHandle::new(operation_id, target, kind, state_rx);

        let weak = self.weak();
        let timer = DelayedTask::at(deadline, move || {
            if let Some(inner) = weak.upgrade() {
                ReplicationCore { inner }.on_timeout(operation_id);
            }
        });

        state.operations.insert(
            operation_id,
            LiveOperation {
                op,
                state_tx,
                error: None,
                timer: Some(timer),
                transaction: None,
            },
        );

        inner.metrics.increment_operations_submitted();
        info!(
            event = Event::OperationSubmitted.as_str(),
            operation = %operation_id,
            kind = %kind,
            record = %target,
            sequence,
        );
        self.refresh(&mut state);

        let task = tokio::spawn({
            let weak = self.weak();
            let store = Arc::clone(&inner.store);
            let classifier = inner.classifier;
            let actor = inner.actor.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => ReplicationCore { inner }.mark_confirming(operation_id),
                    None => return,
                }
                let result = execute(store.as_ref(), classifier, &actor, operation_id, transaction).await;
                if let Some(inner) = weak.upgrade() {
                    ReplicationCore { inner }.complete(operation_id, result);
                }
            }
        });
        if let Some(live) = state.operations.get_mut(&operation_id) {
            live.transaction = Some(task.abort_handle());
        }

        Ok(handle)
    }

    fn mark_confirming(&self, operation_id: OperationId) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        let Some(live) = state.operations.get_mut(&operation_id) else {
            return;
        };
        if live.op.state() != OperationState::Optimistic || !live.settle(OperationState::Confirming, None) {
            return;
        }
        let record_id = live.op.target;
        self.emit(CoreEvent::OperationChanged {
            operation_id,
            record_id,
            state: OperationState::Confirming,
        });
        self.refresh(&mut state);
    }

    // ==================
    // Outcomes
    // ==================

    /// Handle the transaction result. The first outcome wins; anything
    /// arriving after the operation settled is discarded.
    fn complete(&self, operation_id: OperationId, result: StoreResult<CommitOutcome>) {
        let inner = &self.inner;
        let mut guard = match self.lock() {
            Ok(guard) => guard,
            Err(err) => {
                error!(operation = %operation_id, "{}", err);
                return;
            }
        };
        let state = &mut *guard;

        let Some(live) = state.operations.get_mut(&operation_id) else {
            self.discard_late(operation_id, None);
            return;
        };
        if !live.op.is_live() {
            let settled = live.op.state();
            self.discard_late(operation_id, Some(settled));
            return;
        }
        live.transaction = None;
        let kind = live.op.kind;
        let record_id = live.op.target;

        match result {
            Ok(outcome) => {
                live.settle(OperationState::Confirmed, None);
                live.timer = Some(self.schedule(inner.config.confirmed_grace, operation_id, Self::remove_operation));

                inner.metrics.increment_operations_confirmed();
                info!(
                    event = Event::OperationConfirmed.as_str(),
                    operation = %operation_id,
                    kind = %kind,
                    record = %record_id,
                    version = outcome.record.version,
                );
                if let Some(conflict) = &outcome.auto_resolved {
                    inner.metrics.increment_conflicts_auto_resolved();
                    info!(
                        event = Event::ConflictAutoResolved.as_str(),
                        operation = %operation_id,
                        record = %record_id,
                        severity = %conflict.severity,
                        local_version = conflict.local_version,
                        server_version = conflict.server_version,
                    );
                }

                self.notify_participants(kind, operation_id, &outcome.record);
                state.absorb(outcome.record);
                self.emit(CoreEvent::OperationChanged {
                    operation_id,
                    record_id,
                    state: OperationState::Confirmed,
                });
            }
            Err(StoreError::Aborted(TxAbort::Conflict { conflict, server })) => {
                let local = match &live.op.proposed {
                    Some(proposed) => proposed.clone(),
                    None => {
                        // A losing delete is represented by its tombstone.
                        let mut tombstone = live.op.base.clone().unwrap_or_else(|| (*server).clone());
                        tombstone.is_deleted = true;
                        tombstone.deleted_by = Some(inner.actor.clone());
                        tombstone
                    }
                };
                let base = live.op.base.clone();
                live.settle(
                    OperationState::Failed,
                    Some(OperationError::ConflictDetected(conflict.clone())),
                );
                live.timer = Some(self.schedule(inner.config.rollback_delay, operation_id, Self::roll_back));

                inner.metrics.increment_operations_failed();
                state.absorb((*server).clone());
                self.register_conflict(state, *conflict, local, *server, base);
                self.emit(CoreEvent::OperationChanged {
                    operation_id,
                    record_id,
                    state: OperationState::Failed,
                });
            }
            Err(err) => {
                let error = OperationError::from(err);
                warn!(
                    event = Event::OperationFailed.as_str(),
                    operation = %operation_id,
                    kind = %kind,
                    record = %record_id,
                    code = error.code(),
                    "{}",
                    error
                );
                live.settle(OperationState::Failed, Some(error));
                live.timer = Some(self.schedule(inner.config.rollback_delay, operation_id, Self::roll_back));
                inner.metrics.increment_operations_failed();
                self.emit(CoreEvent::OperationChanged {
                    operation_id,
                    record_id,
                    state: OperationState::Failed,
                });
            }
        }

        self.refresh(state);
    }

    fn discard_late(&self, operation_id: OperationId, settled: Option<OperationState>) {
        self.inner.metrics.increment_late_outcomes_discarded();
        debug!(
            event = Event::LateOutcomeDiscarded.as_str(),
            operation = %operation_id,
            settled = settled.map(|s| s.as_str()).unwrap_or("removed"),
        );
    }

    fn notify_participants(&self, kind: OperationKind, operation_id: OperationId, record: &Bill) {
        if let Some(delivery) = &self.inner.delivery {
            let payload = NotificationPayload::for_operation(kind, operation_id, &self.inner.actor, record);
            delivery.notify(DeliveryRequest::for_participants(payload, record));
        }
    }

    /// Deadline fired before any outcome.
    fn on_timeout(&self, operation_id: OperationId) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;
        let Some(live) = state.operations.get_mut(&operation_id) else {
            return;
        };
        if !live.settle(OperationState::TimedOut, Some(OperationError::Timeout)) {
            return;
        }
        // The transaction keeps running; its outcome will be discarded.
        live.timer = Some(self.schedule(self.inner.config.rolled_back_grace, operation_id, Self::remove_operation));
        let record_id = live.op.target;

        self.inner.metrics.increment_operations_timed_out();
        warn!(
            event = Event::OperationTimedOut.as_str(),
            operation = %operation_id,
            record = %record_id,
        );
        self.emit(CoreEvent::OperationChanged {
            operation_id,
            record_id,
            state: OperationState::TimedOut,
        });
        self.refresh(state);
    }

    /// `failed -> rolled_back` after the rollback delay.
    fn roll_back(&self, operation_id: OperationId) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let Some(live) = guard.operations.get_mut(&operation_id) else {
            return;
        };
        if !live.settle(OperationState::RolledBack, None) {
            return;
        }
        live.timer = Some(self.schedule(self.inner.config.rolled_back_grace, operation_id, Self::remove_operation));
        let record_id = live.op.target;

        self.inner.metrics.increment_operations_rolled_back();
        debug!(
            event = Event::OperationRolledBack.as_str(),
            operation = %operation_id,
            record = %record_id,
        );
        self.emit(CoreEvent::OperationChanged {
            operation_id,
            record_id,
            state: OperationState::RolledBack,
        });
        self.refresh(&mut guard);
    }

    fn remove_operation(&self, operation_id: OperationId) {
        if let Ok(mut state) = self.lock() {
            if let Some(live) = state.operations.remove(&operation_id) {
                debug!(operation = %operation_id, state = %live.op.state(), "operation removed");
            }
        }
    }

    /// Cancel a pending operation.
    ///
    /// Idempotent: returns false when the operation is unknown or already
    /// settled.
    pub fn cancel(&self, operation_id: OperationId) -> CoreResult<bool> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let Some(live) = state.operations.get_mut(&operation_id) else {
            return Ok(false);
        };
        if !live.settle(OperationState::Cancelled, Some(OperationError::Cancelled)) {
            return Ok(false);
        }
        if let Some(transaction) = live.transaction.take() {
            transaction.abort();
        }
        live.timer = Some(self.schedule(self.inner.config.rolled_back_grace, operation_id, Self::remove_operation));
        let record_id = live.op.target;

        self.inner.metrics.increment_operations_cancelled();
        info!(
            event = Event::OperationCancelled.as_str(),
            operation = %operation_id,
            record = %record_id,
        );
        self.emit(CoreEvent::OperationChanged {
            operation_id,
            record_id,
            state: OperationState::Cancelled,
        });
        self.refresh(state);
        Ok(true)
    }

    // ==================
    // Conflicts
    // ==================

    fn register_conflict(&self, state: &mut CoreState, conflict: Conflict, local: Bill, server: Bill, base: Option<Bill>) {
        let operation_id = conflict.operation_id;
        let record_id = conflict.record_id;
        let severity = conflict.severity;
        let fields: Vec<&str> = conflict.conflicting_fields.iter().map(|f| f.as_str()).collect();

        self.inner.metrics.increment_conflicts_detected();
        warn!(
            event = Event::ConflictDetected.as_str(),
            operation = %operation_id,
            record = %record_id,
            severity = %severity,
            local_version = conflict.local_version,
            server_version = conflict.server_version,
            fields = %fields.join(","),
        );

        state.conflicts.register(conflict, local, server, base);
        if severity == ConflictSeverity::Low {
            let timer = self.schedule(self.inner.config.low_conflict_expiry, operation_id, Self::expire_conflict);
            state.conflict_timers.insert(operation_id, timer);
        }
        self.emit(CoreEvent::ConflictRegistered {
            operation_id,
            record_id,
            severity,
        });
    }

    fn expire_conflict(&self, operation_id: OperationId) {
        let Ok(mut state) = self.lock() else {
            return;
        };
        state.conflict_timers.remove(&operation_id);
        if state.conflicts.remove(&operation_id).is_none() {
            return;
        }
        self.inner.metrics.increment_conflicts_expired();
        debug!(event = Event::ConflictExpired.as_str(), operation = %operation_id);
        self.emit(CoreEvent::ConflictCleared {
            operation_id,
            disposal: ConflictDisposal::Expired,
        });
    }

    /// Dispose of an active conflict.
    ///
    /// `AcceptServer` and `Cancel` only dismiss it. The other policies
    /// submit a new operation on top of the server version and return its
    /// handle. A resubmission that `submit` rejects leaves the conflict
    /// active.
    pub fn resolve_conflict(
        &self,
        operation_id: OperationId,
        policy: ResolutionPolicy,
    ) -> CoreResult<Option<OperationHandle>> {
        let active = {
            let mut state = self.lock()?;
            let active = state
                .conflicts
                .get(&operation_id)
                .cloned()
                .ok_or(CoreError::ConflictNotFound(operation_id))?;
            state.absorb(active.server.clone());
            self.refresh(&mut state);
            active
        };

        let policy_name = policy.as_str();
        let ActiveConflict { local, server, base, .. } = active;
        let resubmit = match policy {
            ResolutionPolicy::AcceptServer | ResolutionPolicy::Cancel => None,
            ResolutionPolicy::AcceptLocal => Some(local),
            ResolutionPolicy::Merge if local.is_deleted => Some(local),
            ResolutionPolicy::Merge => Some(self.inner.classifier.merge(&local, &server, base.as_ref())),
            ResolutionPolicy::Manual(bill) => Some(*bill),
        };

        let handle = match resubmit {
            None => None,
            Some(resubmit) => {
                let mutation = if resubmit.is_deleted {
                    Mutation::Delete(server.id)
                } else {
                    let mut bill = resubmit;
                    bill.id = server.id;
                    bill.version = server.version;
                    Mutation::Update(bill)
                };
                Some(self.submit(mutation)?)
            }
        };

        let mut state = self.lock()?;
        state.conflict_timers.remove(&operation_id);
        if state.conflicts.remove(&operation_id).is_some() {
            self.inner.metrics.increment_conflicts_resolved();
            info!(
                event = Event::ConflictResolved.as_str(),
                operation = %operation_id,
                record = %server.id,
                policy = policy_name,
            );
            self.emit(CoreEvent::ConflictCleared {
                operation_id,
                disposal: ConflictDisposal::Resolved,
            });
        }
        Ok(handle)
    }

    // ==================
    // Feed
    // ==================

    /// Replace the confirmed map with a feed snapshot set.
    ///
    /// A snapshot older than the copy already held is ignored for that
    /// record. Writes this core has had acknowledged stay visible until
    /// the feed catches up with them, or until the feed drops the record.
    /// A record that leaves the feed is not brought back by a late ack.
    pub fn apply_feed(&self, records: Vec<Bill>) {
        let Ok(mut guard) = self.lock() else {
            return;
        };
        let state = &mut *guard;

        let present: HashSet<RecordId> = records.iter().map(|b| b.id).collect();
        let live: HashSet<RecordId> = records.iter().filter(|b| !b.is_deleted).map(|b| b.id).collect();
        let seen: HashMap<RecordId, u64> = records.iter().map(|b| (b.id, b.version)).collect();
        let mut next = BTreeMap::new();
        let mut stale = 0usize;

        for record in records {
            if record.is_deleted {
                continue;
            }
            if state.known_version(&record.id) > record.version {
                stale += 1;
                debug!(
                    event = Event::StaleSnapshotIgnored.as_str(),
                    record = %record.id,
                    version = record.version,
                    known = state.known_version(&record.id),
                );
                if let Some(current) = state.confirmed.get(&record.id) {
                    next.insert(record.id, current.clone());
                }
                continue;
            }
            state.pending_acks.remove(&record.id);
            next.insert(record.id, record);
        }

        for (id, version) in &seen {
            let highest = state.feed_versions.entry(*id).or_insert(0);
            *highest = (*highest).max(*version);
        }
        for id in state.feed_versions.keys() {
            if live.contains(id) {
                state.departed.remove(id);
            } else {
                state.departed.insert(*id);
            }
        }

        // Acked writes the feed has not delivered yet. An ack is dropped
        // once the feed reaches its version or stops showing the record.
        // A missing tombstone means the feed has caught up with the delete.
        let departed = &state.departed;
        let feed_versions = &state.feed_versions;
        state.pending_acks.retain(|id, ack| {
            let caught_up = feed_versions.get(id).is_some_and(|v| *v >= ack.version);
            let gone = departed.contains(id) || (ack.is_deleted && !present.contains(id));
            !(caught_up || gone)
        });
        for (id, ack) in &state.pending_acks {
            if !ack.is_deleted {
                next.entry(*id).or_insert_with(|| ack.clone());
            }
        }

        state.confirmed = next;
        self.inner.metrics.increment_feed_updates();
        self.inner.metrics.add_stale_snapshots_ignored(stale as u64);
        debug!(
            event = Event::FeedApplied.as_str(),
            records = state.confirmed.len(),
            stale,
        );
        self.refresh(state);
    }

    /// Subscribe to the store's feed for this actor and apply every update.
    pub fn attach_feed(&self) -> CoreResult<()> {
        let mut feed = self.inner.store.subscribe(FeedFilter::for_actor(self.inner.actor.clone()));
        let weak = self.weak();
        let actor = self.inner.actor.clone();
        let task = tokio::spawn(async move {
            while let Some(records) = feed.next().await {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                ReplicationCore { inner }.apply_feed(records);
            }
            info!(event = Event::FeedClosed.as_str(), actor = %actor);
        });

        let mut state = self.lock()?;
        if let Some(previous) = state.feed.replace(task) {
            previous.abort();
        }
        info!(event = Event::FeedAttached.as_str(), actor = %self.inner.actor);
        Ok(())
    }

    // ==================
    // Views
    // ==================

    /// Rebuild the optimistic view and balances. Returns the view.
    pub fn reconcile(&self) -> CoreResult<Vec<Bill>> {
        let mut state = self.lock()?;
        self.refresh(&mut state);
        Ok(state.view.clone())
    }

    fn refresh(&self, state: &mut CoreState) {
        state.view = reconcile(&state.confirmed, state.operations.values().map(|l| &l.op));
        state.balances = BalanceSummary::from_records(&state.view);
        state.revision += 1;
        self.emit(CoreEvent::ViewReconciled {
            revision: state.revision,
            records: state.view.len(),
        });
    }

    /// Confirmed snapshots plus every live operation's effect.
    pub fn optimistic_view(&self) -> CoreResult<Vec<Bill>> {
        Ok(self.lock()?.view.clone())
    }

    /// Snapshots the store has confirmed, ordered by record id.
    pub fn confirmed_view(&self) -> CoreResult<Vec<Bill>> {
        Ok(self.lock()?.confirmed.values().cloned().collect())
    }

    /// Balances over the optimistic view.
    pub fn aggregate_balances(&self) -> CoreResult<BalanceSummary> {
        Ok(self.lock()?.balances.clone())
    }

    /// Conflicts awaiting disposal, oldest first.
    pub fn active_conflicts(&self) -> CoreResult<Vec<ActiveConflict>> {
        Ok(self.lock()?.conflicts.list().into_iter().cloned().collect())
    }

    /// Operations not yet garbage-collected, in issue order.
    pub fn operations(&self) -> CoreResult<Vec<OptimisticOperation>> {
        let state = self.lock()?;
        let mut ops: Vec<_> = state.operations.values().map(|l| l.op.clone()).collect();
        ops.sort_by_key(|op| op.sequence);
        Ok(ops)
    }

    pub fn operation(&self, operation_id: OperationId) -> CoreResult<Option<OptimisticOperation>> {
        Ok(self.lock()?.operations.get(&operation_id).map(|l| l.op.clone()))
    }

    /// Why an operation did not confirm, while it is still tracked.
    pub fn operation_error(&self, operation_id: OperationId) -> CoreResult<Option<OperationError>> {
        Ok(self.lock()?.operations.get(&operation_id).and_then(|l| l.error.clone()))
    }

    /// Stop the feed, cancel pending operations and drop every timer.
    pub fn shutdown(&self) -> CoreResult<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        if let Some(feed) = state.feed.take() {
            feed.abort();
        }
        for live in state.operations.values_mut() {
            live.timer = None;
            if let Some(transaction) = live.transaction.take() {
                transaction.abort();
            }
            if live.settle(OperationState::Cancelled, Some(OperationError::Cancelled)) {
                self.inner.metrics.increment_operations_cancelled();
            }
        }
        state.conflict_timers.clear();
        self.refresh(state);
        info!(event = Event::CoreStopped.as_str(), actor = %self.inner.actor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LineItem, Participant};
    use crate::store::MemoryStore;

    fn core(store: &Arc<MemoryStore>) -> ReplicationCore {
        ReplicationCore::new(
            "alice",
            ReplicationConfig::default(),
            Arc::clone(store) as Arc<dyn RemoteStore>,
            None,
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn draft() -> Bill {
        Bill::draft("alice", "Dinner")
            .with_participant(Participant::new("alice", "Alice"))
            .with_participant(Participant::new("bob", "Bob"))
            .with_item(LineItem::new("Pasta", 42.0, ["alice", "bob"]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_confirms_and_is_collected() {
        let store = Arc::new(MemoryStore::new());
        let core = core(&store);

        let handle = core.submit(Mutation::Create(draft())).unwrap();
        assert_eq!(core.optimistic_view().unwrap().len(), 1);
        assert!(core.confirmed_view().unwrap().is_empty());

        assert_eq!(handle.settled().await, OperationState::Confirmed);
        let confirmed = core.confirmed_view().unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].version, 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(core.operation(handle.id()).unwrap().is_none());
        assert_eq!(core.optimistic_view().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_create_rejected_synchronously() {
        let store = Arc::new(MemoryStore::new());
        let core = core(&store);

        let err = core.submit(Mutation::Create(Bill::draft("alice", "Empty"))).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(core.optimistic_view().unwrap().is_empty());
        assert!(core.operations().unwrap().is_empty());
        assert_eq!(core.metrics().snapshot().operations_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let core = core(&store);
        store.fail_next(StoreError::Unavailable("offline".into()));

        let handle = core.submit(Mutation::Create(draft())).unwrap();
        assert_eq!(handle.settled().await, OperationState::Failed);
        assert!(core.optimistic_view().unwrap().is_empty());
        assert_eq!(core.operation_error(handle.id()).unwrap().map(|e| e.code()), Some("UNAVAILABLE"));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(handle.state(), OperationState::RolledBack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.set_hang(true);
        let core = core(&store);

        let handle = core.submit(Mutation::Create(draft())).unwrap();
        assert!(core.cancel(handle.id()).unwrap());
        assert!(!core.cancel(handle.id()).unwrap());
        assert_eq!(handle.state(), OperationState::Cancelled);
        assert!(core.optimistic_view().unwrap().is_empty());
        assert_eq!(core.metrics().snapshot().operations_cancelled, 1);

        // Timer was freed: no timeout after the deadline.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(core.metrics().snapshot().operations_timed_out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_unknown_record() {
        let store = Arc::new(MemoryStore::new());
        let core = core(&store);
        let mut bill = draft();
        bill.version = 1;
        let err = core.submit(Mutation::Update(bill)).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_RECORD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_published() {
        let store = Arc::new(MemoryStore::new());
        let core = core(&store);
        let mut events = core.subscribe();

        let handle = core.submit(Mutation::Create(draft())).unwrap();
        handle.settled().await;

        let mut saw_confirmed = false;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::OperationChanged { state: OperationState::Confirmed, operation_id, .. } = event {
                saw_confirmed = operation_id == handle.id();
            }
        }
        assert!(saw_confirmed);
    }
}
