//! # In-Memory Store
//!
//! Process-local [`RemoteStore`] with a push feed and fault injection.
//! Backs the simulator and the test suites.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use super::adapter::{FeedFilter, RecordFeed, RemoteStore, TransactFn, WriteOp};
use super::errors::{StoreError, StoreResult, TxAbort};
use crate::record::{Bill, OperationId, RecordId};

/// A live feed subscriber
#[derive(Debug)]
struct Subscriber {
    filter: FeedFilter,
    sender: mpsc::UnboundedSender<Vec<Bill>>,
}

/// Injected misbehaviour
#[derive(Debug, Default)]
struct Faults {
    /// Delay before a request reaches the store
    latency: Duration,
    /// Delay between commit and acknowledgement
    ack_delay: Duration,
    /// Requests never reach the store and never return
    hang: bool,
    /// Every request fails with `Unavailable`
    unavailable: bool,
    /// One-shot failures returned before touching any record
    fail_next: VecDeque<StoreError>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<RecordId, Bill>,
    subscribers: Vec<Subscriber>,
    faults: Faults,
}

impl MemoryState {
    /// Push the current matching set to every live subscriber.
    fn publish(&mut self) {
        let records = &self.records;
        self.subscribers.retain(|sub| {
            let snapshot: Vec<Bill> = records
                .values()
                .filter(|b| sub.filter.matches(b))
                .cloned()
                .collect();
            sub.sender.send(snapshot).is_ok()
        });
    }

    fn take_failure(&mut self) -> Option<StoreError> {
        if self.faults.unavailable {
            return Some(StoreError::Unavailable("store offline".into()));
        }
        self.faults.fail_next.pop_front()
    }
}

/// Reject anything but the next version.
fn check_version(current: Option<&Bill>, next: &Bill) -> StoreResult<()> {
    let expected = current.map(|c| c.version + 1).unwrap_or(1);
    if next.version != expected {
        return Err(StoreError::Aborted(TxAbort::VersionRejected {
            expected,
            proposed: next.version,
        }));
    }
    Ok(())
}

/// In-memory remote store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::lock_poisoned())
    }

    /// Current server copy of a record, deleted or not.
    pub fn get(&self, record_id: &RecordId) -> Option<Bill> {
        self.lock().ok().and_then(|s| s.records.get(record_id).cloned())
    }

    /// Number of stored records, including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate a write from another participant or device.
    ///
    /// Applies `edit` to the current copy and commits it as the next
    /// version under a fresh operation id.
    pub fn remote_edit<F>(&self, record_id: &RecordId, edit: F) -> StoreResult<Bill>
    where
        F: FnOnce(&mut Bill),
    {
        let mut state = self.lock()?;
        let current = state
            .records
            .get(record_id)
            .cloned()
            .ok_or(StoreError::NotFound(*record_id))?;
        let mut next = current.clone();
        edit(&mut next);
        next.id = current.id;
        next.version = current.version + 1;
        next.operation_id = Some(OperationId::new());
        next.updated_at = chrono::Utc::now();
        state.records.insert(next.id, next.clone());
        state.publish();
        Ok(next)
    }

    /// Delay every request by `latency` before it reaches the store.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut s) = self.lock() {
            s.faults.latency = latency;
        }
    }

    /// Delay acknowledgements by `delay` after the commit has landed.
    pub fn set_ack_delay(&self, delay: Duration) {
        if let Ok(mut s) = self.lock() {
            s.faults.ack_delay = delay;
        }
    }

    /// Swallow requests: they neither commit nor return.
    pub fn set_hang(&self, hang: bool) {
        if let Ok(mut s) = self.lock() {
            s.faults.hang = hang;
        }
    }

    /// Fail every request with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut s) = self.lock() {
            s.faults.unavailable = unavailable;
        }
    }

    /// Fail the next request with `error`.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut s) = self.lock() {
            s.faults.fail_next.push_back(error);
        }
    }

    /// Wait out the injected request latency; never returns when hung.
    async fn arrive(&self) -> StoreResult<()> {
        let (latency, hang) = {
            let s = self.lock()?;
            (s.faults.latency, s.faults.hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    async fn acknowledge(&self) -> StoreResult<()> {
        let delay = self.lock()?.faults.ack_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn transact(&self, record_id: RecordId, mut body: TransactFn) -> StoreResult<Bill> {
        self.arrive().await?;

        let committed = {
            let mut state = self.lock()?;
            if let Some(err) = state.take_failure() {
                return Err(err);
            }

            let current = state.records.get(&record_id).cloned();
            let next = body(current.as_ref())?;
            if next.id != record_id {
                return Err(StoreError::Aborted(TxAbort::VersionRejected {
                    expected: current.map(|c| c.version + 1).unwrap_or(1),
                    proposed: next.version,
                }));
            }
            check_version(current.as_ref(), &next)?;

            state.records.insert(record_id, next.clone());
            state.publish();
            next
        };

        tracing::trace!(
            event = "STORE_COMMIT",
            record = %record_id,
            version = committed.version,
        );
        self.acknowledge().await?;
        Ok(committed)
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        self.arrive().await?;

        {
            let mut state = self.lock()?;
            if let Some(err) = state.take_failure() {
                return Err(err);
            }

            // Validate the whole batch before applying any of it.
            let mut staged = BTreeMap::new();
            for op in &ops {
                let bill = op.record();
                let current = staged
                    .get(&bill.id)
                    .or_else(|| state.records.get(&bill.id));
                match op {
                    WriteOp::Create(_) if current.is_some() => {
                        return Err(StoreError::Aborted(TxAbort::AlreadyExists(bill.id)));
                    }
                    WriteOp::Put(_) if current.is_none() => {
                        return Err(StoreError::NotFound(bill.id));
                    }
                    _ => {}
                }
                check_version(current, bill)?;
                staged.insert(bill.id, bill.clone());
            }

            state.records.extend(staged);
            state.publish();
        }

        self.acknowledge().await
    }

    fn subscribe(&self, filter: FeedFilter) -> RecordFeed {
        let (tx, rx) = mpsc::unbounded_channel();

        if let Ok(mut state) = self.lock() {
            let initial: Vec<Bill> = state
                .records
                .values()
                .filter(|b| filter.matches(b))
                .cloned()
                .collect();
            if tx.send(initial).is_ok() {
                state.subscribers.push(Subscriber { filter, sender: tx });
            }
        }

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|set| (set, rx)) }).boxed()
    }
}
