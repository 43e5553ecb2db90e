//! Remote store seam.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use super::errors::StoreResult;
use crate::record::{Bill, ParticipantId, RecordId};

/// Read-modify-write body of a transaction.
///
/// Receives the current snapshot (`None` when absent) and returns the
/// snapshot to persist, or an error to abort without writing. Adapters may
/// invoke it more than once when they retry on contention.
pub type TransactFn = Box<dyn FnMut(Option<&Bill>) -> StoreResult<Bill> + Send>;

/// Push feed of record sets. Every item is the full current set matching
/// the subscription filter.
pub type RecordFeed = BoxStream<'static, Vec<Bill>>;

/// One document write inside a batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a new record at version 1; fails if the id exists
    Create(Bill),
    /// Replace an existing record with its next version
    Put(Bill),
}

impl WriteOp {
    pub fn record(&self) -> &Bill {
        match self {
            Self::Create(bill) | Self::Put(bill) => bill,
        }
    }
}

/// Which records a feed subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    /// Records owned by or shared with this actor
    pub actor: ParticipantId,
    /// Deliver soft-deleted records as well
    pub include_deleted: bool,
}

impl FeedFilter {
    /// Non-deleted records visible to `actor`.
    pub fn for_actor(actor: ParticipantId) -> Self {
        Self {
            actor,
            include_deleted: false,
        }
    }

    pub fn matches(&self, bill: &Bill) -> bool {
        (self.include_deleted || !bill.is_deleted) && bill.is_visible_to(&self.actor)
    }
}

/// Remote document store consumed by the replication core.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Atomic read-modify-write of one record.
    async fn transact(&self, record_id: RecordId, body: TransactFn) -> StoreResult<Bill>;

    /// All-or-nothing multi-document write.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()>;

    /// Subscribe to the records matching `filter`.
    fn subscribe(&self, filter: FeedFilter) -> RecordFeed;
}
