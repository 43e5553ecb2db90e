//! # Remote Store
//!
//! The remote document store is an external collaborator offering atomic
//! read-modify-write, all-or-nothing batch writes, and a push feed of
//! record snapshots. This module defines that seam, an in-process
//! implementation, and the optimistic-concurrency write protocol run
//! against it.
//!
//! ## Authority
//!
//! The store is the sole arbiter of version increments. A write must carry
//! exactly `current + 1` (or `1` for a new record); anything else aborts.

mod adapter;
mod errors;
mod memory;
pub mod protocol;

pub use adapter::{FeedFilter, RecordFeed, RemoteStore, TransactFn, WriteOp};
pub use errors::{StoreError, StoreResult, TxAbort};
pub use memory::MemoryStore;
pub use protocol::{CommitOutcome, DeleteRequest, UpdateRequest};
