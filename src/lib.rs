//! billsync - Optimistic replication for shared bills
//!
//! Local edits apply immediately, are confirmed or rolled back by a remote
//! store, and reconcile against a live record feed. Conflicting edits are
//! classified by financial impact; confirmed changes fan out to the other
//! participants through a rate-limited delivery engine.

pub mod cli;
pub mod config;
pub mod conflict;
pub mod delivery;
pub mod observability;
pub mod operation;
pub mod record;
pub mod replication;
pub mod scheduler;
pub mod store;
