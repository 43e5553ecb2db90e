//! # Replication
//!
//! Optimistic replication of bills against a remote store.
//!
//! ```text
//!   UI ── submit ──▶ ReplicationCore ── transaction ──▶ RemoteStore
//!                      │    ▲                               │
//!            reconcile │    └────────── feed ───────────────┘
//!                      ▼
//!              optimistic view ──▶ balances
//!                      │
//!            confirmed └──▶ DeliveryHandle (fire and forget)
//! ```
//!
//! The optimistic view is always derived: confirmed snapshots plus the
//! effect of every live operation, replayed in issue order.

mod balance;
mod config;
mod core;
mod errors;
mod events;
mod reconcile;

pub use self::core::ReplicationCore;
pub use balance::{BalanceSummary, ParticipantBalance};
pub use config::ReplicationConfig;
pub use errors::{CoreError, CoreResult, OperationError};
pub use events::{ConflictDisposal, CoreEvent};
pub use reconcile::reconcile;
