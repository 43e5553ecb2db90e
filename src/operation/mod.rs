//! # Optimistic Operations
//!
//! One in-flight mutation (create, update or delete) and its lifecycle.
//!
//! ```text
//!             ┌──────────────┐
//!             │  optimistic  │──────────────┐
//!             └──────┬───────┘              │
//!                    │ dispatched           │
//!             ┌──────▼───────┐              │
//!             │  confirming  │              │
//!             └──────┬───────┘              │
//!      ┌──────────┬──┴───────┬───────────┐  │
//!      ▼          ▼          ▼           ▼  ▼
//!  confirmed   failed    timed_out    cancelled
//!                 │
//!                 ▼
//!            rolled_back
//! ```
//!
//! Exactly one of confirmed, failed, timed_out or cancelled is reached per
//! operation. The only move out of a settled state is the delayed
//! `failed -> rolled_back` display transition.

mod errors;
mod handle;
mod operation;
mod state;

pub use errors::{TransitionError, TransitionResult};
pub use handle::OperationHandle;
pub use operation::{Mutation, OperationKind, OptimisticOperation};
pub use state::OperationState;
