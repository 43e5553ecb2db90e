//! # Bill Records
//!
//! The replicated entity. A [`Bill`] is an immutable snapshot carrying a
//! monotonic `version` and the `operation_id` of the write that produced it.
//!
//! ## Versioning
//!
//! - Versions start at 1 and grow by exactly 1 per accepted write
//! - Only the remote store persists an increment
//! - A draft that was never written carries version 0

mod bill;
mod errors;
mod ids;
mod validation;

pub use bill::{amounts_differ, Bill, LineItem, Participant, CURRENCY_EPSILON};
pub use errors::{ValidationError, ValidationResult};
pub use ids::{ItemId, OperationId, ParticipantId, RecordId};
pub use validation::validate_bill;
