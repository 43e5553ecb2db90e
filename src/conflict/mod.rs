//! # Conflict Detection and Resolution
//!
//! Compares two snapshots of the same bill at different versions and ranks
//! how dangerous it would be to merge them automatically.
//!
//! ## Severity
//!
//! | Difference | Severity |
//! |---|---|
//! | total or any computed share | critical |
//! | payer, line items | high |
//! | participant set | medium |
//! | name, currency | low |
//!
//! Financial differences are never merged silently. Only conflicts whose
//! fields are all cosmetic may be auto-resolved.

mod classifier;
mod prompt;
mod registry;
mod severity;

pub use classifier::{Conflict, ConflictClassifier, ConflictField, COSMETIC_FIELDS};
pub use prompt::{ConflictPrompt, PromptTier};
pub use registry::{ActiveConflict, ConflictRegistry, ResolutionPolicy};
pub use severity::ConflictSeverity;
