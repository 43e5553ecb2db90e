//! # Delivery Errors
//!
//! Delivery failures stay inside the engine: they are counted, retried and
//! eventually dropped, never returned to the operation that triggered them.

use thiserror::Error;

use crate::record::ParticipantId;

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Delivery errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Downstream channel refused or lost the notification
    #[error("Transport failure: {0}")]
    Transport(String),

    /// No delivery token is known for the recipient
    #[error("No token for recipient {0}")]
    Unresolved(ParticipantId),

    /// The engine has shut down
    #[error("Delivery engine stopped")]
    Stopped,
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "DELIVERY_TRANSPORT",
            Self::Unresolved(_) => "DELIVERY_UNRESOLVED",
            Self::Stopped => "DELIVERY_STOPPED",
        }
    }
}
