//! # Validation Errors
//!
//! Business-invariant violations caught before any write is attempted.

use thiserror::Error;

use super::ids::{ItemId, ParticipantId};

/// Result type for record validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A bill that must not be written
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Bill has no line items
    #[error("Bill must contain at least one item")]
    EmptyItems,

    /// Total amount is not a positive finite number
    #[error("Total amount must be positive and finite (got {0:.2})")]
    NonPositiveTotal(f64),

    /// Payer is not among the bill participants
    #[error("Payer {0} is not a participant of the bill")]
    PayerNotParticipant(ParticipantId),

    /// Item price is negative or not finite
    #[error("Item {0} has a negative or non-finite price")]
    NegativeItemPrice(ItemId),

    /// Item is assigned to someone outside the bill
    #[error("Item {item} is assigned to unknown participant {participant}")]
    UnknownItemParticipant {
        item: ItemId,
        participant: ParticipantId,
    },
}

impl ValidationError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyItems => "EMPTY_ITEMS",
            Self::NonPositiveTotal(_) => "NON_POSITIVE_TOTAL",
            Self::PayerNotParticipant(_) => "PAYER_NOT_PARTICIPANT",
            Self::NegativeItemPrice(_) => "NEGATIVE_ITEM_PRICE",
            Self::UnknownItemParticipant { .. } => "UNKNOWN_ITEM_PARTICIPANT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ValidationError::EmptyItems.code(), "EMPTY_ITEMS");
        assert_eq!(ValidationError::NonPositiveTotal(0.0).code(), "NON_POSITIVE_TOTAL");
        assert_eq!(
            ValidationError::PayerNotParticipant(ParticipantId::new("x")).code(),
            "PAYER_NOT_PARTICIPANT"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ValidationError::NonPositiveTotal(-1.5);
        assert_eq!(err.to_string(), "Total amount must be positive and finite (got -1.50)");
    }
}
