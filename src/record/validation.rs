//! # Bill Validation
//!
//! Checks run synchronously before any optimistic effect is applied.

use super::bill::Bill;
use super::errors::{ValidationError, ValidationResult};

/// Validate the business invariants of a bill about to be written.
///
/// - at least one line item
/// - positive, finite total
/// - payer is a participant
/// - item prices are finite and non-negative
/// - items only reference participants
pub fn validate_bill(bill: &Bill) -> ValidationResult<()> {
    if bill.items.is_empty() {
        return Err(ValidationError::EmptyItems);
    }

    if !bill.total_amount.is_finite() || bill.total_amount <= 0.0 {
        return Err(ValidationError::NonPositiveTotal(bill.total_amount));
    }

    let participants = bill.participant_ids();
    if !participants.contains(&bill.payer) {
        return Err(ValidationError::PayerNotParticipant(bill.payer.clone()));
    }

    for item in &bill.items {
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(ValidationError::NegativeItemPrice(item.id));
        }
        if let Some(unknown) = item
            .participant_ids
            .iter()
            .find(|id| !participants.contains(*id))
        {
            return Err(ValidationError::UnknownItemParticipant {
                item: item.id,
                participant: unknown.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LineItem, Participant, ParticipantId};

    fn valid() -> Bill {
        Bill::draft("alice", "Groceries")
            .with_participant(Participant::new("alice", "Alice"))
            .with_participant(Participant::new("bob", "Bob"))
            .with_item(LineItem::new("Bread", 4.0, ["alice", "bob"]))
    }

    #[test]
    fn test_valid_bill() {
        assert!(validate_bill(&valid()).is_ok());
    }

    #[test]
    fn test_empty_items_rejected() {
        let bill = Bill::draft("alice", "Empty")
            .with_participant(Participant::new("alice", "Alice"))
            .with_total(10.0);
        assert_eq!(validate_bill(&bill), Err(ValidationError::EmptyItems));
    }

    #[test]
    fn test_non_positive_total_rejected() {
        let bill = valid().with_total(0.0);
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NonPositiveTotal(_))));
    }

    #[test]
    fn test_nan_total_rejected() {
        let bill = valid().with_total(f64::NAN);
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NonPositiveTotal(_))));
    }

    #[test]
    fn test_infinite_total_rejected() {
        let bill = valid().with_total(f64::INFINITY);
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NonPositiveTotal(_))));
    }

    #[test]
    fn test_payer_must_participate() {
        let bill = valid().with_payer("carol");
        assert_eq!(
            validate_bill(&bill),
            Err(ValidationError::PayerNotParticipant(ParticipantId::new("carol")))
        );
    }

    #[test]
    fn test_item_participant_must_be_known() {
        let bill = valid().with_item(LineItem::new("Cheese", 6.0, ["dave"]));
        assert!(matches!(
            validate_bill(&bill),
            Err(ValidationError::UnknownItemParticipant { .. })
        ));
    }

    #[test]
    fn test_negative_price_rejected() {
        let bill = valid().with_item(LineItem::new("Refund", -2.0, ["bob"]));
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NegativeItemPrice(_))));
    }

    #[test]
    fn test_non_finite_price_rejected() {
        let bill = valid()
            .with_item(LineItem::new("Wine", f64::INFINITY, ["bob"]))
            .with_total(20.0);
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NegativeItemPrice(_))));

        let bill = valid()
            .with_item(LineItem::new("Wine", f64::NAN, ["bob"]))
            .with_total(20.0);
        assert!(matches!(validate_bill(&bill), Err(ValidationError::NegativeItemPrice(_))));
    }
}
