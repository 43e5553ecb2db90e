//! Conflict Severity Tests
//!
//! Severity of a conflict is the maximum over the fields that differ:
//! - name, currency: low
//! - participants: medium
//! - payer, items: high
//! - total, shares: critical
//!
//! Only purely cosmetic conflicts may be merged without the user.

use std::collections::BTreeSet;

use billsync::conflict::{ConflictClassifier, ConflictField, ConflictPrompt, ConflictSeverity, PromptTier};
use billsync::record::{Bill, LineItem, OperationId, Participant, ParticipantId, CURRENCY_EPSILON};
use proptest::prelude::*;

fn classifier() -> ConflictClassifier {
    ConflictClassifier::new(CURRENCY_EPSILON)
}

fn base() -> Bill {
    let mut bill = Bill::draft("alice", "Groceries")
        .with_participant(Participant::new("alice", "Alice"))
        .with_participant(Participant::new("bob", "Bob"))
        .with_item(LineItem::new("Milk", 20.0, ["alice", "bob"]))
        .with_item(LineItem::new("Bread", 30.0, ["alice"]));
    bill.version = 3;
    bill
}

/// Server copy one version ahead with the selected edits applied.
#[derive(Debug, Clone, Copy)]
struct Edits {
    name: bool,
    currency: bool,
    participants: bool,
    payer: bool,
    items: bool,
    total: bool,
}

fn apply(edits: Edits, bill: &Bill) -> Bill {
    let mut server = bill.clone();
    server.version = bill.version + 1;
    if edits.name {
        server.name = "Weekly groceries".into();
    }
    if edits.currency {
        server.currency = "EUR".into();
    }
    if edits.participants {
        server.participants.push(Participant::new("dave", "Dave"));
    }
    if edits.payer {
        server.payer = "bob".into();
    }
    if edits.items {
        server.items[0].name = "Oat milk".into();
    }
    if edits.total {
        server.total_amount += 5.0;
    }
    server
}

fn expected_severity(edits: Edits) -> Option<ConflictSeverity> {
    [
        (edits.name, ConflictSeverity::Low),
        (edits.currency, ConflictSeverity::Low),
        (edits.participants, ConflictSeverity::Medium),
        (edits.payer, ConflictSeverity::High),
        (edits.items, ConflictSeverity::High),
        (edits.total, ConflictSeverity::Critical),
    ]
    .into_iter()
    .filter(|(changed, _)| *changed)
    .map(|(_, severity)| severity)
    .max()
}

// =============================================================================
// Examples
// =============================================================================

/// A concurrent rename alone is a low, auto-resolvable conflict.
#[test]
fn test_name_only_is_low_and_auto_resolvable() {
    let local = base();
    let server = apply(
        Edits { name: true, currency: false, participants: false, payer: false, items: false, total: false },
        &local,
    );

    let conflict = classifier().detect(OperationId::new(), &local, &server).unwrap();
    assert_eq!(conflict.severity, ConflictSeverity::Low);
    assert_eq!(conflict.local_version, 3);
    assert_eq!(conflict.server_version, 4);
    assert!(classifier().can_auto_resolve(&conflict));
}

/// A total change dominates every cosmetic difference.
#[test]
fn test_total_dominates_cosmetic_fields() {
    let local = base();
    let server = apply(
        Edits { name: true, currency: true, participants: false, payer: false, items: false, total: true },
        &local,
    );

    let conflict = classifier().detect(OperationId::new(), &local, &server).unwrap();
    assert_eq!(conflict.severity, ConflictSeverity::Critical);
    assert!(conflict.involves(ConflictField::TotalAmount));
    assert!(conflict.involves(ConflictField::Name));
    assert!(!classifier().can_auto_resolve(&conflict));

    let prompt = ConflictPrompt::for_conflict(&conflict);
    assert_eq!(prompt.tier, PromptTier::HardBlock);
    assert!(!prompt.dismissible);
}

/// Shares are compared per participant, not just in total.
#[test]
fn test_moving_an_item_between_sharers_is_critical() {
    let local = base();
    let mut server = local.clone();
    server.version = 4;
    server.items[1].participant_ids = BTreeSet::from([ParticipantId::new("bob")]);

    let conflict = classifier().detect(OperationId::new(), &local, &server).unwrap();
    assert_eq!(conflict.severity, ConflictSeverity::Critical);
    assert!(conflict.involves(ConflictField::Shares));
    assert!(!conflict.involves(ConflictField::TotalAmount));
}

/// A newer version with no semantic difference is not a conflict.
#[test]
fn test_timestamp_only_change_is_not_a_conflict() {
    let local = base();
    let mut server = local.clone();
    server.version = 4;
    server.updated_at = server.updated_at + chrono::Duration::seconds(30);

    assert!(classifier().detect(OperationId::new(), &local, &server).is_none());
}

// =============================================================================
// Properties
// =============================================================================

fn edits() -> impl Strategy<Value = Edits> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(name, currency, participants, payer, items, total)| Edits {
            name,
            currency,
            participants,
            payer,
            items,
            total,
        },
    )
}

proptest! {
    /// Severity is the maximum over the changed fields.
    #[test]
    fn prop_severity_is_max_over_fields(edits in edits()) {
        let local = base();
        let server = apply(edits, &local);
        let detected = classifier()
            .detect(OperationId::new(), &local, &server)
            .map(|c| c.severity);
        prop_assert_eq!(detected, expected_severity(edits));
    }

    /// Auto-resolution is allowed exactly when only name and currency moved.
    #[test]
    fn prop_auto_resolve_only_cosmetic(edits in edits()) {
        let local = base();
        let server = apply(edits, &local);
        if let Some(conflict) = classifier().detect(OperationId::new(), &local, &server) {
            let cosmetic = !(edits.participants || edits.payer || edits.items || edits.total);
            prop_assert_eq!(classifier().can_auto_resolve(&conflict), cosmetic);
        }
    }

    /// Price differences below one cent never raise a conflict.
    #[test]
    fn prop_sub_cent_total_drift_is_ignored(drift in -0.009f64..0.009) {
        let local = base();
        let mut server = local.clone();
        server.version = 4;
        server.total_amount += drift;
        prop_assert!(classifier().detect(OperationId::new(), &local, &server).is_none());
    }
}
