//! # Reconciliation
//!
//! The optimistic view is derived, never stored on its own: start from the
//! confirmed map and replay every live operation in issue order.
//!
//! - create: insert the proposal unless the id is already confirmed
//! - update: replace the entry, if present
//! - delete: remove the entry
//!
//! Settled operations contribute nothing. The function is pure, so running
//! it twice over the same inputs yields the same view.

use std::collections::BTreeMap;

use crate::operation::{OperationKind, OptimisticOperation};
use crate::record::{Bill, RecordId};

/// Rebuild the optimistic view from confirmed snapshots and operations.
///
/// Operations may be passed in any order; they are applied by sequence.
/// The result is ordered by record id.
pub fn reconcile<'a, I>(confirmed: &BTreeMap<RecordId, Bill>, operations: I) -> Vec<Bill>
where
    I: IntoIterator<Item = &'a OptimisticOperation>,
{
    let mut view: BTreeMap<RecordId, Bill> = confirmed
        .iter()
        .filter(|(_, bill)| !bill.is_deleted)
        .map(|(id, bill)| (*id, bill.clone()))
        .collect();

    let mut live: Vec<&OptimisticOperation> = operations.into_iter().filter(|op| op.is_live()).collect();
    live.sort_by_key(|op| op.sequence);

    for op in live {
        match (op.kind, op.proposed.as_ref()) {
            (OperationKind::Create, Some(proposed)) => {
                view.entry(op.target).or_insert_with(|| proposed.clone());
            }
            (OperationKind::Update, Some(proposed)) => {
                if let Some(entry) = view.get_mut(&op.target) {
                    *entry = proposed.clone();
                }
            }
            (OperationKind::Delete, _) => {
                view.remove(&op.target);
            }
            // Create or update without a proposal has no effect.
            _ => {}
        }
    }

    view.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationState;
    use crate::record::{LineItem, Participant, ParticipantId};
    use proptest::prelude::*;
    use tokio::time::Instant;

    fn bill(name: &str) -> Bill {
        Bill::draft("alice", name)
            .with_participant(Participant::new("alice", "Alice"))
            .with_item(LineItem::new("Item", 10.0, ["alice"]))
    }

    fn op(sequence: u64, kind: OperationKind, target: RecordId, proposed: Option<Bill>) -> OptimisticOperation {
        OptimisticOperation::new(
            sequence,
            kind,
            target,
            proposed,
            None,
            None,
            ParticipantId::new("alice"),
            Instant::now(),
        )
    }

    fn confirmed(bills: &[Bill]) -> BTreeMap<RecordId, Bill> {
        bills.iter().map(|b| (b.id, b.clone())).collect()
    }

    #[test]
    fn test_create_appears_once() {
        let draft = bill("Lunch");
        let create = op(0, OperationKind::Create, draft.id, Some(draft.clone()));

        let view = reconcile(&BTreeMap::new(), [&create]);
        assert_eq!(view.len(), 1);

        // Server caught up while the create is still live.
        let mut stored = draft.clone();
        stored.version = 1;
        let view = reconcile(&confirmed(&[stored.clone()]), [&create]);
        assert_eq!(view, vec![stored]);
    }

    #[test]
    fn test_update_requires_existing_entry() {
        let current = bill("Lunch");
        let mut edited = current.clone();
        edited.name = "Brunch".into();
        let update = op(0, OperationKind::Update, current.id, Some(edited));

        assert!(reconcile(&BTreeMap::new(), [&update]).is_empty());
        let view = reconcile(&confirmed(&[current]), [&update]);
        assert_eq!(view[0].name, "Brunch");
    }

    #[test]
    fn test_issue_order_not_argument_order() {
        let current = bill("Lunch");
        let mut first = current.clone();
        first.name = "First".into();
        let mut second = current.clone();
        second.name = "Second".into();

        let a = op(1, OperationKind::Update, current.id, Some(first));
        let b = op(2, OperationKind::Update, current.id, Some(second));
        let view = reconcile(&confirmed(&[current]), [&b, &a]);
        assert_eq!(view[0].name, "Second");
    }

    #[test]
    fn test_delete_and_settled_operations() {
        let current = bill("Lunch");
        let mut delete = op(0, OperationKind::Delete, current.id, None);
        let map = confirmed(&[current]);

        assert!(reconcile(&map, [&delete]).is_empty());

        delete.transition(OperationState::Failed).unwrap();
        assert_eq!(reconcile(&map, [&delete]).len(), 1);
    }

    #[test]
    fn test_soft_deleted_confirmed_entries_hidden() {
        let mut gone = bill("Old");
        gone.is_deleted = true;
        assert!(reconcile(&confirmed(&[gone]), Vec::<&OptimisticOperation>::new()).is_empty());
    }

    proptest! {
        /// Same inputs in any argument order give the same view, every time.
        #[test]
        fn prop_reconcile_is_deterministic(
            script in proptest::collection::vec((0usize..3, 0u8..3), 0..20),
            rotate in 0usize..20,
        ) {
            let records: Vec<Bill> = (0..3).map(|i| bill(&format!("Bill {}", i))).collect();
            let map = confirmed(&records[..2]);
            let ops: Vec<OptimisticOperation> = script
                .iter()
                .enumerate()
                .map(|(seq, (target, kind))| {
                    let base = records[*target].clone();
                    let mut edited = base.clone();
                    edited.name = format!("edit {}", seq);
                    match kind {
                        0 => op(seq as u64, OperationKind::Create, base.id, Some(base)),
                        1 => op(seq as u64, OperationKind::Update, base.id, Some(edited)),
                        _ => op(seq as u64, OperationKind::Delete, base.id, None),
                    }
                })
                .collect();

            let mut shuffled: Vec<&OptimisticOperation> = ops.iter().collect();
            if !shuffled.is_empty() {
                let n = rotate % shuffled.len();
                shuffled.rotate_left(n);
            }

            let first = reconcile(&map, &ops);
            prop_assert_eq!(&first, &reconcile(&map, &ops));
            prop_assert_eq!(first, reconcile(&map, shuffled));
        }
    }
}
