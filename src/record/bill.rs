//! # Bill Snapshot

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ItemId, OperationId, ParticipantId, RecordId};

/// Amounts closer than this are considered equal.
pub const CURRENCY_EPSILON: f64 = 0.01;

/// True when two amounts differ by more than `epsilon`.
#[inline]
pub fn amounts_differ(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() > epsilon
}

/// A participant sharing the bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
        }
    }
}

/// A single priced line on the bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: ItemId,
    pub name: String,
    pub price: f64,
    /// Who shares this item. Empty means everyone on the bill.
    pub participant_ids: BTreeSet<ParticipantId>,
}

impl LineItem {
    /// Create an item shared by the given participants
    pub fn new<I, P>(name: impl Into<String>, price: f64, participants: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParticipantId>,
    {
        Self {
            id: ItemId::new(),
            name: name.into(),
            price,
            participant_ids: participants.into_iter().map(Into::into).collect(),
        }
    }
}

/// A shared bill snapshot.
///
/// Snapshots are values: editing a bill means building a new snapshot and
/// submitting it. `version` and `operation_id` are stamped by the write
/// protocol, never by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: RecordId,
    pub version: u64,
    pub operation_id: Option<OperationId>,

    /// Creator; the only actor allowed to update or delete
    pub owner: ParticipantId,

    pub name: String,
    pub currency: String,
    pub total_amount: f64,
    pub payer: ParticipantId,
    pub participants: Vec<Participant>,
    pub items: Vec<LineItem>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub is_deleted: bool,
    pub deleted_by: Option<ParticipantId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Bill {
    /// Start an unsaved draft owned and paid by `owner`.
    pub fn draft(owner: impl Into<ParticipantId>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            version: 0,
            operation_id: None,
            payer: owner.clone(),
            owner,
            name: name.into(),
            currency: "USD".to_string(),
            total_amount: 0.0,
            participants: Vec::new(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_by: None,
            deleted_at: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_payer(mut self, payer: impl Into<ParticipantId>) -> Self {
        self.payer = payer.into();
        self
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    /// Append an item and grow the total by its price.
    pub fn with_item(mut self, item: LineItem) -> Self {
        self.total_amount += item.price;
        self.items.push(item);
        self
    }

    pub fn with_total(mut self, total: f64) -> Self {
        self.total_amount = total;
        self
    }

    /// Set of participant ids on the bill.
    pub fn participant_ids(&self) -> BTreeSet<ParticipantId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    /// True if `actor` owns the bill or takes part in it.
    pub fn is_visible_to(&self, actor: &ParticipantId) -> bool {
        &self.owner == actor || self.participants.iter().any(|p| &p.id == actor)
    }

    /// Sum of line item prices.
    pub fn items_total(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }

    /// Each participant's computed share of `total_amount`.
    ///
    /// Items are split evenly among their participants (everyone when the
    /// item lists nobody). Item shares are then scaled so they sum to the
    /// bill total, which spreads tax and tip proportionally.
    pub fn shares(&self) -> BTreeMap<ParticipantId, f64> {
        let mut shares: BTreeMap<ParticipantId, f64> = self
            .participants
            .iter()
            .map(|p| (p.id.clone(), 0.0))
            .collect();

        let everyone = self.participant_ids();
        for item in &self.items {
            let sharers = if item.participant_ids.is_empty() {
                &everyone
            } else {
                &item.participant_ids
            };
            if sharers.is_empty() {
                continue;
            }
            let per_head = item.price / sharers.len() as f64;
            for id in sharers {
                *shares.entry(id.clone()).or_insert(0.0) += per_head;
            }
        }

        let items_total = self.items_total();
        if items_total > 0.0 {
            let factor = self.total_amount / items_total;
            for share in shares.values_mut() {
                *share *= factor;
            }
        }
        shares
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dinner() -> Bill {
        Bill::draft("alice", "Dinner")
            .with_participant(Participant::new("alice", "Alice"))
            .with_participant(Participant::new("bob", "Bob"))
            .with_item(LineItem::new("Pasta", 20.0, ["alice"]))
            .with_item(LineItem::new("Wine", 30.0, Vec::<&str>::new()))
    }

    #[test]
    fn test_draft_is_unsaved() {
        let bill = Bill::draft("alice", "Lunch");
        assert_eq!(bill.version, 0);
        assert!(bill.operation_id.is_none());
        assert_eq!(bill.payer, ParticipantId::new("alice"));
        assert!(!bill.is_deleted);
    }

    #[test]
    fn test_with_item_grows_total() {
        let bill = dinner();
        assert!(!amounts_differ(bill.total_amount, 50.0, CURRENCY_EPSILON));
    }

    #[test]
    fn test_shares_split_items() {
        let shares = dinner().shares();
        assert!(!amounts_differ(shares[&ParticipantId::new("alice")], 35.0, CURRENCY_EPSILON));
        assert!(!amounts_differ(shares[&ParticipantId::new("bob")], 15.0, CURRENCY_EPSILON));
    }

    #[test]
    fn test_shares_scale_to_total() {
        // 10% tip on top of items
        let shares = dinner().with_total(55.0).shares();
        let sum: f64 = shares.values().sum();
        assert!(!amounts_differ(sum, 55.0, CURRENCY_EPSILON));
        assert!(!amounts_differ(shares[&ParticipantId::new("bob")], 16.5, CURRENCY_EPSILON));
    }

    #[test]
    fn test_visibility() {
        let bill = dinner();
        assert!(bill.is_visible_to(&ParticipantId::new("bob")));
        assert!(!bill.is_visible_to(&ParticipantId::new("carol")));
    }

    #[test]
    fn test_amounts_differ_epsilon() {
        assert!(!amounts_differ(10.0, 10.005, CURRENCY_EPSILON));
        assert!(amounts_differ(10.0, 10.02, CURRENCY_EPSILON));
    }
}
