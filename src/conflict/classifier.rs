//! # Conflict Classifier
//!
//! Pure comparison of a local snapshot against the server's snapshot of the
//! same bill. Fields are examined in a fixed priority order and the conflict
//! takes the maximum severity observed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::severity::ConflictSeverity;
use crate::record::{
    amounts_differ, Bill, ItemId, LineItem, OperationId, ParticipantId, RecordId, CURRENCY_EPSILON,
};

/// A field two snapshots may disagree on, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    TotalAmount,
    Shares,
    Payer,
    Items,
    Participants,
    Name,
    Currency,
}

/// Fields that may be merged without user involvement.
pub const COSMETIC_FIELDS: [ConflictField; 2] = [ConflictField::Name, ConflictField::Currency];

impl ConflictField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalAmount => "total_amount",
            Self::Shares => "shares",
            Self::Payer => "payer",
            Self::Items => "items",
            Self::Participants => "participants",
            Self::Name => "name",
            Self::Currency => "currency",
        }
    }

    /// Severity contributed by a difference in this field.
    pub fn severity(&self) -> ConflictSeverity {
        match self {
            Self::TotalAmount | Self::Shares => ConflictSeverity::Critical,
            Self::Payer | Self::Items => ConflictSeverity::High,
            Self::Participants => ConflictSeverity::Medium,
            Self::Name | Self::Currency => ConflictSeverity::Low,
        }
    }

    pub fn is_cosmetic(&self) -> bool {
        COSMETIC_FIELDS.contains(self)
    }
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two versions of one bill that semantically disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// The losing local operation
    pub operation_id: OperationId,
    pub record_id: RecordId,
    pub local_version: u64,
    pub server_version: u64,
    pub conflicting_fields: BTreeSet<ConflictField>,
    pub severity: ConflictSeverity,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn involves(&self, field: ConflictField) -> bool {
        self.conflicting_fields.contains(&field)
    }
}

/// Conflict classifier and merge policy.
#[derive(Debug, Clone, Copy)]
pub struct ConflictClassifier {
    epsilon: f64,
}

impl Default for ConflictClassifier {
    fn default() -> Self {
        Self::new(CURRENCY_EPSILON)
    }
}

impl ConflictClassifier {
    /// Create a classifier treating amounts within `epsilon` as equal.
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Compare `local` against `server`.
    ///
    /// Returns `None` when the snapshots are of different records, share a
    /// version, or do not differ in any field that matters.
    pub fn detect(&self, operation_id: OperationId, local: &Bill, server: &Bill) -> Option<Conflict> {
        if local.id != server.id {
            tracing::warn!(
                event = "CONFLICT_ID_MISMATCH",
                local = %local.id,
                server = %server.id,
                "refusing to compare snapshots of different records"
            );
            return None;
        }
        if local.version == server.version {
            return None;
        }

        let fields = self.differing_fields(local, server);
        let severity = fields.iter().map(ConflictField::severity).max()?;

        Some(Conflict {
            operation_id,
            record_id: server.id,
            local_version: local.version,
            server_version: server.version,
            conflicting_fields: fields,
            severity,
            detected_at: Utc::now(),
        })
    }

    /// Every field on which the two snapshots semantically differ.
    pub fn differing_fields(&self, a: &Bill, b: &Bill) -> BTreeSet<ConflictField> {
        let mut fields = BTreeSet::new();

        if amounts_differ(a.total_amount, b.total_amount, self.epsilon) {
            fields.insert(ConflictField::TotalAmount);
        }
        if self.shares_differ(&a.shares(), &b.shares()) {
            fields.insert(ConflictField::Shares);
        }
        if a.payer != b.payer {
            fields.insert(ConflictField::Payer);
        }
        if !self.items_equal(&a.items, &b.items) {
            fields.insert(ConflictField::Items);
        }
        if a.participant_ids() != b.participant_ids() {
            fields.insert(ConflictField::Participants);
        }
        if a.name != b.name {
            fields.insert(ConflictField::Name);
        }
        if a.currency != b.currency {
            fields.insert(ConflictField::Currency);
        }

        fields
    }

    /// True iff the conflict is below critical and purely cosmetic.
    pub fn can_auto_resolve(&self, conflict: &Conflict) -> bool {
        conflict.severity < ConflictSeverity::Critical
            && !conflict.conflicting_fields.is_empty()
            && conflict.conflicting_fields.iter().all(ConflictField::is_cosmetic)
    }

    /// Cosmetic three-way merge.
    ///
    /// Starts from the server snapshot and re-applies the local edits to
    /// cosmetic fields, where an edit is a field on which `local` differs
    /// from the `base` it was derived from. Without a base the server
    /// snapshot wins outright.
    pub fn auto_resolve(&self, local: &Bill, server: &Bill, base: Option<&Bill>) -> Bill {
        let mut merged = server.clone();
        let Some(base) = base else {
            return merged;
        };

        if local.name != base.name {
            merged.name = local.name.clone();
        }
        if local.currency != base.currency {
            merged.currency = local.currency.clone();
        }
        merged
    }

    /// Full three-way merge across every field.
    ///
    /// A field takes the local value only when the local side changed it
    /// relative to `base` and the server did not. Fields changed on both
    /// sides keep the server value.
    pub fn merge(&self, local: &Bill, server: &Bill, base: Option<&Bill>) -> Bill {
        let mut merged = self.auto_resolve(local, server, base);
        let Some(base) = base else {
            return merged;
        };

        if amounts_differ(local.total_amount, base.total_amount, self.epsilon)
            && !amounts_differ(server.total_amount, base.total_amount, self.epsilon)
        {
            merged.total_amount = local.total_amount;
        }
        if local.payer != base.payer && server.payer == base.payer {
            merged.payer = local.payer.clone();
        }
        if local.participant_ids() != base.participant_ids()
            && server.participant_ids() == base.participant_ids()
        {
            merged.participants = local.participants.clone();
        }
        if !self.items_equal(&local.items, &base.items) && self.items_equal(&server.items, &base.items) {
            merged.items = local.items.clone();
        }
        if local.name != base.name && server.name != base.name {
            merged.name = server.name.clone();
        }
        if local.currency != base.currency && server.currency != base.currency {
            merged.currency = server.currency.clone();
        }
        merged
    }

    fn shares_differ(&self, a: &BTreeMap<ParticipantId, f64>, b: &BTreeMap<ParticipantId, f64>) -> bool {
        let keys: BTreeSet<_> = a.keys().chain(b.keys()).collect();
        keys.into_iter().any(|k| {
            let left = a.get(k).copied().unwrap_or(0.0);
            let right = b.get(k).copied().unwrap_or(0.0);
            amounts_differ(left, right, self.epsilon)
        })
    }

    /// Same id set; per item equal name, price within epsilon, same sharers.
    fn items_equal(&self, a: &[LineItem], b: &[LineItem]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let by_id: BTreeMap<ItemId, &LineItem> = b.iter().map(|i| (i.id, i)).collect();
        if by_id.len() != b.len() {
            return false;
        }
        a.iter().all(|item| match by_id.get(&item.id) {
            Some(other) => {
                item.name == other.name
                    && !amounts_differ(item.price, other.price, self.epsilon)
                    && item.participant_ids == other.participant_ids
            }
            None => false,
        })
    }
}
