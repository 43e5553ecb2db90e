//! # Balances
//!
//! Aggregates over a set of bills: what each participant paid and owes,
//! and the netted debts between every pair.
//!
//! The summary is a fold over records, never over the operation log.
//! Amounts are accumulated in integer cents so the result does not depend
//! on record order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::{Bill, ParticipantId};

fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// One participant's position across all bills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticipantBalance {
    paid: i64,
    owed: i64,
}

impl ParticipantBalance {
    /// Total paid on behalf of the group
    pub fn paid(&self) -> f64 {
        from_cents(self.paid)
    }

    /// Total of this participant's shares
    pub fn owed(&self) -> f64 {
        from_cents(self.owed)
    }

    /// Positive when the group owes this participant
    pub fn net(&self) -> f64 {
        from_cents(self.paid - self.owed)
    }
}

impl Serialize for ParticipantBalance {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ParticipantBalance", 3)?;
        s.serialize_field("paid", &self.paid())?;
        s.serialize_field("owed", &self.owed())?;
        s.serialize_field("net", &self.net())?;
        s.end()
    }
}

/// Aggregate balances of a bill set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSummary {
    participants: BTreeMap<ParticipantId, ParticipantBalance>,
    /// debtor -> creditor -> cents, netted so at most one direction exists
    debts: BTreeMap<ParticipantId, BTreeMap<ParticipantId, i64>>,
}

impl BalanceSummary {
    /// Fold over `records`, skipping soft-deleted ones.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Bill>,
    {
        let mut participants: BTreeMap<ParticipantId, ParticipantBalance> = BTreeMap::new();
        let mut gross: BTreeMap<(ParticipantId, ParticipantId), i64> = BTreeMap::new();

        for bill in records.into_iter().filter(|b| !b.is_deleted) {
            participants.entry(bill.payer.clone()).or_default().paid += to_cents(bill.total_amount);
            for (participant, share) in bill.shares() {
                let cents = to_cents(share);
                participants.entry(participant.clone()).or_default().owed += cents;
                if participant != bill.payer && cents != 0 {
                    *gross.entry((participant, bill.payer.clone())).or_insert(0) += cents;
                }
            }
        }

        let mut debts: BTreeMap<ParticipantId, BTreeMap<ParticipantId, i64>> = BTreeMap::new();
        for ((debtor, creditor), cents) in &gross {
            if debtor > creditor && gross.contains_key(&(creditor.clone(), debtor.clone())) {
                // Netted from the other side.
                continue;
            }
            let reverse = gross.get(&(creditor.clone(), debtor.clone())).copied().unwrap_or(0);
            let net = cents - reverse;
            if net > 0 {
                debts.entry(debtor.clone()).or_default().insert(creditor.clone(), net);
            } else if net < 0 {
                debts.entry(creditor.clone()).or_default().insert(debtor.clone(), -net);
            }
        }

        Self { participants, debts }
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantBalance> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = (&ParticipantId, &ParticipantBalance)> {
        self.participants.iter()
    }

    /// Net amount `debtor` owes `creditor`, zero if none.
    pub fn owes(&self, debtor: &ParticipantId, creditor: &ParticipantId) -> f64 {
        self.debts
            .get(debtor)
            .and_then(|m| m.get(creditor))
            .copied()
            .map(from_cents)
            .unwrap_or(0.0)
    }

    /// All netted debts as `(debtor, creditor, amount)`.
    pub fn debts(&self) -> Vec<(ParticipantId, ParticipantId, f64)> {
        self.debts
            .iter()
            .flat_map(|(debtor, m)| {
                m.iter()
                    .map(move |(creditor, cents)| (debtor.clone(), creditor.clone(), from_cents(*cents)))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

impl Serialize for BalanceSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let debts: BTreeMap<&ParticipantId, BTreeMap<&ParticipantId, f64>> = self
            .debts
            .iter()
            .map(|(d, m)| (d, m.iter().map(|(c, cents)| (c, from_cents(*cents))).collect()))
            .collect();
        let mut s = serializer.serialize_struct("BalanceSummary", 2)?;
        s.serialize_field("participants", &self.participants)?;
        s.serialize_field("debts", &debts)?;
        s.end()
    }
}
