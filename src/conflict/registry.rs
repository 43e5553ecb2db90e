//! # Active Conflict Registry
//!
//! Conflicts waiting for the user or an expiry timer. Keyed by the losing
//! operation.

use std::collections::HashMap;

use serde::Serialize;

use super::classifier::Conflict;
use super::prompt::ConflictPrompt;
use crate::record::{Bill, OperationId};

/// How the user disposes of a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionPolicy {
    /// Re-submit the local snapshot on top of the server version
    AcceptLocal,
    /// Keep the server snapshot, discard the local edit
    AcceptServer,
    /// Re-submit a three-way merge of both sides
    Merge,
    /// Re-submit a snapshot built by the user
    Manual(Box<Bill>),
    /// Dismiss without choosing
    Cancel,
}

impl ResolutionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptLocal => "accept_local",
            Self::AcceptServer => "accept_server",
            Self::Merge => "merge",
            Self::Manual(_) => "manual",
            Self::Cancel => "cancel",
        }
    }
}

/// A registered conflict together with the snapshots it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveConflict {
    pub conflict: Conflict,
    pub prompt: ConflictPrompt,
    /// Snapshot the losing operation tried to write
    pub local: Bill,
    /// Server snapshot at the time of detection
    pub server: Bill,
    /// Snapshot the local edit was derived from, if known
    pub base: Option<Bill>,
    /// Registration order
    #[serde(skip)]
    sequence: u64,
}

/// Conflicts awaiting disposal.
#[derive(Debug, Default)]
pub struct ConflictRegistry {
    entries: HashMap<OperationId, ActiveConflict>,
    next_sequence: u64,
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conflict. A second conflict for the same operation
    /// replaces the first.
    pub fn register(&mut self, conflict: Conflict, local: Bill, server: Bill, base: Option<Bill>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let prompt = ConflictPrompt::for_conflict(&conflict);
        self.entries.insert(
            conflict.operation_id,
            ActiveConflict {
                conflict,
                prompt,
                local,
                server,
                base,
                sequence,
            },
        );
    }

    pub fn get(&self, operation_id: &OperationId) -> Option<&ActiveConflict> {
        self.entries.get(operation_id)
    }

    pub fn remove(&mut self, operation_id: &OperationId) -> Option<ActiveConflict> {
        self.entries.remove(operation_id)
    }

    /// Active conflicts in registration order.
    pub fn list(&self) -> Vec<&ActiveConflict> {
        let mut list: Vec<_> = self.entries.values().collect();
        list.sort_by_key(|c| c.sequence);
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictField, ConflictSeverity};
    use crate::record::RecordId;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn conflict() -> Conflict {
        Conflict {
            operation_id: OperationId::new(),
            record_id: RecordId::new(),
            local_version: 1,
            server_version: 2,
            conflicting_fields: BTreeSet::from([ConflictField::Name]),
            severity: ConflictSeverity::Low,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_and_remove() {
        let mut registry = ConflictRegistry::new();
        let c = conflict();
        let id = c.operation_id;
        let bill = Bill::draft("alice", "x");
        registry.register(c, bill.clone(), bill, None);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_list_in_registration_order() {
        let mut registry = ConflictRegistry::new();
        let bill = Bill::draft("alice", "x");
        let ids: Vec<_> = (0..4)
            .map(|_| {
                let c = conflict();
                let id = c.operation_id;
                registry.register(c, bill.clone(), bill.clone(), None);
                id
            })
            .collect();

        let listed: Vec<_> = registry.list().iter().map(|c| c.conflict.operation_id).collect();
        assert_eq!(listed, ids);
    }
}
