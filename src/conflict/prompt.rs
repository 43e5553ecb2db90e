//! Severity-tiered user messaging for conflicts.

use serde::Serialize;

use super::classifier::Conflict;
use super::severity::ConflictSeverity;

/// How forcefully the presentation layer should surface a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTier {
    /// Dismissible notice
    Notice,
    /// Prompt to review both versions
    Review,
    /// Blocks until the user picks a version
    Block,
    /// Hard block with financial-safety language
    HardBlock,
}

/// What the presentation layer shows for a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPrompt {
    pub tier: PromptTier,
    pub title: String,
    pub message: String,
    pub dismissible: bool,
    pub requires_choice: bool,
}

impl ConflictPrompt {
    /// Build the prompt for a conflict according to its severity.
    pub fn for_conflict(conflict: &Conflict) -> Self {
        let fields = conflict
            .conflicting_fields
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        match conflict.severity {
            ConflictSeverity::Low => Self {
                tier: PromptTier::Notice,
                title: "Bill updated elsewhere".to_string(),
                message: format!("Someone else changed {}. Your view has been refreshed.", fields),
                dismissible: true,
                requires_choice: false,
            },
            ConflictSeverity::Medium => Self {
                tier: PromptTier::Review,
                title: "Participants changed".to_string(),
                message: format!(
                    "The bill changed while you were editing ({}). Review both versions before saving.",
                    fields
                ),
                dismissible: true,
                requires_choice: false,
            },
            ConflictSeverity::High => Self {
                tier: PromptTier::Block,
                title: "Conflicting edits".to_string(),
                message: format!(
                    "Your changes conflict with another edit ({}). Choose which version to keep.",
                    fields
                ),
                dismissible: false,
                requires_choice: true,
            },
            ConflictSeverity::Critical => Self {
                tier: PromptTier::HardBlock,
                title: "Amounts no longer match".to_string(),
                message: format!(
                    "Amounts on this bill were changed by someone else ({}). Nothing was saved. \
                     Check the amounts carefully before choosing a version so nobody is charged incorrectly.",
                    fields
                ),
                dismissible: false,
                requires_choice: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictField;
    use crate::record::{OperationId, RecordId};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn conflict(severity: ConflictSeverity, field: ConflictField) -> Conflict {
        Conflict {
            operation_id: OperationId::new(),
            record_id: RecordId::new(),
            local_version: 3,
            server_version: 4,
            conflicting_fields: BTreeSet::from([field]),
            severity,
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_low_is_dismissible_notice() {
        let prompt = ConflictPrompt::for_conflict(&conflict(ConflictSeverity::Low, ConflictField::Name));
        assert_eq!(prompt.tier, PromptTier::Notice);
        assert!(prompt.dismissible);
        assert!(!prompt.requires_choice);
        assert!(prompt.message.contains("name"));
    }

    #[test]
    fn test_critical_is_hard_block() {
        let prompt =
            ConflictPrompt::for_conflict(&conflict(ConflictSeverity::Critical, ConflictField::TotalAmount));
        assert_eq!(prompt.tier, PromptTier::HardBlock);
        assert!(!prompt.dismissible);
        assert!(prompt.requires_choice);
        assert!(prompt.message.contains("total_amount"));
    }

    #[test]
    fn test_high_requires_choice() {
        let prompt = ConflictPrompt::for_conflict(&conflict(ConflictSeverity::High, ConflictField::Payer));
        assert_eq!(prompt.tier, PromptTier::Block);
        assert!(prompt.requires_choice);
    }
}
