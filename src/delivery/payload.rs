//! Notification payloads and fan-out requests.

use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;
use crate::record::{Bill, OperationId, ParticipantId, RecordId};

/// Opaque address of a recipient on the delivery channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientToken(String);

impl RecipientToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What recipients are told about a confirmed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub record_id: RecordId,
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub actor: ParticipantId,
    pub title: String,
    pub body: String,
}

impl NotificationPayload {
    /// Describe `kind` applied to `bill` by `actor`.
    pub fn for_operation(kind: OperationKind, operation_id: OperationId, actor: &ParticipantId, bill: &Bill) -> Self {
        let (title, verb) = match kind {
            OperationKind::Create => ("New bill", "added"),
            OperationKind::Update => ("Bill updated", "updated"),
            OperationKind::Delete => ("Bill deleted", "deleted"),
        };
        Self {
            record_id: bill.id,
            operation_id,
            kind,
            actor: actor.clone(),
            title: title.to_string(),
            body: format!(
                "{} {} \"{}\" ({:.2} {})",
                actor, verb, bill.name, bill.total_amount, bill.currency
            ),
        }
    }
}

/// One payload to fan out to several recipients.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub payload: NotificationPayload,
    pub recipients: Vec<ParticipantId>,
}

impl DeliveryRequest {
    /// Notify every participant of `bill` except the actor.
    pub fn for_participants(payload: NotificationPayload, bill: &Bill) -> Self {
        let recipients = bill
            .participant_ids()
            .into_iter()
            .filter(|p| p != &payload.actor)
            .collect();
        Self { payload, recipients }
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}
