//! # Delivery Transport
//!
//! Collaborators the delivery engine is constructed with: the downstream
//! channel and the recipient-token directory. In-memory implementations
//! back the simulator and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::errors::{DeliveryError, DeliveryResult};
use super::payload::{NotificationPayload, RecipientToken};
use crate::record::{ParticipantId, RecordId};

/// Downstream notification channel.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, token: &RecipientToken, payload: &NotificationPayload) -> DeliveryResult<()>;
}

/// Maps participants to delivery tokens.
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn resolve(&self, recipient: &ParticipantId) -> Option<RecipientToken>;
}

/// Fixed participant-to-token table.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    tokens: HashMap<ParticipantId, RecipientToken>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, recipient: impl Into<ParticipantId>, token: impl Into<String>) -> Self {
        self.tokens.insert(recipient.into(), RecipientToken::new(token));
        self
    }

    /// Directory giving every participant the token `device:<id>`.
    pub fn for_participants<I, P>(participants: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParticipantId>,
    {
        participants.into_iter().fold(Self::new(), |dir, p| {
            let p = p.into();
            let token = format!("device:{}", p);
            dir.with(p, token)
        })
    }
}

#[async_trait]
impl TokenDirectory for StaticDirectory {
    async fn resolve(&self, recipient: &ParticipantId) -> Option<RecipientToken> {
        self.tokens.get(recipient).cloned()
    }
}

/// A delivery seen by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub at: Instant,
    pub token: RecipientToken,
    pub record_id: RecordId,
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct TransportState {
    log: Vec<DeliveryRecord>,
    /// Remaining failures per token
    failures: HashMap<RecipientToken, u32>,
    /// Tokens that always fail
    broken: HashSet<RecipientToken>,
}

/// In-process transport recording every attempt.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<TransportState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` deliveries to `token`.
    pub fn fail_for(&self, token: &RecipientToken, times: u32) {
        if let Ok(mut s) = self.state.lock() {
            s.failures.insert(token.clone(), times);
        }
    }

    /// Fail every delivery to `token` until [`repair`](Self::repair).
    pub fn break_token(&self, token: &RecipientToken) {
        if let Ok(mut s) = self.state.lock() {
            s.broken.insert(token.clone());
        }
    }

    pub fn repair(&self, token: &RecipientToken) {
        if let Ok(mut s) = self.state.lock() {
            s.broken.remove(token);
            s.failures.remove(token);
        }
    }

    /// Every attempt so far, in call order.
    pub fn attempts(&self) -> Vec<DeliveryRecord> {
        self.state.lock().map(|s| s.log.clone()).unwrap_or_default()
    }

    /// Successful deliveries so far.
    pub fn delivered(&self) -> Vec<DeliveryRecord> {
        self.attempts().into_iter().filter(|r| r.delivered).collect()
    }
}

#[async_trait]
impl DeliveryTransport for MemoryTransport {
    async fn deliver(&self, token: &RecipientToken, payload: &NotificationPayload) -> DeliveryResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DeliveryError::Transport("transport lock poisoned".into()))?;

        let fail = if state.broken.contains(token) {
            true
        } else if let Some(remaining) = state.failures.get_mut(token) {
            let fail = *remaining > 0;
            *remaining = remaining.saturating_sub(1);
            fail
        } else {
            false
        };

        state.log.push(DeliveryRecord {
            at: Instant::now(),
            token: token.clone(),
            record_id: payload.record_id,
            delivered: !fail,
        });

        if fail {
            Err(DeliveryError::Transport(format!("{} unreachable", token.as_str())))
        } else {
            Ok(())
        }
    }
}
