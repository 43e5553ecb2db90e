//! # Retry Queue
//!
//! Failed per-recipient deliveries waiting for another attempt.
//!
//! - Bounded: pushing beyond capacity evicts the entries with the smallest
//!   `created_at` first
//! - Attempt `n` becomes eligible `base * 2^(n-1)` after it failed
//! - Entries are dropped after `max_attempts` attempts or once older than
//!   `max_age`

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use super::payload::NotificationPayload;
use crate::record::ParticipantId;

/// Backoff and give-up rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
    pub max_age: Duration,
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failure.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent)
    }
}

/// One recipient still owed a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDelivery {
    pub recipient: ParticipantId,
    pub payload: NotificationPayload,
    /// Failed attempts so far
    pub attempts: u32,
    pub created_at: Instant,
    pub next_eligible_at: Instant,
}

impl PendingDelivery {
    /// Entry for a delivery whose first attempt failed at `now`.
    pub fn first_failure(
        recipient: ParticipantId,
        payload: NotificationPayload,
        now: Instant,
        policy: &RetryPolicy,
    ) -> Self {
        Self {
            recipient,
            payload,
            attempts: 1,
            created_at: now,
            next_eligible_at: now + policy.backoff(1),
        }
    }
}

/// Why an entry left the queue without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Pushed out by a newer entry at capacity
    Evicted,
    /// Out of attempts
    Exhausted,
    /// Older than the max age
    Expired,
}

#[derive(Debug)]
pub struct RetryQueue {
    policy: RetryPolicy,
    capacity: usize,
    /// Ordered by creation time, ties by insertion
    entries: BTreeMap<(Instant, u64), PendingDelivery>,
    next_seq: u64,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an entry, returning whatever was evicted to make room.
    pub fn push(&mut self, entry: PendingDelivery) -> Vec<PendingDelivery> {
        let key = (entry.created_at, self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, entry);

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.entries.pop_first() {
                Some((_, oldest)) => evicted.push(oldest),
                None => break,
            }
        }
        evicted
    }

    /// Remove and return every entry eligible at `now`, oldest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingDelivery> {
        let due: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_eligible_at <= now)
            .map(|(k, _)| *k)
            .collect();
        due.into_iter().filter_map(|k| self.entries.remove(&k)).collect()
    }

    /// Drop entries older than the max age.
    pub fn prune(&mut self, now: Instant) -> Vec<PendingDelivery> {
        let max_age = self.policy.max_age;
        let expired: Vec<_> = self
            .entries
            .keys()
            .take_while(|(created_at, _)| now.saturating_duration_since(*created_at) > max_age)
            .copied()
            .collect();
        expired.into_iter().filter_map(|k| self.entries.remove(&k)).collect()
    }

    /// Record another failed attempt for an entry taken from the queue.
    ///
    /// Returns `Err` with the reason when the entry is given up instead of
    /// requeued, and `Ok` with any entries evicted by the reinsert.
    pub fn requeue(&mut self, mut entry: PendingDelivery, now: Instant) -> Result<Vec<PendingDelivery>, (Removal, PendingDelivery)> {
        entry.attempts += 1;
        if entry.attempts >= self.policy.max_attempts {
            return Err((Removal::Exhausted, entry));
        }
        if now.saturating_duration_since(entry.created_at) > self.policy.max_age {
            return Err((Removal::Expired, entry));
        }
        entry.next_eligible_at = now + self.policy.backoff(entry.attempts);
        Ok(self.push(entry))
    }

    /// Entries in eviction order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingDelivery> {
        self.entries.values()
    }
}
