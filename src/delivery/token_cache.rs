//! Bounded recipient-token cache.
//!
//! Entries expire `ttl` after insertion. At capacity the oldest insertion is
//! evicted first.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use super::payload::RecipientToken;
use crate::record::ParticipantId;

#[derive(Debug)]
struct CachedToken {
    token: RecipientToken,
    key: (Instant, u64),
}

#[derive(Debug)]
pub struct TokenCache {
    capacity: usize,
    ttl: Duration,
    tokens: HashMap<ParticipantId, CachedToken>,
    /// Insertion order for eviction
    order: BTreeMap<(Instant, u64), ParticipantId>,
    next_seq: u64,
}

impl TokenCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            tokens: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Cached token for `recipient`, if present and fresh at `now`.
    pub fn get(&mut self, recipient: &ParticipantId, now: Instant) -> Option<RecipientToken> {
        let inserted_at = self.tokens.get(recipient)?.key.0;
        if now.saturating_duration_since(inserted_at) >= self.ttl {
            self.remove(recipient);
            return None;
        }
        self.tokens.get(recipient).map(|c| c.token.clone())
    }

    pub fn insert(&mut self, recipient: ParticipantId, token: RecipientToken, now: Instant) {
        self.remove(&recipient);
        while self.tokens.len() >= self.capacity {
            match self.order.pop_first() {
                Some((_, oldest)) => {
                    self.tokens.remove(&oldest);
                }
                None => break,
            }
        }
        let key = (now, self.next_seq);
        self.next_seq += 1;
        self.order.insert(key, recipient.clone());
        self.tokens.insert(recipient, CachedToken { token, key });
    }

    pub fn remove(&mut self, recipient: &ParticipantId) -> Option<RecipientToken> {
        let cached = self.tokens.remove(recipient)?;
        self.order.remove(&cached.key);
        Some(cached.token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    #[test]
    fn test_hit_and_expiry() {
        let start = Instant::now();
        let mut cache = TokenCache::new(4, Duration::from_secs(60));
        cache.insert(id("bob"), RecipientToken::new("tok-bob"), start);

        assert_eq!(
            cache.get(&id("bob"), start + Duration::from_secs(59)),
            Some(RecipientToken::new("tok-bob"))
        );
        assert_eq!(cache.get(&id("bob"), start + Duration::from_secs(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let start = Instant::now();
        let mut cache = TokenCache::new(2, Duration::from_secs(60));
        cache.insert(id("a"), RecipientToken::new("1"), start);
        cache.insert(id("b"), RecipientToken::new("2"), start + Duration::from_secs(1));
        cache.insert(id("c"), RecipientToken::new("3"), start + Duration::from_secs(2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&id("a"), start).is_none());
        assert!(cache.get(&id("c"), start).is_some());
    }

    #[test]
    fn test_reinsert_refreshes() {
        let start = Instant::now();
        let mut cache = TokenCache::new(2, Duration::from_secs(60));
        cache.insert(id("a"), RecipientToken::new("1"), start);
        cache.insert(id("b"), RecipientToken::new("2"), start);
        cache.insert(id("a"), RecipientToken::new("1b"), start + Duration::from_secs(5));
        cache.insert(id("c"), RecipientToken::new("3"), start + Duration::from_secs(6));

        assert!(cache.get(&id("b"), start + Duration::from_secs(6)).is_none());
        assert_eq!(
            cache.get(&id("a"), start + Duration::from_secs(6)),
            Some(RecipientToken::new("1b"))
        );
    }
}
