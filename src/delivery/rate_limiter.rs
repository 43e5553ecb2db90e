//! Sliding-window rate limiter.
//!
//! Remembers when each of the last `limit` sends started. A send is allowed
//! when fewer than `limit` starts fall inside the trailing window; otherwise
//! the caller is told how long to wait. Nothing is ever dropped here.
//!
//! The clock is passed in, so callers decide whether time is real or paused.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    starts: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            window,
            starts: VecDeque::with_capacity(limit),
        }
    }

    /// Claim a slot at `now`, or return how long until one frees up.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.evict(now);
        if self.starts.len() < self.limit {
            self.starts.push_back(now);
            return Ok(());
        }
        // Oldest start leaves the window first.
        let wait = self
            .starts
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or_default();
        Err(wait)
    }

    /// Sends started inside the window ending at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.starts.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(oldest) = self.starts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.starts.pop_front();
            } else {
                break;
            }
        }
    }
}
