//! # Delivery
//!
//! Participant notification for confirmed operations, isolated from the
//! replication core: failures here are retried, counted and eventually
//! dropped, never reported back to the operation.
//!
//! - [`SlidingWindowLimiter`]: hard cap on sends per trailing window
//! - [`split_batches`]: fixed-size recipient chunks
//! - [`RetryQueue`]: bounded, oldest-first eviction, exponential backoff
//! - [`TokenCache`]: bounded, TTL-expiring recipient tokens
//! - [`DeliveryEngine`]: the worker tying them together

mod batcher;
mod config;
mod engine;
mod errors;
mod payload;
mod rate_limiter;
mod retry_queue;
mod token_cache;
mod transport;

pub use batcher::split_batches;
pub use config::DeliveryConfig;
pub use engine::{DeliveryEngine, DeliveryHandle};
pub use errors::{DeliveryError, DeliveryResult};
pub use payload::{DeliveryRequest, NotificationPayload, RecipientToken};
pub use rate_limiter::SlidingWindowLimiter;
pub use retry_queue::{PendingDelivery, Removal, RetryPolicy, RetryQueue};
pub use token_cache::TokenCache;
pub use transport::{DeliveryRecord, DeliveryTransport, MemoryTransport, StaticDirectory, TokenDirectory};
