//! # Delivery Engine
//!
//! Fan-out of notifications for confirmed operations.
//!
//! The engine runs as a single worker task that owns the rate limiter, the
//! retry queue and the token cache. Callers hold a [`DeliveryHandle`] and
//! only ever enqueue: nothing here can block or fail the operation that
//! triggered a notification.
//!
//! Per request:
//! 1. Recipients are split into batches of `batch_size`
//! 2. Batches go out `inter_batch_delay` apart
//! 3. Every send claims a rate-limit slot first, waiting when the window
//!    is full
//! 4. Failed sends go to the retry queue, swept every `sweep_interval`

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::batcher::split_batches;
use super::config::DeliveryConfig;
use super::errors::{DeliveryError, DeliveryResult};
use super::payload::{DeliveryRequest, NotificationPayload, RecipientToken};
use super::rate_limiter::SlidingWindowLimiter;
use super::retry_queue::{PendingDelivery, Removal, RetryPolicy, RetryQueue};
use super::token_cache::TokenCache;
use super::transport::{DeliveryTransport, TokenDirectory};
use crate::observability::{Event, MetricsRegistry};
use crate::record::ParticipantId;

enum Command {
    Notify(DeliveryRequest),
    Flush(oneshot::Sender<()>),
}

/// Cheap, cloneable entry point to a running engine.
///
/// The worker stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notify(r) => f.debug_tuple("Notify").field(&r.payload.record_id).finish(),
            Self::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl DeliveryHandle {
    /// Queue a fan-out. Never blocks, never fails the caller.
    pub fn notify(&self, request: DeliveryRequest) {
        if request.is_empty() {
            return;
        }
        let record = request.payload.record_id;
        if self.commands.send(Command::Notify(request)).is_err() {
            warn!(
                event = Event::DeliveryDropped.as_str(),
                record = %record,
                "delivery engine stopped, notification discarded"
            );
        }
    }

    /// Wait until every request queued before this call has been
    /// dispatched once.
    pub async fn flush(&self) -> DeliveryResult<()> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Flush(done))
            .map_err(|_| DeliveryError::Stopped)?;
        wait.await.map_err(|_| DeliveryError::Stopped)
    }
}

/// Rate-limited, batched, retrying notification dispatcher.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    transport: Arc<dyn DeliveryTransport>,
    directory: Arc<dyn TokenDirectory>,
    metrics: Arc<MetricsRegistry>,
    limiter: SlidingWindowLimiter,
    queue: RetryQueue,
    tokens: TokenCache,
}

impl DeliveryEngine {
    pub fn new(
        config: DeliveryConfig,
        transport: Arc<dyn DeliveryTransport>,
        directory: Arc<dyn TokenDirectory>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let policy = RetryPolicy {
            base: config.retry_base,
            max_attempts: config.max_attempts,
            max_age: config.max_age,
        };
        Self {
            limiter: SlidingWindowLimiter::new(config.rate_limit, config.rate_window),
            queue: RetryQueue::new(policy, config.queue_capacity),
            tokens: TokenCache::new(config.token_cache_capacity, config.token_ttl),
            config,
            transport,
            directory,
            metrics,
        }
    }

    /// Start the worker on the current runtime.
    pub fn spawn(self) -> DeliveryHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(rx));
        DeliveryHandle { commands }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.sweep_interval;
        let mut sweep = time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Notify(request)) => self.dispatch(request).await,
                    Some(Command::Flush(done)) => {
                        let _ = done.send(());
                    }
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await,
            }
        }
        info!(
            event = Event::EngineStopped.as_str(),
            pending = self.queue.len(),
            "delivery engine stopped"
        );
    }

    /// Entries waiting for a retry.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Send one request to all of its recipients, batch by batch.
    pub async fn dispatch(&mut self, request: DeliveryRequest) {
        let DeliveryRequest { payload, recipients } = request;
        let mut seen = HashSet::new();
        let recipients: Vec<_> = recipients.into_iter().filter(|r| seen.insert(r.clone())).collect();

        for (index, batch) in split_batches(recipients, self.config.batch_size).into_iter().enumerate() {
            if index > 0 {
                time::sleep(self.config.inter_batch_delay).await;
            }
            self.metrics.increment_batches_dispatched();
            debug!(
                event = Event::DeliveryBatchDispatched.as_str(),
                record = %payload.record_id,
                batch = index + 1,
                size = batch.len(),
            );

            let targets: Vec<(ParticipantId, &NotificationPayload)> =
                batch.into_iter().map(|r| (r, &payload)).collect();
            let results = self.send_batch(&targets).await;

            let now = Instant::now();
            for ((recipient, _), result) in targets.into_iter().zip(results) {
                if let Err(DeliveryError::Transport(_)) = result {
                    let entry = PendingDelivery::first_failure(recipient, payload.clone(), now, self.queue.policy());
                    self.enqueue(entry);
                }
            }
        }
        self.metrics.set_retry_queue_depth(self.queue.len());
    }

    /// Drop stale entries and retry everything that is due.
    pub async fn sweep(&mut self) {
        for dropped in self.queue.prune(Instant::now()) {
            self.record_drop(&dropped, Removal::Expired);
        }

        let due = self.queue.take_due(Instant::now());
        for (index, chunk) in split_batches(due, self.config.batch_size).into_iter().enumerate() {
            if index > 0 {
                time::sleep(self.config.inter_batch_delay).await;
            }
            let targets: Vec<(ParticipantId, &NotificationPayload)> =
                chunk.iter().map(|e| (e.recipient.clone(), &e.payload)).collect();
            let results = self.send_batch(&targets).await;
            drop(targets);

            let now = Instant::now();
            for (entry, result) in chunk.into_iter().zip(results) {
                self.metrics.increment_deliveries_retried();
                if result.is_ok() {
                    debug!(
                        event = Event::DeliveryRetried.as_str(),
                        recipient = %entry.recipient,
                        attempts = entry.attempts + 1,
                        "retry delivered"
                    );
                    continue;
                }
                match self.queue.requeue(entry, now) {
                    Ok(evicted) => {
                        for e in evicted {
                            self.record_drop(&e, Removal::Evicted);
                        }
                    }
                    Err((reason, entry)) => self.record_drop(&entry, reason),
                }
            }
        }
        self.metrics.set_retry_queue_depth(self.queue.len());
    }

    fn enqueue(&mut self, entry: PendingDelivery) {
        debug!(
            event = Event::DeliveryQueued.as_str(),
            recipient = %entry.recipient,
            record = %entry.payload.record_id,
            retry_in_ms = entry.next_eligible_at.saturating_duration_since(entry.created_at).as_millis() as u64,
        );
        for evicted in self.queue.push(entry) {
            self.record_drop(&evicted, Removal::Evicted);
        }
    }

    fn record_drop(&self, entry: &PendingDelivery, reason: Removal) {
        let (event, reason) = match reason {
            Removal::Evicted => {
                self.metrics.increment_deliveries_evicted();
                (Event::DeliveryEvicted, "queue_full")
            }
            Removal::Exhausted => {
                self.metrics.increment_deliveries_dropped();
                (Event::DeliveryDropped, "max_attempts")
            }
            Removal::Expired => {
                self.metrics.increment_deliveries_dropped();
                (Event::DeliveryDropped, "max_age")
            }
        };
        warn!(
            event = event.as_str(),
            recipient = %entry.recipient,
            record = %entry.payload.record_id,
            attempts = entry.attempts,
            reason,
            "notification given up"
        );
    }

    /// Resolve tokens, claim rate-limit slots and send concurrently.
    ///
    /// Results are in `targets` order.
    async fn send_batch(&mut self, targets: &[(ParticipantId, &NotificationPayload)]) -> Vec<DeliveryResult<()>> {
        let mut tokens = Vec::with_capacity(targets.len());
        for (recipient, _) in targets {
            tokens.push(self.resolve(recipient).await);
        }
        for _ in tokens.iter().flatten() {
            self.acquire_slot().await;
        }

        let transport = Arc::clone(&self.transport);
        let sends = targets.iter().zip(&tokens).map(|((recipient, payload), token)| {
            let transport = &transport;
            async move {
                match token {
                    Some(token) => transport.deliver(token, payload).await,
                    None => Err(DeliveryError::Unresolved(recipient.clone())),
                }
            }
        });
        let results = join_all(sends).await;

        for ((recipient, _), result) in targets.iter().zip(&results) {
            match result {
                Ok(()) => {
                    self.metrics.increment_deliveries_attempted();
                    self.metrics.increment_deliveries_succeeded();
                }
                Err(DeliveryError::Unresolved(_)) => {
                    self.metrics.increment_recipients_unresolved();
                    warn!(
                        event = Event::RecipientUnresolved.as_str(),
                        recipient = %recipient,
                        "no delivery token"
                    );
                }
                Err(err) => {
                    self.metrics.increment_deliveries_attempted();
                    self.metrics.increment_deliveries_failed();
                    debug!(
                        event = Event::DeliveryFailed.as_str(),
                        recipient = %recipient,
                        error = %err,
                    );
                }
            }
        }
        results
    }

    async fn resolve(&mut self, recipient: &ParticipantId) -> Option<RecipientToken> {
        if let Some(token) = self.tokens.get(recipient, Instant::now()) {
            return Some(token);
        }
        let token = self.directory.resolve(recipient).await?;
        self.tokens.insert(recipient.clone(), token.clone(), Instant::now());
        Some(token)
    }

    async fn acquire_slot(&mut self) {
        loop {
            match self.limiter.try_acquire(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    self.metrics.increment_rate_limit_deferrals();
                    debug!(
                        event = Event::DeliveryDeferred.as_str(),
                        wait_ms = wait.as_millis() as u64,
                        "rate limit reached"
                    );
                    time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{MemoryTransport, StaticDirectory};
    use crate::operation::OperationKind;
    use crate::record::{OperationId, RecordId};
    use std::time::Duration;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            record_id: RecordId::new(),
            operation_id: OperationId::new(),
            kind: OperationKind::Create,
            actor: ParticipantId::new("alice"),
            title: "New bill".into(),
            body: "alice added \"Lunch\"".into(),
        }
    }

    fn engine(config: DeliveryConfig, transport: Arc<MemoryTransport>, names: &[&str]) -> (DeliveryEngine, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let directory = Arc::new(StaticDirectory::for_participants(names.iter().copied()));
        (DeliveryEngine::new(config, transport, directory, Arc::clone(&metrics)), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_retried_after_backoff() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_for(&RecipientToken::new("device:bob"), 1);
        let (mut engine, metrics) = engine(DeliveryConfig::default(), Arc::clone(&transport), &["bob"]);

        engine
            .dispatch(DeliveryRequest {
                payload: payload(),
                recipients: vec![ParticipantId::new("bob")],
            })
            .await;
        assert_eq!(engine.pending(), 1);

        // Not yet eligible.
        engine.sweep().await;
        assert_eq!(engine.pending(), 1);

        time::advance(Duration::from_secs(1)).await;
        engine.sweep().await;
        assert_eq!(engine.pending(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deliveries_failed, 1);
        assert_eq!(snapshot.deliveries_retried, 1);
        assert_eq!(snapshot.deliveries_succeeded, 1);
        assert_eq!(transport.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_recipient_not_queued() {
        let transport = Arc::new(MemoryTransport::new());
        let (mut engine, metrics) = engine(DeliveryConfig::default(), Arc::clone(&transport), &[]);

        engine
            .dispatch(DeliveryRequest {
                payload: payload(),
                recipients: vec![ParticipantId::new("ghost")],
            })
            .await;

        assert_eq!(engine.pending(), 0);
        assert_eq!(metrics.snapshot().recipients_unresolved, 1);
        assert!(transport.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_defers_instead_of_dropping() {
        let transport = Arc::new(MemoryTransport::new());
        let config = DeliveryConfig {
            rate_limit: 2,
            rate_window: Duration::from_secs(60),
            ..Default::default()
        };
        let (mut engine, metrics) = engine(config, Arc::clone(&transport), &["b", "c", "d"]);
        let start = Instant::now();

        engine
            .dispatch(DeliveryRequest {
                payload: payload(),
                recipients: vec!["b".into(), "c".into(), "d".into()],
            })
            .await;

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.at >= start + Duration::from_secs(60)));
        assert_eq!(metrics.snapshot().rate_limit_deferrals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_recipients_notified_once() {
        let transport = Arc::new(MemoryTransport::new());
        let (mut engine, _) = engine(DeliveryConfig::default(), Arc::clone(&transport), &["bob"]);
        engine
            .dispatch(DeliveryRequest {
                payload: payload(),
                recipients: vec!["bob".into(), "bob".into()],
            })
            .await;
        assert_eq!(transport.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_flush_after_spawn() {
        let transport = Arc::new(MemoryTransport::new());
        let (engine, metrics) = engine(DeliveryConfig::default(), Arc::clone(&transport), &["bob", "carol"]);
        let handle = engine.spawn();

        handle.notify(DeliveryRequest {
            payload: payload(),
            recipients: vec!["bob".into(), "carol".into()],
        });
        handle.flush().await.unwrap();

        assert_eq!(transport.delivered().len(), 2);
        assert_eq!(metrics.snapshot().batches_dispatched, 1);
    }
}
