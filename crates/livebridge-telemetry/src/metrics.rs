//! Process-wide session counters and their periodic broadcast.
//!
//! Bridges update a shared [`MetricsAggregate`]; a [`MetricsBroadcaster`]
//! reads [`MetricsSnapshot`] copies on a fixed interval and hands them to
//! subscribers. A failing or panicking subscriber is logged and skipped.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Shared counters mutated by every bridge.
#[derive(Debug, Default)]
pub struct MetricsAggregate {
    active_sessions: AtomicU64,
    messages_processed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Sessions with a live bridge.
    pub active_sessions: u64,
    /// Upstream frames processed.
    pub messages_processed: u64,
    /// Errors reported by any bridge.
    pub errors: u64,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl MetricsAggregate {
    /// Create a zeroed aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session bridge was created.
    pub fn increment_active(&self) {
        let _ = self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A session bridge was torn down. Never drops below zero.
    pub fn decrement_active(&self) {
        let result = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if result.is_err() {
            warn!("active session counter already at zero, ignoring decrement");
        }
    }

    /// An upstream frame was processed.
    pub fn increment_messages(&self) {
        let _ = self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An error was reported.
    pub fn increment_errors(&self) {
        let _ = self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timestamp: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber callback. Errors are logged, never propagated.
pub type MetricsCallback = Arc<dyn Fn(&MetricsSnapshot) -> anyhow::Result<()> + Send + Sync>;

type SubscriberMap = Arc<RwLock<HashMap<u64, MetricsCallback>>>;

/// Delivers snapshots to registered subscribers.
pub struct MetricsBroadcaster {
    aggregate: Arc<MetricsAggregate>,
    subscribers: SubscriberMap,
    next_id: AtomicU64,
}

impl MetricsBroadcaster {
    /// Create a broadcaster over a shared aggregate.
    pub fn new(aggregate: Arc<MetricsAggregate>) -> Self {
        Self {
            aggregate,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// The aggregate this broadcaster reads.
    pub fn aggregate(&self) -> &Arc<MetricsAggregate> {
        &self.aggregate
    }

    /// Register a callback, optionally removed automatically after `duration`.
    ///
    /// The expiry timer is a spawned task, so a bounded subscription must be
    /// created from within a Tokio runtime.
    pub fn subscribe<F>(&self, callback: F, duration: Option<Duration>) -> MetricsSubscription
    where
        F: Fn(&MetricsSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.subscribers.write().insert(id, Arc::new(callback));
        let cancel = CancellationToken::new();

        if let Some(duration) = duration {
            let subscribers = Arc::clone(&self.subscribers);
            let token = cancel.clone();
            drop(tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(duration) => {
                        if subscribers.write().remove(&id).is_some() {
                            debug!(subscription = id, "metrics subscription expired");
                        }
                    }
                }
            }));
        }

        debug!(subscription = id, ?duration, "metrics subscriber registered");
        MetricsSubscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
            cancel,
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Take one snapshot and deliver it to every subscriber.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn broadcast_once(&self) -> usize {
        let snapshot = self.aggregate.snapshot();
        // Clone out so callbacks may subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<(u64, MetricsCallback)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&snapshot))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(subscription = id, error = %e, "metrics subscriber failed"),
                Err(_) => error!(subscription = id, "metrics subscriber panicked"),
            }
        }
        delivered
    }

    /// Broadcast every `interval` until `cancel` fires. The first broadcast
    /// happens one interval after start.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("metrics broadcaster stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.broadcast_once();
                }
            }
        }
    }
}

/// Handle returned by [`MetricsBroadcaster::subscribe`].
///
/// Dropping it leaves the subscription in place; call [`unsubscribe`](Self::unsubscribe).
pub struct MetricsSubscription {
    id: u64,
    subscribers: SubscriberMap,
    cancel: CancellationToken,
}

impl MetricsSubscription {
    /// Subscription ID, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the subscriber and invalidate its expiry timer. Idempotent.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
        if self.subscribers.write().remove(&self.id).is_some() {
            debug!(subscription = self.id, "metrics subscriber removed");
        }
    }
}

impl std::fmt::Debug for MetricsSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(&MetricsSnapshot) -> anyhow::Result<()> + use<> {
        let counter = Arc::clone(counter);
        move |_: &MetricsSnapshot| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn counters_update() {
        let agg = MetricsAggregate::new();
        agg.increment_active();
        agg.increment_active();
        agg.decrement_active();
        agg.increment_messages();
        agg.increment_errors();
        agg.increment_errors();
        let snap = agg.snapshot();
        assert_eq!(snap.active_sessions, 1);
        assert_eq!(snap.messages_processed, 1);
        assert_eq!(snap.errors, 2);
    }

    #[test]
    fn active_never_negative() {
        let agg = MetricsAggregate::new();
        agg.decrement_active();
        assert_eq!(agg.snapshot().active_sessions, 0);
        agg.increment_active();
        assert_eq!(agg.snapshot().active_sessions, 1);
    }

    #[test]
    fn snapshot_is_an_independent_copy() {
        let agg = MetricsAggregate::new();
        agg.increment_messages();
        let first = agg.snapshot();
        let second = agg.snapshot();
        agg.increment_messages();
        agg.increment_active();
        assert_eq!(first.messages_processed, 1);
        assert_eq!(first.active_sessions, 0);
        assert_eq!(second.messages_processed, 1);
        assert_eq!(agg.snapshot().messages_processed, 2);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let agg = MetricsAggregate::new();
        agg.increment_active();
        let v = serde_json::to_value(agg.snapshot()).unwrap();
        assert_eq!(v["activeSessions"], 1);
        assert_eq!(v["messagesProcessed"], 0);
        assert_eq!(v["errors"], 0);
        assert!(v["timestamp"].is_string());
    }

    #[tokio::test]
    async fn failing_subscribers_do_not_block_others() {
        let broadcaster = MetricsBroadcaster::new(Arc::new(MetricsAggregate::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let _a = broadcaster.subscribe(|_| anyhow::bail!("subscriber down"), None);
        let _b = broadcaster.subscribe(|_| panic!("subscriber exploded"), None);
        let _c = broadcaster.subscribe(counting(&hits), None);

        assert_eq!(broadcaster.broadcast_once(), 1);
        assert_eq!(broadcaster.broadcast_once(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(broadcaster.subscriber_count(), 3);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broadcaster = MetricsBroadcaster::new(Arc::new(MetricsAggregate::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = broadcaster.subscribe(counting(&hits), None);
        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.broadcast_once(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_subscription_expires() {
        let broadcaster = MetricsBroadcaster::new(Arc::new(MetricsAggregate::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = broadcaster.subscribe(counting(&hits), Some(Duration::from_secs(10)));
        assert_eq!(broadcaster.subscriber_count(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(broadcaster.subscriber_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cancel_beats_expiry() {
        let broadcaster = MetricsBroadcaster::new(Arc::new(MetricsAggregate::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = broadcaster.subscribe(counting(&hits), Some(Duration::from_secs(10)));
        sub.unsubscribe();

        // A later subscriber must survive the first one's would-be expiry.
        let _other = broadcaster.subscribe(counting(&hits), None);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_cancelled() {
        let aggregate = Arc::new(MetricsAggregate::new());
        let broadcaster = Arc::new(MetricsBroadcaster::new(Arc::clone(&aggregate)));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = broadcaster.subscribe(
            move |snap| {
                sink.lock().push(snap.messages_processed);
                Ok(())
            },
            None,
        );

        let cancel = CancellationToken::new();
        let task = {
            let broadcaster = Arc::clone(&broadcaster);
            let cancel = cancel.clone();
            tokio::spawn(async move { broadcaster.run(Duration::from_secs(1), cancel).await })
        };

        aggregate.increment_messages();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(*seen.lock(), vec![1, 1, 1]);
    }
}
