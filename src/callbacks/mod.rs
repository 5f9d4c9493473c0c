//! Webhook callback registry.
//!
//! Transcription tasks submitted with a notify URL park a oneshot
//! sender here keyed by task id. The webhook route resolves it. An
//! outcome whose task id has no waiter yet is parked and handed to the
//! next registration: the provider may call back before the submit
//! response carrying the task id has even been read. A periodic sweep
//! evicts both sides.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::observability::metrics;

/// Delivered to the waiting session: transcription text, or the
/// provider's failure message.
pub type CallbackOutcome = Result<String, String>;

struct PendingCallback {
    sender: oneshot::Sender<CallbackOutcome>,
    registered_at: Instant,
}

struct ParkedOutcome {
    outcome: CallbackOutcome,
    parked_at: Instant,
}

/// Cheaply cloneable; all clones share the maps.
#[derive(Clone)]
pub struct CallbackRegistry {
    inner: Arc<DashMap<String, PendingCallback>>,
    parked: Arc<DashMap<String, ParkedOutcome>>,
    ttl: Duration,
}

impl CallbackRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            parked: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Park a waiter for `task_id`. An outcome that arrived first is
    /// consumed on the spot. A duplicate registration replaces the
    /// previous one, whose receiver then resolves as cancelled.
    pub fn register(&self, task_id: impl Into<String>) -> oneshot::Receiver<CallbackOutcome> {
        let task_id = task_id.into();
        let (sender, receiver) = oneshot::channel();
        if let Some((_, parked)) = self.parked.remove(&task_id) {
            tracing::debug!(task_id = %task_id, "Parked callback consumed at registration");
            let _ = sender.send(parked.outcome);
            return receiver;
        }
        self.inner.insert(
            task_id,
            PendingCallback {
                sender,
                registered_at: Instant::now(),
            },
        );
        receiver
    }

    /// Deliver a webhook outcome. Returns true only when a live waiter
    /// received it; with no waiter yet the outcome is parked for the
    /// next `register` of the task id.
    pub fn resolve(&self, task_id: &str, outcome: CallbackOutcome) -> bool {
        if let Some((_, pending)) = self.inner.remove(task_id) {
            if pending.sender.send(outcome).is_err() {
                tracing::debug!(task_id, "Callback waiter already gave up");
                return false;
            }
            return true;
        }
        self.parked.insert(
            task_id.to_string(),
            ParkedOutcome {
                outcome,
                parked_at: Instant::now(),
            },
        );
        tracing::debug!(task_id, "Callback arrived before its waiter, parked");
        false
    }

    /// Drop a waiter that stopped waiting (timeout or cancellation).
    pub fn deregister(&self, task_id: &str) {
        self.inner.remove(task_id);
    }

    /// Remove waiters and parked outcomes older than the TTL. Returns
    /// how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let before = self.inner.len() + self.parked.len();
        self.inner
            .retain(|_, pending| pending.registered_at.elapsed() < self.ttl);
        self.parked
            .retain(|_, parked| parked.parked_at.elapsed() < self.ttl);
        let evicted = before.saturating_sub(self.inner.len() + self.parked.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired callback registrations");
        }
        metrics::record_pending_callbacks(self.inner.len());
        evicted
    }

    pub fn pending(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_reaches_registered_waiter() {
        let registry = CallbackRegistry::new(Duration::from_secs(60));
        let receiver = registry.register("task-1");

        assert!(registry.resolve("task-1", Ok("转录完成".to_string())));
        assert_eq!(receiver.await.unwrap(), Ok("转录完成".to_string()));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_task_is_unmatched() {
        let registry = CallbackRegistry::new(Duration::from_secs(60));
        assert!(!registry.resolve("nope", Ok("text".to_string())));
    }

    #[tokio::test]
    async fn early_outcome_is_parked_until_registration() {
        let registry = CallbackRegistry::new(Duration::from_secs(60));
        assert!(!registry.resolve("task-3", Ok("先到的结果".to_string())));

        let receiver = registry.register("task-3");
        assert_eq!(receiver.await.unwrap(), Ok("先到的结果".to_string()));
        assert_eq!(registry.pending(), 0);

        // Consumed: a second registration starts from a clean slate.
        let mut receiver = registry.register("task-3");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn deregistered_waiter_is_unmatched() {
        let registry = CallbackRegistry::new(Duration::from_secs(60));
        let _receiver = registry.register("task-2");
        registry.deregister("task-2");
        assert!(!registry.resolve("task-2", Err("failed".to_string())));
    }

    #[tokio::test]
    async fn ttl_eviction_drops_stale_entries() {
        let registry = CallbackRegistry::new(Duration::from_millis(20));
        let receiver = registry.register("stale");
        assert!(!registry.resolve("early", Ok("left over".to_string())));
        assert_eq!(registry.evict_expired(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.evict_expired(), 2);
        assert!(!registry.resolve("stale", Ok("late".to_string())));
        assert!(receiver.await.is_err());

        // The evicted outcome is gone; a fresh waiter hears nothing.
        let mut receiver = registry.register("early");
        assert!(receiver.try_recv().is_err());
    }
}
