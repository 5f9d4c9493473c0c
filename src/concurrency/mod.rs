//! Session admission: bounded concurrency with a bounded FIFO queue.
//!
//! # Data Flow
//! ```text
//! validated request
//!     → try_acquire (fast path, no queueing)
//!     → queue bound check (reject when full)
//!     → FIFO wait with deadline
//!     → SessionPermit held for the whole pipeline run
//! ```
//!
//! # Design Decisions
//! - tokio's semaphore queues fairly, so waiters are served in arrival
//!   order
//! - The queue counter is guarded by a Drop type; a caller that stops
//!   waiting (timeout or disconnect) cannot leak a queue slot

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::PipelineError;
use crate::observability::metrics;

#[derive(Debug)]
pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    max_queue_length: usize,
    queue_wait_timeout: Duration,
    waiting: AtomicUsize,
    active: AtomicUsize,
}

/// Admission state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionSnapshot {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub max_queue_length: usize,
}

/// Holds one pipeline slot; dropping it (normal return, error return
/// or panic unwind alike) frees the slot.
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
    controller: Arc<ConcurrencyController>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        let active = self.controller.active.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::record_admission(active, self.controller.waiting.load(Ordering::Relaxed));
    }
}

struct QueueGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConcurrencyController {
    pub fn new(
        max_concurrency: usize,
        max_queue_length: usize,
        queue_wait_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            max_queue_length,
            queue_wait_timeout,
            waiting: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
        })
    }

    /// Admit a session or reject it with `SYSTEM_BUSY`.
    ///
    /// Rejection is immediate when the queue is already full, and
    /// after `queue_wait_timeout` when a queued slot never opens.
    pub async fn admit(self: &Arc<Self>, session_id: &str) -> Result<SessionPermit, PipelineError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(self.issue(permit, session_id));
        }

        let prev_waiting = self.waiting.fetch_add(1, Ordering::Relaxed);
        if prev_waiting >= self.max_queue_length {
            self.waiting.fetch_sub(1, Ordering::Relaxed);
            metrics::record_admission_rejected("queue_full");
            tracing::warn!(session_id, queued = prev_waiting, "Admission queue full");
            return Err(PipelineError::ConcurrencyLimit {
                detail: "admission queue is full".into(),
            });
        }
        let _queue_guard = QueueGuard {
            waiting: &self.waiting,
        };

        match timeout(self.queue_wait_timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.issue(permit, session_id)),
            Ok(Err(_)) => Err(PipelineError::ConcurrencyLimit {
                detail: "admission is shut down".into(),
            }),
            Err(_) => {
                metrics::record_admission_rejected("queue_timeout");
                tracing::warn!(
                    session_id,
                    wait_ms = self.queue_wait_timeout.as_millis() as u64,
                    "Timed out waiting for a pipeline slot"
                );
                Err(PipelineError::ConcurrencyLimit {
                    detail: "timed out waiting for a pipeline slot".into(),
                })
            }
        }
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            active: self.active.load(Ordering::Relaxed),
            queued: self.waiting.load(Ordering::Relaxed),
            max_concurrency: self.max_concurrency,
            max_queue_length: self.max_queue_length,
        }
    }

    fn issue(self: &Arc<Self>, permit: OwnedSemaphorePermit, session_id: &str) -> SessionPermit {
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_admission(active, self.waiting.load(Ordering::Relaxed));
        tracing::debug!(session_id, active, "Session admitted");
        SessionPermit {
            _permit: permit,
            controller: self.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let controller = ConcurrencyController::new(1, 10, Duration::from_secs(1));
        let first = controller.admit("s1").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for index in [2u32, 3] {
            let controller = controller.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = controller.admit("queued").await.unwrap();
                tx.send(index).unwrap();
            });
            // ensure deterministic queue entry order
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(controller.snapshot().queued, 2);
        drop(first);
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn slot_is_released_when_the_holder_errors() {
        let controller = ConcurrencyController::new(1, 0, Duration::from_millis(10));

        let outcome: Result<(), &str> = async {
            let _permit = controller.admit("failing").await.unwrap();
            Err("stage blew up")
        }
        .await;
        assert!(outcome.is_err());

        assert_eq!(controller.snapshot().active, 0);
        let _again = controller.admit("next").await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_rejects_without_waiting() {
        let controller = ConcurrencyController::new(1, 0, Duration::from_secs(5));
        let _held = controller.admit("holder").await.unwrap();

        let started = Instant::now();
        let err = controller.admit("rejected").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(err.code(), "SYSTEM_BUSY");
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn queued_waiter_times_out() {
        let controller = ConcurrencyController::new(1, 5, Duration::from_millis(50));
        let _held = controller.admit("holder").await.unwrap();

        let started = Instant::now();
        let err = controller.admit("waiter").await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(err.code(), "SYSTEM_BUSY");
        assert_eq!(controller.snapshot().queued, 0);
    }

    #[tokio::test]
    async fn aborted_waiter_frees_its_queue_slot() {
        let controller = ConcurrencyController::new(1, 1, Duration::from_secs(5));
        let _held = controller.admit("holder").await.unwrap();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                let _ = controller.admit("doomed").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.snapshot().queued, 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(controller.snapshot().queued, 0);
    }
}
