//! Resilience layer shared by every remote provider call.
//!
//! # Responsibilities
//! - Per-dependency circuit breakers (closed / open / half-open)
//! - Bounded retries with linear backoff and jitter
//! - Per-attempt request timeouts
//!
//! # Data Flow
//! ```text
//! StageAdapter::call
//!     → ResilientClient::execute
//!         → CircuitBreaker::preflight (fast-fail or probe ticket)
//!         → attempt loop (timeout per attempt, retry transient errors)
//!         → CircuitBreaker::record_success / record_failure
//! ```
//!
//! # Design Decisions
//! - Breakers count terminal outcomes, not individual retry attempts,
//!   so a retried-then-recovered call is one success
//! - The half-open probe is a single attempt with no retries; one
//!   probe in flight at a time, concurrent callers fast-fail
//! - A probe abandoned mid-call (caller future dropped) reopens the
//!   breaker with a fresh reset timer
//! - Only network errors, timeouts, 5xx and 429 are retried; other
//!   4xx responses fail fast

pub mod backoff;
pub mod breaker;
pub mod client;

pub use breaker::{BreakerSettings, CircuitBreaker, CircuitState, DependencyState};
pub use client::{RequestSpec, ResilientClient, RetryPolicy};
