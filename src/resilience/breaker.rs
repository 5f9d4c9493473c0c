//! Per-dependency circuit breaker.
//!
//! Tracks terminal call outcomes over a rolling window and fast-fails
//! while a dependency is known bad. State transitions:
//! `CLOSED → OPEN → HALF_OPEN → CLOSED` (probe ok) or back to `OPEN`
//! (probe failed or abandoned). There is no other path.
//!
//! `HALF_OPEN` always means exactly one [`ProbeTicket`] is
//! outstanding. The ticket settles through `record_success` or
//! `record_failure`; if its holder is cancelled first, the ticket's
//! `Drop` reopens the circuit.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::PipelineError;
use crate::observability::metrics;

/// Breaker state (0=Closed, 1=Open, 2=HalfOpen).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Thresholds controlling when a breaker trips and recovers.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Failure ratio at or above which the breaker opens, once the
    /// window holds at least `min_request_volume` calls.
    pub error_rate_threshold: f64,
    pub min_request_volume: u32,
    /// Absolute failure count that opens the breaker regardless of
    /// volume.
    pub max_failures: u32,
    /// How long the breaker stays open before allowing a probe.
    pub reset_timeout: Duration,
    /// Rolling window after which counters restart from zero.
    pub window: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            min_request_volume: 5,
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

/// Whether a call admitted by `preflight` is an ordinary call or the
/// single half-open probe. A probe carries its ticket; hand the kind
/// back through `record_success` or `record_failure` to settle it.
#[derive(Debug)]
pub enum CallKind<'a> {
    Standard,
    Probe(ProbeTicket<'a>),
}

/// Exclusive claim on the half-open probe slot.
///
/// Dropped unsettled (the admitted call was cancelled mid-flight) it
/// reopens the circuit with a fresh `opened_at`, and the slot comes
/// back after the next reset timeout.
#[derive(Debug)]
pub struct ProbeTicket<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl ProbeTicket<'_> {
    fn settle_success(mut self) {
        self.settled = true;
        self.breaker.close_after_probe();
    }

    fn settle_failure(mut self) {
        self.settled = true;
        self.breaker.reopen("Probe failed, circuit reopened");
    }
}

impl Drop for ProbeTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker
                .reopen("Probe cancelled before settling, circuit reopened");
        }
    }
}

/// Lock-free circuit breaker for one upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    state: AtomicU8,
    request_count: AtomicU32,
    failure_count: AtomicU32,
    /// Millis since `epoch` when the breaker last opened.
    opened_at_ms: AtomicU64,
    /// Millis since `epoch` when the current counting window began.
    window_started_ms: AtomicU64,
    epoch: Instant,
}

/// Point-in-time breaker view, surfaced on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyState {
    pub name: String,
    pub circuit_state: CircuitState,
    pub request_count: u32,
    pub failure_count: u32,
    pub error_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_ms_ago: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: AtomicU8::new(CircuitState::Closed as u8),
            request_count: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            window_started_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state.load(Ordering::Relaxed).into()
    }

    /// Gate a call before any network work happens.
    ///
    /// Returns the kind of call the caller is allowed to make, or an
    /// immediate `CircuitOpen` error. The `Open → HalfOpen` transition
    /// and the probe claim are one compare-exchange, so only a single
    /// caller can ever hold the probe slot.
    pub fn preflight(&self) -> Result<CallKind<'_>, PipelineError> {
        match self.state() {
            CircuitState::Closed => {
                self.maybe_rotate_window();
                Ok(CallKind::Standard)
            }
            CircuitState::Open => {
                if self.since_opened() < self.settings.reset_timeout {
                    return Err(self.open_error());
                }
                // Reset timeout elapsed; race for the probe slot.
                match self.state.compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        tracing::info!(dependency = %self.name, "Circuit half-open, probing");
                        metrics::record_breaker_transition(&self.name, CircuitState::HalfOpen);
                        Ok(CallKind::Probe(ProbeTicket {
                            breaker: self,
                            settled: false,
                        }))
                    }
                    Err(_) => Err(self.open_error()),
                }
            }
            CircuitState::HalfOpen => Err(self.open_error()),
        }
    }

    /// Report a successful terminal outcome for a call admitted by
    /// `preflight`.
    pub fn record_success(&self, kind: CallKind<'_>) {
        match kind {
            CallKind::Probe(ticket) => ticket.settle_success(),
            CallKind::Standard => {
                self.request_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Report a failed terminal outcome for a call admitted by
    /// `preflight`. Retried-then-failed calls count once, here.
    pub fn record_failure(&self, kind: CallKind<'_>) {
        match kind {
            CallKind::Probe(ticket) => ticket.settle_failure(),
            CallKind::Standard => {
                let requests = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;

                let rate = failures as f64 / requests as f64;
                let over_rate = requests >= self.settings.min_request_volume
                    && rate >= self.settings.error_rate_threshold;
                let over_count = failures >= self.settings.max_failures;
                if !(over_rate || over_count) {
                    return;
                }

                // Only trip from Closed; Open/HalfOpen keep their own exit paths.
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Closed as u8,
                        CircuitState::Open as u8,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    self.opened_at_ms.store(self.now_ms(), Ordering::Relaxed);
                    tracing::warn!(
                        dependency = %self.name,
                        failures,
                        requests,
                        error_rate = rate,
                        "Circuit opened"
                    );
                    metrics::record_breaker_transition(&self.name, CircuitState::Open);
                }
            }
        }
    }

    /// True when a call issued right now would be rejected without
    /// reaching the network. Has no side effects, so fallback chains
    /// can use it to skip a dependency without consuming the probe.
    pub fn would_reject(&self) -> bool {
        match self.state() {
            CircuitState::Closed => false,
            CircuitState::Open => self.since_opened() < self.settings.reset_timeout,
            CircuitState::HalfOpen => true,
        }
    }

    pub fn snapshot(&self) -> DependencyState {
        let state = self.state();
        let requests = self.request_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        DependencyState {
            name: self.name.clone(),
            circuit_state: state,
            request_count: requests,
            failure_count: failures,
            error_rate: if requests == 0 {
                0.0
            } else {
                failures as f64 / requests as f64
            },
            opened_ms_ago: (state == CircuitState::Open)
                .then(|| self.since_opened().as_millis() as u64),
        }
    }

    fn close_after_probe(&self) {
        self.request_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.window_started_ms.store(self.now_ms(), Ordering::Relaxed);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Relaxed);
        tracing::info!(dependency = %self.name, "Circuit closed after successful probe");
        metrics::record_breaker_transition(&self.name, CircuitState::Closed);
    }

    fn reopen(&self, reason: &'static str) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Relaxed);
        self.state.store(CircuitState::Open as u8, Ordering::Relaxed);
        tracing::warn!(dependency = %self.name, "{}", reason);
        metrics::record_breaker_transition(&self.name, CircuitState::Open);
    }

    /// Restart the counting window once it has aged out, so stale
    /// failures cannot trip the breaker forever.
    fn maybe_rotate_window(&self) {
        let now = self.now_ms();
        let started = self.window_started_ms.load(Ordering::Relaxed);
        if now.saturating_sub(started) < self.settings.window.as_millis() as u64 {
            return;
        }
        if self
            .window_started_ms
            .compare_exchange(started, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.request_count.store(0, Ordering::Relaxed);
            self.failure_count.store(0, Ordering::Relaxed);
        }
    }

    fn open_error(&self) -> PipelineError {
        PipelineError::CircuitOpen {
            dependency: self.name.clone(),
        }
    }

    fn since_opened(&self) -> Duration {
        let opened = self.opened_at_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(opened))
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
