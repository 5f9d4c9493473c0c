//! Breaker-gated HTTP client with bounded retries.
//!
//! One `ResilientClient` exists per configured provider entry, so each
//! fallback slot trips and recovers on its own even when two entries
//! point at the same host. Adapters that share an entry (one provider
//! serving several stages) share the instance and its breaker.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::PipelineError;
use crate::observability::metrics;
use crate::resilience::backoff;
use crate::resilience::breaker::{BreakerSettings, CallKind, CircuitBreaker, DependencyState};

/// A single JSON request against the dependency's base URL.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: reqwest::Method,
    /// Path (and optional query) appended to the base URL; must start
    /// with `/`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Overrides the policy's per-attempt timeout when set.
    pub timeout_override: Option<Duration>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout_override: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
            timeout_override: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }
}

/// Retry budget applied to every standard (non-probe) call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 2 means up to 3 attempts.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Deadline for one attempt, send through body read.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for one dependency: breaker preflight, per-attempt
/// timeout, transient-only retries, one breaker record per terminal
/// outcome.
#[derive(Debug)]
pub struct ResilientClient {
    name: String,
    base_url: String,
    http: reqwest::Client,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        http: reqwest::Client,
        breaker_settings: BreakerSettings,
        policy: RetryPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), breaker_settings),
            name,
            base_url: base_url.into(),
            http,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn would_reject(&self) -> bool {
        self.breaker.would_reject()
    }

    pub fn snapshot(&self) -> DependencyState {
        self.breaker.snapshot()
    }

    /// Run one logical call: breaker preflight, then up to
    /// `max_retries + 1` attempts (a probe gets exactly one). The
    /// breaker counts the terminal outcome once, never per attempt.
    /// `kind` is held across every await, so cancelling this future
    /// settles an unreported probe through its ticket's `Drop`.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Value, PipelineError> {
        let kind = self.breaker.preflight()?;
        let attempts_allowed = match kind {
            CallKind::Probe(_) => 1,
            CallKind::Standard => self.policy.max_retries + 1,
        };
        let started = Instant::now();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt_once(&spec).await {
                Ok(value) => {
                    self.breaker.record_success(kind);
                    metrics::record_dependency_call(&self.name, "success", started);
                    return Ok(value);
                }
                Err(err) if transient(&err) && attempt < attempts_allowed => {
                    let fallback = backoff::retry_delay(
                        attempt,
                        self.policy.retry_delay.as_millis() as u64,
                        self.policy.max_retry_delay.as_millis() as u64,
                    );
                    let delay = match &err {
                        PipelineError::RateLimited { retry_after_ms, .. } => {
                            backoff::rate_limit_delay(
                                *retry_after_ms,
                                fallback,
                                self.policy.max_retry_delay.as_millis() as u64,
                            )
                        }
                        _ => fallback,
                    };
                    tracing::warn!(
                        dependency = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.breaker.record_failure(kind);
                    metrics::record_dependency_call(&self.name, "failure", started);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt_once(&self, spec: &RequestSpec) -> Result<Value, PipelineError> {
        let url = join_url(&self.base_url, &spec.path);
        let mut request = self.http.request(spec.method.clone(), &url);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let deadline = spec.timeout_override.unwrap_or(self.policy.request_timeout);
        let outcome = tokio::time::timeout(deadline, async {
            let response = request.send().await?;
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, retry_after, text))
        })
        .await;

        let (status, retry_after, text) = match outcome {
            Err(_) => {
                return Err(PipelineError::Timeout {
                    dependency: self.name.clone(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
            Ok(Err(err)) if err.is_timeout() => {
                return Err(PipelineError::Timeout {
                    dependency: self.name.clone(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
            Ok(Err(err)) => {
                return Err(PipelineError::Network {
                    dependency: self.name.clone(),
                    message: err.to_string(),
                })
            }
            Ok(Ok(parts)) => parts,
        };

        if status.as_u16() == 429 {
            return Err(PipelineError::RateLimited {
                dependency: self.name.clone(),
                retry_after_ms: retry_after.map(|secs| secs.saturating_mul(1000)),
            });
        }
        if !status.is_success() {
            return Err(PipelineError::Http {
                dependency: self.name.clone(),
                status: status.as_u16(),
            });
        }

        serde_json::from_str(&text).map_err(|err| PipelineError::Payload {
            provider: self.name.clone(),
            message: format!("response body is not valid JSON: {err}"),
        })
    }
}

/// Append a path to the base URL without `Url::join` semantics, which
/// would drop base path segments like `/compatible-mode/v1`.
fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// `Retry-After` in seconds; the HTTP-date form is ignored.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Errors worth another attempt: the network failed, the call timed
/// out, the server errored, or we were throttled. Client-side 4xx and
/// malformed payloads fail fast.
fn transient(err: &PipelineError) -> bool {
    match err {
        PipelineError::Timeout { .. }
        | PipelineError::Network { .. }
        | PipelineError::RateLimited { .. } => true,
        PipelineError::Http { status, .. } => *status >= 500,
        _ => false,
    }
}
