//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! pipeline service. All types derive Serde traits for
//! deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the pipeline service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// HTTP server settings (bind address, timeouts, body limit).
    pub server: ServerConfig,

    /// Session admission limits.
    pub concurrency: ConcurrencyConfig,

    /// Default retry and circuit breaker settings, applied to every
    /// provider without an override.
    pub resilience: ResilienceConfig,

    /// Remote provider definitions.
    pub providers: Vec<ProviderConfig>,

    /// Fallback order per pipeline stage.
    pub chains: ChainsConfig,

    /// Webhook callback and polling settings.
    pub callbacks: CallbackConfig,

    /// Input validation and auth settings.
    pub security: SecurityConfig,

    /// Per-session behavior.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            resilience: ResilienceConfig::default(),
            providers: default_providers(),
            chains: ChainsConfig::default(),
            callbacks: CallbackConfig::default(),
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Look up a provider definition by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Whole-request deadline in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
            max_body_bytes: 1_048_576,
        }
    }
}

/// Session admission configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Pipeline sessions running at once.
    pub max_concurrency: usize,

    /// Sessions allowed to wait for a slot; above this, reject.
    pub max_queue_length: usize,

    /// How long a queued session may wait before rejection.
    pub queue_wait_timeout_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_queue_length: 10,
            queue_wait_timeout_ms: 15_000,
        }
    }
}

/// Retry and circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retries after the first attempt (2 means up to 3 attempts).
    pub max_retries: u32,

    /// Base delay between retries in milliseconds; grows linearly
    /// with the attempt number.
    pub retry_delay_ms: u64,

    /// Cap on any computed or server-hinted retry delay.
    pub max_retry_delay_ms: u64,

    /// Per-attempt request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Failure ratio that opens the circuit (0 < x <= 1).
    pub error_rate_threshold: f64,

    /// Calls required in the window before the ratio applies.
    pub min_request_volume: u32,

    /// Absolute failure count that opens the circuit.
    pub max_failures: u32,

    /// Time the circuit stays open before a probe in milliseconds.
    pub reset_timeout_ms: u64,

    /// Rolling window for breaker counters in seconds.
    pub window_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            request_timeout_ms: 10_000,
            error_rate_threshold: 0.5,
            min_request_volume: 5,
            max_failures: 5,
            reset_timeout_ms: 30_000,
            window_secs: 60,
        }
    }
}

/// One remote provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Unique provider identifier, referenced from chains.
    pub name: String,

    /// Base URL of the provider API.
    pub base_url: String,

    /// API key; when empty, the `<NAME>_API_KEY` environment variable
    /// is used instead.
    #[serde(default)]
    pub api_key: String,

    /// Disabled providers cannot appear in chains.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Full resilience override for this provider.
    #[serde(default)]
    pub resilience: Option<ResilienceConfig>,
}

fn default_true() -> bool {
    true
}

fn default_providers() -> Vec<ProviderConfig> {
    let provider = |name: &str, base_url: &str| ProviderConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        api_key: String::new(),
        enabled: true,
        resilience: None,
    };
    vec![
        provider("tikhub-web", "https://api.tikhub.io"),
        provider("tikhub-app", "https://api.tikhub.io"),
        provider("yunmao", "https://api.guangfan.tech"),
        provider("minimax", "https://api.minimax.chat"),
        provider("tongyi", "https://dashscope.aliyuncs.com/compatible-mode/v1"),
    ]
}

/// Fallback order per stage. Entries name providers, or the builtin
/// "direct" (resolve) and "mock" (transcribe, script) adapters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainsConfig {
    pub resolve: Vec<String>,
    pub transcribe: Vec<String>,
    pub script: Vec<String>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            resolve: vec![
                "tikhub-web".to_string(),
                "tikhub-app".to_string(),
                "direct".to_string(),
            ],
            transcribe: vec![
                "yunmao".to_string(),
                "minimax".to_string(),
                "mock".to_string(),
            ],
            script: vec![
                "tongyi".to_string(),
                "minimax".to_string(),
                "mock".to_string(),
            ],
        }
    }
}

/// Webhook callback and polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Public base URL of this service. Empty disables webhooks and
    /// async providers fall back to polling.
    pub public_base_url: String,

    /// How long an unanswered callback registration is kept.
    pub pending_ttl_secs: u64,

    /// First polling interval in milliseconds.
    pub poll_initial_ms: u64,

    /// Polling interval ceiling in milliseconds.
    pub poll_max_ms: u64,

    /// Total time budget for an async result in seconds.
    pub poll_budget_secs: u64,

    /// How often expired registrations are swept in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            public_base_url: String::new(),
            pending_ttl_secs: 300,
            poll_initial_ms: 3_000,
            poll_max_ms: 15_000,
            poll_budget_secs: 120,
            sweep_interval_secs: 60,
        }
    }
}

/// Input validation and auth configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Require a Bearer token on the transcription endpoint.
    pub require_auth: bool,

    /// Minimum accepted token length.
    pub min_token_length: usize,

    /// Maximum accepted video URL length in bytes.
    pub max_url_length: usize,

    /// Hosts that are never fetched, checked after lowercasing.
    pub blocked_hosts: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_auth: false,
            min_token_length: 32,
            max_url_length: 2048,
            blocked_hosts: vec![
                "169.254.169.254".to_string(),
                "metadata.google.internal".to_string(),
                "metadata.azure.com".to_string(),
                "kubernetes.default.svc".to_string(),
                "localhost".to_string(),
            ],
        }
    }
}

/// Per-session behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Soft deadline for a whole pipeline run in seconds; exceeded
    /// sessions are logged, not killed.
    pub soft_budget_secs: u64,

    /// Language assumed when the request does not specify one.
    pub default_language: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            soft_budget_secs: 50,
            default_language: "zh".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
