//! Error taxonomy shared across the pipeline.
//!
//! Every failure a caller can observe is one of these variants. Each maps
//! to a stable wire code, a user-facing message, and a retryable flag, so
//! callers can decide whether to retry without parsing internal messages.

use thiserror::Error;

use crate::providers::{AttemptRecord, StageName};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request shape or parameter errors.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The supplied or extracted URL failed validation.
    #[error("invalid video url: {0}")]
    InvalidVideoUrl(String),

    /// Free text contained no recognizable video link.
    #[error("no video link found in input")]
    NoVideoLink,

    /// Missing or malformed credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The dependency's circuit is open; the call was not issued.
    #[error("circuit open for {dependency}")]
    CircuitOpen { dependency: String },

    /// The attempt exceeded its per-call deadline.
    #[error("{dependency} timed out after {timeout_ms}ms")]
    Timeout { dependency: String, timeout_ms: u64 },

    /// Connection-level failure before any HTTP status was received.
    #[error("network error calling {dependency}: {message}")]
    Network { dependency: String, message: String },

    /// Non-success HTTP status from the dependency.
    #[error("{dependency} returned HTTP {status}")]
    Http { dependency: String, status: u16 },

    /// The provider asked us to slow down (HTTP 429 or a quota code).
    #[error("rate limited by {dependency}")]
    RateLimited {
        dependency: String,
        retry_after_ms: Option<u64>,
    },

    /// Well-formed HTTP exchange but an unusable payload: a failing
    /// business code, missing fields, or unparseable script JSON.
    #[error("{provider} returned an unusable payload: {message}")]
    Payload { provider: String, message: String },

    /// Every adapter in a stage's chain failed or was skipped.
    #[error("all providers failed for stage {stage}")]
    AllProvidersFailed {
        stage: StageName,
        attempts: Vec<AttemptRecord>,
    },

    /// Admission rejected: capacity and queue are full, or the queue
    /// wait timed out.
    #[error("concurrency limit reached: {detail}")]
    ConcurrencyLimit { detail: String },
}

impl PipelineError {
    /// Whether the caller may reasonably retry the whole request later.
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::InvalidRequest(_)
            | PipelineError::InvalidVideoUrl(_)
            | PipelineError::NoVideoLink
            | PipelineError::Unauthorized(_)
            | PipelineError::Payload { .. } => false,
            PipelineError::Http { status, .. } => *status >= 500,
            PipelineError::CircuitOpen { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::Network { .. }
            | PipelineError::RateLimited { .. }
            | PipelineError::AllProvidersFailed { .. }
            | PipelineError::ConcurrencyLimit { .. } => true,
        }
    }

    /// Stable machine-readable code carried on the wire and in attempt
    /// records.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "INVALID_REQUEST",
            PipelineError::InvalidVideoUrl(_) => "INVALID_VIDEO_URL",
            PipelineError::NoVideoLink => "NO_VIDEO_LINK",
            PipelineError::Unauthorized(_) => "UNAUTHORIZED",
            PipelineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            PipelineError::Timeout { .. } => "TIMEOUT",
            PipelineError::Network { .. } => "NETWORK_ERROR",
            PipelineError::Http { .. } => "UPSTREAM_ERROR",
            PipelineError::RateLimited { .. } => "RATE_LIMITED",
            PipelineError::Payload { .. } => "UPSTREAM_PAYLOAD",
            PipelineError::AllProvidersFailed { stage, .. } => match stage {
                StageName::Resolve => "RESOLVE_FAILED",
                StageName::Transcribe => "TRANSCRIPTION_FAILED",
                StageName::Script => "SCRIPT_GENERATION_FAILED",
            },
            PipelineError::ConcurrencyLimit { .. } => "SYSTEM_BUSY",
        }
    }

    /// End-user message, distinct from the internal Display message.
    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::InvalidRequest(_) => "请求参数有误，请检查后重试",
            PipelineError::InvalidVideoUrl(_) => "请提供有效的视频链接",
            PipelineError::NoVideoLink => "未在输入中找到视频链接，请检查后重试",
            PipelineError::Unauthorized(_) => "认证失败，请检查访问令牌",
            PipelineError::CircuitOpen { .. } => "服务暂时不可用，请稍后重试",
            PipelineError::Timeout { .. } => "请求超时，请稍后重试",
            PipelineError::Network { .. } => "网络异常，请稍后重试",
            PipelineError::Http { .. } | PipelineError::Payload { .. } => {
                "上游服务异常，请稍后重试"
            }
            PipelineError::RateLimited { .. } => "调用过于频繁，请稍后再试",
            PipelineError::AllProvidersFailed { stage, .. } => match stage {
                StageName::Resolve => "视频解析失败，请稍后重试",
                StageName::Transcribe => "视频转录失败，请稍后重试",
                StageName::Script => "脚本生成失败，请稍后重试",
            },
            PipelineError::ConcurrencyLimit { .. } => "当前请求过多，请稍后重试",
        }
    }

    /// Aggregated failure for one stage, carrying the full attempt
    /// history so callers see the whole fallback story.
    pub fn stage_failure(stage: StageName, attempts: Vec<AttemptRecord>) -> Self {
        PipelineError::AllProvidersFailed { stage, attempts }
    }
}
