//! Wire formats for the public API.
//!
//! # Responsibilities
//! - Deserialize the transcribe request body (camelCase contract)
//! - Wrap outcomes in the `{success, data}` envelope
//! - Map pipeline errors to `{success, error}` bodies and HTTP statuses
//!
//! # Design Decisions
//! - The client envelope is camelCase; the status document keeps
//!   internal snake_case naming
//! - `message` carries the internal error text, `userMessage` the
//!   presentable one; clients should branch on `code`, not on text
//! - Attempt history is logged server-side, never returned on the wire

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::concurrency::AdmissionSnapshot;
use crate::error::PipelineError;
use crate::pipeline::{PipelineOutcome, PipelineRequest, ProviderAttribution};
use crate::providers::VideoScript;
use crate::resilience::breaker::DependencyState;

/// Body of `POST /api/video/transcribe`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub mixed_text: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl From<TranscribeRequest> for PipelineRequest {
    fn from(body: TranscribeRequest) -> Self {
        PipelineRequest {
            video_url: body.video_url,
            mixed_text: body.mixed_text,
            style: body.style,
            language: body.language,
        }
    }
}

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiSuccess {
    pub success: bool,
    pub data: TranscribeData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeData {
    pub original_text: String,
    pub script: VideoScript,
    /// Wall-clock milliseconds for the whole run.
    pub processing_time: u64,
    pub provider: ProviderAttribution,
}

impl From<PipelineOutcome> for ApiSuccess {
    fn from(outcome: PipelineOutcome) -> Self {
        ApiSuccess {
            success: true,
            data: TranscribeData {
                original_text: outcome.original_text,
                script: outcome.script,
                processing_time: outcome.processing_time_ms,
                provider: outcome.providers,
            },
        }
    }
}

/// Failure envelope.
#[derive(Debug, Serialize)]
pub struct ApiFailure {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub user_message: &'static str,
    pub retryable: bool,
}

impl From<&PipelineError> for ApiFailure {
    fn from(err: &PipelineError) -> Self {
        ApiFailure {
            success: false,
            error: ErrorBody {
                code: err.code(),
                message: err.to_string(),
                user_message: err.user_message(),
                retryable: err.retryable(),
            },
        }
    }
}

/// Body of `GET /api/status`.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub admission: AdmissionSnapshot,
    pub dependencies: Vec<DependencyState>,
    pub pending_callbacks: usize,
}

/// HTTP status for each error class. Caller faults map to 4xx,
/// dependency faults to 502/504, capacity to 503.
pub fn http_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidRequest(_)
        | PipelineError::InvalidVideoUrl(_)
        | PipelineError::NoVideoLink => StatusCode::BAD_REQUEST,
        PipelineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PipelineError::AllProvidersFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::Network { .. }
        | PipelineError::Http { .. }
        | PipelineError::Payload { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::CircuitOpen { .. } | PipelineError::ConcurrencyLimit { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = http_status(&self);
        let body = ApiFailure::from(&self);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Scene, StageName};

    #[test]
    fn success_envelope_uses_camel_case() {
        let outcome = PipelineOutcome {
            original_text: "大家好".to_string(),
            script: VideoScript {
                title: "测试".to_string(),
                duration_secs: 30,
                scenes: vec![Scene {
                    scene_number: 1,
                    timestamp: "00:00-00:30".to_string(),
                    description: "开场".to_string(),
                    dialogue: "大家好".to_string(),
                    notes: None,
                }],
            },
            processing_time_ms: 1234,
            providers: ProviderAttribution {
                video_resolver: "tikhub-web".to_string(),
                transcription: "yunmao".to_string(),
                script_generator: "tongyi".to_string(),
            },
            attempts: Vec::new(),
        };

        let json = serde_json::to_value(ApiSuccess::from(outcome)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["originalText"], "大家好");
        assert_eq!(json["data"]["processingTime"], 1234);
        assert_eq!(json["data"]["provider"]["videoResolver"], "tikhub-web");
        assert_eq!(json["data"]["provider"]["scriptGenerator"], "tongyi");
        assert!(json["data"].get("attempts").is_none());
    }

    #[test]
    fn failure_envelope_carries_both_messages() {
        let err = PipelineError::NoVideoLink;
        let json = serde_json::to_value(ApiFailure::from(&err)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NO_VIDEO_LINK");
        assert_eq!(json["error"]["retryable"], false);
        assert_eq!(json["error"]["userMessage"], "未在输入中找到视频链接，请检查后重试");
        assert_ne!(json["error"]["message"], json["error"]["userMessage"]);
    }

    #[test]
    fn status_mapping_by_error_class() {
        assert_eq!(
            http_status(&PipelineError::NoVideoLink),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            http_status(&PipelineError::Unauthorized("missing header".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            http_status(&PipelineError::stage_failure(StageName::Transcribe, Vec::new())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            http_status(&PipelineError::ConcurrencyLimit {
                detail: "queue full".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            http_status(&PipelineError::Timeout {
                dependency: "yunmao".into(),
                timeout_ms: 10_000
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            http_status(&PipelineError::Http {
                dependency: "tikhub-web".into(),
                status: 500
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
