//! Provider adapters for the three pipeline stages.
//!
//! # Data Flow
//! ```text
//! Fallback chain (per stage)
//!     → StageAdapter::call (generic input)
//!     → ResilientClient (breaker, retries, timeout)
//!     → provider wire format (tikhub / yunmao / minimax / tongyi)
//!     → normalized stage output (MediaLocation / Transcript / VideoScript)
//! ```
//!
//! # Design Decisions
//! - One adapter per provider per stage role; adapters sharing a
//!   dependency share one ResilientClient (one breaker per dependency)
//! - Adapters map provider business codes onto the shared error
//!   taxonomy; the fallback layer never sees wire formats
//! - Local adapters (direct, mock) never touch the network and report
//!   their names honestly so degraded results stay observable

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::resilience::breaker::DependencyState;

pub mod direct;
pub mod minimax;
pub mod mock;
pub mod tikhub;
pub mod tongyi;
pub mod yunmao;

pub use direct::DirectResolver;
pub use minimax::{MiniMaxScriptGenerator, MiniMaxTranscriber};
pub use mock::{MockScriptGenerator, MockTranscriber};
pub use tikhub::{TikHubMode, TikHubResolver};
pub use tongyi::TongyiScriptGenerator;
pub use yunmao::YunmaoTranscriber;

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Resolve,
    Transcribe,
    Script,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageName::Resolve => write!(f, "resolve"),
            StageName::Transcribe => write!(f, "transcribe"),
            StageName::Script => write!(f, "script"),
        }
    }
}

/// Outcome of one provider attempt within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    CircuitOpen,
}

/// Record of one provider attempt, kept for observability and surfaced
/// in aggregated stage failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub provider: String,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Successful stage output plus attribution and attempt history.
#[derive(Debug, Clone)]
pub struct StageResult<T> {
    pub value: T,
    /// Name of the adapter that actually produced the value.
    pub provider: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Input to the resolve stage: a validated share or page URL.
#[derive(Debug, Clone)]
pub struct ResolveInput {
    pub url: String,
}

/// Output of the resolve stage.
#[derive(Debug, Clone, Serialize)]
pub struct MediaLocation {
    pub url: String,
    pub duration_secs: Option<u64>,
    pub title: Option<String>,
}

/// Input to the transcribe stage.
#[derive(Debug, Clone)]
pub struct TranscribeInput {
    pub media: MediaLocation,
    pub language: String,
}

/// Output of the transcribe stage.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
    pub language: String,
}

/// Input to the script stage.
#[derive(Debug, Clone)]
pub struct ScriptInput {
    pub transcript: Transcript,
    pub style: ScriptStyle,
    pub language: String,
    pub duration_secs: Option<u64>,
}

/// Script tone requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStyle {
    Default,
    Humorous,
    Professional,
}

impl ScriptStyle {
    /// Parse a caller-supplied style string; `None` means default.
    pub fn parse(value: Option<&str>) -> Result<Self, PipelineError> {
        match value {
            None | Some("") | Some("default") => Ok(ScriptStyle::Default),
            Some("humorous") => Ok(ScriptStyle::Humorous),
            Some("professional") => Ok(ScriptStyle::Professional),
            Some(other) => Err(PipelineError::InvalidRequest(format!(
                "unknown style '{other}', expected default, humorous or professional"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptStyle::Default => "default",
            ScriptStyle::Humorous => "humorous",
            ScriptStyle::Professional => "professional",
        }
    }
}

/// Final structured script produced by the script stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoScript {
    pub title: String,
    #[serde(default)]
    pub duration_secs: u64,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub scene_number: u32,
    /// Window within the video, `"MM:SS-MM:SS"`.
    pub timestamp: String,
    pub description: String,
    pub dialogue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One provider's implementation of one stage role.
///
/// `circuit_would_reject` lets the fallback layer skip a known-bad
/// provider without consuming its half-open probe slot; local adapters
/// keep the default (never reject).
#[async_trait]
pub trait StageAdapter<I, O>: Send + Sync
where
    I: Send + Sync,
    O: Send,
{
    /// Stable provider name used for chain config and attribution.
    fn name(&self) -> &str;

    /// True when a call issued right now would fast-fail on the
    /// adapter's circuit.
    fn circuit_would_reject(&self) -> bool {
        false
    }

    /// Health snapshot of the underlying dependency, when there is one.
    fn dependency_state(&self) -> Option<DependencyState> {
        None
    }

    async fn call(&self, input: &I) -> Result<O, PipelineError>;
}

/// Milliseconds since the Unix epoch, for attempt records.
pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Pull the assistant message text out of an OpenAI-shaped chat
/// completion payload.
pub(crate) fn completion_content<'a>(
    payload: &'a serde_json::Value,
    provider: &str,
) -> Result<&'a str, PipelineError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(serde_json::Value::as_str)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| PipelineError::Payload {
            provider: provider.to_string(),
            message: "no completion content in response".into(),
        })
}

/// Extract a `VideoScript` from LLM output.
///
/// Models wrap the JSON in prose or Markdown fences more often than
/// not; slice from the first `{` to the last `}` before parsing.
pub(crate) fn parse_script_json(raw: &str) -> Result<VideoScript, String> {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = stripped.find('{').ok_or("no JSON object in response")?;
    let end = stripped.rfind('}').ok_or("no JSON object in response")?;
    if end < start {
        return Err("no JSON object in response".into());
    }

    let script: VideoScript = serde_json::from_str(&stripped[start..=end])
        .map_err(|e| format!("script JSON did not parse: {e}"))?;
    if script.scenes.is_empty() {
        return Err("script has no scenes".into());
    }
    Ok(script)
}
