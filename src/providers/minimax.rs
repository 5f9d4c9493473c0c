//! MiniMax adapters: audio transcription and chat-based script
//! generation. Both roles share one client so the breaker covers the
//! whole dependency.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::prompts::PromptRenderer;
use crate::providers::{
    completion_content, parse_script_json, ScriptInput, StageAdapter, TranscribeInput,
    Transcript, VideoScript,
};
use crate::resilience::breaker::DependencyState;
use crate::resilience::client::{RequestSpec, ResilientClient};

/// Business codes MiniMax uses for throttling.
const RATE_LIMIT_CODES: &[i64] = &[1002, 1008];

/// MiniMax wraps errors in a 200 response with a `base_resp` block;
/// absence of the block means success on some endpoints.
pub(crate) fn check_base_resp(payload: &Value, dependency: &str) -> Result<(), PipelineError> {
    let Some(base) = payload.get("base_resp") else {
        return Ok(());
    };
    let code = base.get("status_code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    if RATE_LIMIT_CODES.contains(&code) {
        return Err(PipelineError::RateLimited {
            dependency: dependency.to_string(),
            retry_after_ms: None,
        });
    }
    let msg = base
        .get("status_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    Err(PipelineError::Payload {
        provider: dependency.to_string(),
        message: format!("base_resp {code}: {msg}"),
    })
}

pub struct MiniMaxTranscriber {
    client: Arc<ResilientClient>,
    api_key: String,
    model: String,
}

impl MiniMaxTranscriber {
    pub fn new(client: Arc<ResilientClient>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: "speech-01".to_string(),
        }
    }
}

#[async_trait]
impl StageAdapter<TranscribeInput, Transcript> for MiniMaxTranscriber {
    fn name(&self) -> &str {
        "minimax"
    }

    fn circuit_would_reject(&self) -> bool {
        self.client.would_reject()
    }

    fn dependency_state(&self) -> Option<DependencyState> {
        Some(self.client.snapshot())
    }

    async fn call(&self, input: &TranscribeInput) -> Result<Transcript, PipelineError> {
        let body = json!({
            "model": self.model,
            "url": input.media.url,
            "language": input.language,
        });
        let spec = RequestSpec::post("/v1/audio/transcriptions", body)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let payload = self.client.execute(spec).await?;
        check_base_resp(&payload, self.name())?;

        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| PipelineError::Payload {
                provider: self.name().to_string(),
                message: "no transcription text in response".into(),
            })?;

        Ok(Transcript {
            text: text.to_string(),
            confidence: 0.8,
            language: input.language.clone(),
        })
    }
}

pub struct MiniMaxScriptGenerator {
    client: Arc<ResilientClient>,
    api_key: String,
    model: String,
    prompts: Arc<PromptRenderer>,
}

impl MiniMaxScriptGenerator {
    pub fn new(
        client: Arc<ResilientClient>,
        api_key: impl Into<String>,
        prompts: Arc<PromptRenderer>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: "abab6.5s-chat".to_string(),
            prompts,
        }
    }
}

#[async_trait]
impl StageAdapter<ScriptInput, VideoScript> for MiniMaxScriptGenerator {
    fn name(&self) -> &str {
        "minimax"
    }

    fn circuit_would_reject(&self) -> bool {
        self.client.would_reject()
    }

    fn dependency_state(&self) -> Option<DependencyState> {
        Some(self.client.snapshot())
    }

    async fn call(&self, input: &ScriptInput) -> Result<VideoScript, PipelineError> {
        let prompt = self
            .prompts
            .render(&input.transcript.text, input.style, input.duration_secs);
        let sampling = self.prompts.sampling(input.style);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.prompts.token_budget(input.duration_secs),
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
        });
        let spec = RequestSpec::post("/v1/text/chatcompletion_v2", body)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let payload = self.client.execute(spec).await?;
        check_base_resp(&payload, self.name())?;

        let content = completion_content(&payload, self.name())?;
        let mut script = parse_script_json(content).map_err(|message| PipelineError::Payload {
            provider: self.name().to_string(),
            message,
        })?;
        if script.duration_secs == 0 {
            script.duration_secs = input.duration_secs.unwrap_or(60);
        }
        Ok(script)
    }
}
