//! Tongyi (DashScope compatible mode) script generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::PipelineError;
use crate::prompts::PromptRenderer;
use crate::providers::{
    completion_content, parse_script_json, ScriptInput, StageAdapter, VideoScript,
};
use crate::resilience::breaker::DependencyState;
use crate::resilience::client::{RequestSpec, ResilientClient};

/// Primary script generator. Talks OpenAI wire shape against
/// DashScope's compatible-mode base URL.
pub struct TongyiScriptGenerator {
    client: Arc<ResilientClient>,
    api_key: String,
    model: String,
    prompts: Arc<PromptRenderer>,
}

impl TongyiScriptGenerator {
    pub fn new(
        client: Arc<ResilientClient>,
        api_key: impl Into<String>,
        prompts: Arc<PromptRenderer>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: "qwen-plus".to_string(),
            prompts,
        }
    }
}

#[async_trait]
impl StageAdapter<ScriptInput, VideoScript> for TongyiScriptGenerator {
    fn name(&self) -> &str {
        "tongyi"
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
        let spec = RequestSpec::post("/chat/completions", body)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let payload = self.client.execute(spec).await?;

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
