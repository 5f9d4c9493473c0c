//! Yunmao speech-to-text. Submission returns a task id; the result
//! arrives either via webhook (when this service is reachable from
//! outside) or by polling the status endpoint with a growing interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::callbacks::CallbackRegistry;
use crate::error::PipelineError;
use crate::providers::{StageAdapter, TranscribeInput, Transcript};
use crate::resilience::breaker::DependencyState;
use crate::resilience::client::{RequestSpec, ResilientClient};

/// Task finished successfully.
const STATUS_DONE: i64 = 0;
/// Task still running.
const STATUS_PROCESSING: i64 = 6001;
/// Task accepted, not started yet.
const STATUS_QUEUED: i64 = 1001;

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub initial: Duration,
    pub max: Duration,
    /// Total time allowed for the result, webhook or polling alike.
    pub budget: Duration,
}

pub struct YunmaoTranscriber {
    client: Arc<ResilientClient>,
    api_key: String,
    callbacks: CallbackRegistry,
    /// Public base URL of this service; `None` disables webhooks.
    notify_base: Option<String>,
    poll: PollSettings,
}

impl YunmaoTranscriber {
    pub fn new(
        client: Arc<ResilientClient>,
        api_key: impl Into<String>,
        callbacks: CallbackRegistry,
        notify_base: Option<String>,
        poll: PollSettings,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            callbacks,
            notify_base,
            poll,
        }
    }

    async fn submit(&self, input: &TranscribeInput) -> Result<String, PipelineError> {
        let mut body = json!({
            "language": yunmao_language(&input.language),
            "fileUrl": input.media.url,
            "resultType": "str",
            "chat": false,
        });
        if let Some(base) = &self.notify_base {
            body["notifyUrl"] = json!(format!(
                "{}/api/callbacks/yunmao",
                base.trim_end_matches('/')
            ));
        }
        let spec = RequestSpec::post("/v1/get-text", body).header("api-key", self.api_key.as_str());
        let payload = self.client.execute(spec).await?;
        task_id_from_submit(&payload, self.name())
    }

    async fn await_webhook(&self, task_id: &str, language: &str) -> Result<Transcript, PipelineError> {
        let receiver = self.callbacks.register(task_id);
        match tokio::time::timeout(self.poll.budget, receiver).await {
            Ok(Ok(Ok(text))) => Ok(transcript(text, language)),
            Ok(Ok(Err(message))) => Err(PipelineError::Payload {
                provider: self.name().to_string(),
                message: format!("task failed: {message}"),
            }),
            Ok(Err(_)) => Err(PipelineError::Payload {
                provider: self.name().to_string(),
                message: "callback registration was replaced".into(),
            }),
            Err(_) => {
                self.callbacks.deregister(task_id);
                Err(PipelineError::Timeout {
                    dependency: self.name().to_string(),
                    timeout_ms: self.poll.budget.as_millis() as u64,
                })
            }
        }
    }

    async fn poll_status(&self, task_id: &str, language: &str) -> Result<Transcript, PipelineError> {
        let deadline = Instant::now() + self.poll.budget;
        let mut interval = self.poll.initial;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("id", task_id)
            .finish();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PipelineError::Timeout {
                    dependency: self.name().to_string(),
                    timeout_ms: self.poll.budget.as_millis() as u64,
                });
            }
            tokio::time::sleep(interval.min(remaining)).await;

            let spec = RequestSpec::get(format!("/v1/get-status?{query}"))
                .header("api-key", self.api_key.as_str());
            let payload = self.client.execute(spec).await?;
            match parse_status(&payload, self.name())? {
                PollStatus::Done(text) => return Ok(transcript(text, language)),
                PollStatus::Processing => {
                    interval = (interval + self.poll.initial).min(self.poll.max);
                }
            }
        }
    }
}

#[async_trait]
impl StageAdapter<TranscribeInput, Transcript> for YunmaoTranscriber {
    fn name(&self) -> &str {
        "yunmao"
    }

    fn circuit_would_reject(&self) -> bool {
        self.client.would_reject()
    }

    fn dependency_state(&self) -> Option<DependencyState> {
        Some(self.client.snapshot())
    }

    async fn call(&self, input: &TranscribeInput) -> Result<Transcript, PipelineError> {
        let task_id = self.submit(input).await?;
        tracing::debug!(
            task_id = %task_id,
            webhook = self.notify_base.is_some(),
            "Transcription task submitted"
        );
        if self.notify_base.is_some() {
            self.await_webhook(&task_id, &input.language).await
        } else {
            self.poll_status(&task_id, &input.language).await
        }
    }
}

fn transcript(text: String, language: &str) -> Transcript {
    Transcript {
        text,
        confidence: 0.9,
        language: language.to_string(),
    }
}

fn yunmao_language(language: &str) -> &'static str {
    match language {
        "en" => "english",
        _ => "chinese",
    }
}

fn task_id_from_submit(payload: &Value, provider: &str) -> Result<String, PipelineError> {
    let code = payload.get("code").and_then(Value::as_i64);
    if code != Some(0) {
        let msg = payload
            .get("message")
            .or_else(|| payload.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(PipelineError::Payload {
            provider: provider.to_string(),
            message: format!("submit rejected, code {code:?}: {msg}"),
        });
    }

    match payload.get("data") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(PipelineError::Payload {
            provider: provider.to_string(),
            message: "no task id in submit response".into(),
        }),
    }
}

enum PollStatus {
    Done(String),
    Processing,
}

fn parse_status(payload: &Value, provider: &str) -> Result<PollStatus, PipelineError> {
    let code = payload.get("code").and_then(Value::as_i64);
    match code {
        Some(STATUS_DONE) => {
            let text = payload
                .get("data")
                .and_then(|data| data.as_str().or_else(|| data.pointer("/text").and_then(Value::as_str)))
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .ok_or_else(|| PipelineError::Payload {
                    provider: provider.to_string(),
                    message: "task done but no text in response".into(),
                })?;
            Ok(PollStatus::Done(text.to_string()))
        }
        Some(STATUS_PROCESSING) | Some(STATUS_QUEUED) => Ok(PollStatus::Processing),
        other => Err(PipelineError::Payload {
            provider: provider.to_string(),
            message: format!("unexpected status code {other:?}"),
        }),
    }
}
