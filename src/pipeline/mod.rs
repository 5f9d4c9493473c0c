//! Pipeline orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! validated request
//!     → admission (bounded concurrency, FIFO queue)
//!     → resolve chain   (share link → playable media URL)
//!     → transcribe chain (media URL → transcript text)
//!     → script chain    (transcript → structured script)
//!     → outcome with provider attribution + attempt history
//! ```
//!
//! # Design Decisions
//! - Validation runs before admission; malformed requests never
//!   consume a pipeline slot
//! - One ResilientClient per provider name; adapters for the same
//!   provider share its breaker
//! - Reload builds a whole new engine; in-flight sessions keep the
//!   engine they started on

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::callbacks::CallbackRegistry;
use crate::concurrency::{AdmissionSnapshot, ConcurrencyController};
use crate::config::{PipelineConfig, ProviderConfig, ResilienceConfig};
use crate::error::PipelineError;
use crate::extract::LinkExtractor;
use crate::fallback::FallbackChain;
use crate::observability::metrics;
use crate::prompts::PromptRenderer;
use crate::providers::{
    AttemptRecord, DirectResolver, MediaLocation, MiniMaxScriptGenerator, MiniMaxTranscriber,
    MockScriptGenerator, MockTranscriber, ResolveInput, ScriptInput, ScriptStyle, StageAdapter,
    StageName, TikHubMode, TikHubResolver, TongyiScriptGenerator, TranscribeInput, Transcript,
    VideoScript, YunmaoTranscriber,
};
use crate::providers::yunmao::PollSettings;
use crate::resilience::breaker::{BreakerSettings, DependencyState};
use crate::resilience::client::{ResilientClient, RetryPolicy};
use crate::security::SecurityValidator;

use session::{PipelineSession, SessionState, SoftBudgetWatchdog};

/// Incoming transcription request, already deserialized but not yet
/// validated.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub video_url: Option<String>,
    pub mixed_text: Option<String>,
    pub style: Option<String>,
    pub language: Option<String>,
}

/// Which provider actually served each stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttribution {
    pub video_resolver: String,
    pub transcription: String,
    pub script_generator: String,
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub original_text: String,
    pub script: VideoScript,
    pub processing_time_ms: u64,
    pub providers: ProviderAttribution,
    /// Full attempt history, logged but not returned on the wire.
    pub attempts: Vec<AttemptRecord>,
}

/// Executes pipeline runs against a fixed set of chains.
pub struct PipelineOrchestrator {
    resolve_chain: FallbackChain<ResolveInput, MediaLocation>,
    transcribe_chain: FallbackChain<TranscribeInput, Transcript>,
    script_chain: FallbackChain<ScriptInput, VideoScript>,
    controller: Arc<ConcurrencyController>,
    extractor: LinkExtractor,
    security: SecurityValidator,
    soft_budget: Duration,
    default_language: String,
}

impl PipelineOrchestrator {
    /// Run the full pipeline for one request.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineOutcome, PipelineError> {
        let raw_url = self.locate_url(&request)?;
        let url = self.security.validate_url(&raw_url)?;
        let style = ScriptStyle::parse(request.style.as_deref())?;
        let language = self.resolve_language(request.language.as_deref())?;

        let mut session = PipelineSession::new();
        let _permit = self.controller.admit(&session.id).await?;
        let _watchdog = SoftBudgetWatchdog::arm(&session.id, self.soft_budget);
        tracing::info!(
            session_id = %session.id,
            url = %url,
            style = style.as_str(),
            language = %language,
            "Pipeline session started"
        );

        let started = session.started;
        match self
            .run_stages(&mut session, url.to_string(), style, language)
            .await
        {
            Ok(mut outcome) => {
                session.advance(SessionState::Completed);
                outcome.processing_time_ms = started.elapsed().as_millis() as u64;
                metrics::record_pipeline_request("success", started);
                tracing::info!(
                    session_id = %session.id,
                    processing_time_ms = outcome.processing_time_ms,
                    resolver = %outcome.providers.video_resolver,
                    transcriber = %outcome.providers.transcription,
                    script_generator = %outcome.providers.script_generator,
                    attempts = outcome.attempts.len(),
                    "Pipeline session completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                session.advance(SessionState::Failed);
                metrics::record_pipeline_request("failure", started);
                tracing::error!(
                    session_id = %session.id,
                    error = %err,
                    code = err.code(),
                    "Pipeline session failed"
                );
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        session: &mut PipelineSession,
        url: String,
        style: ScriptStyle,
        language: String,
    ) -> Result<PipelineOutcome, PipelineError> {
        session.advance(SessionState::Resolving);
        let resolved = self.resolve_chain.run(&ResolveInput { url }).await?;
        let media = resolved.value.clone();

        session.advance(SessionState::Transcribing);
        let transcribed = self
            .transcribe_chain
            .run(&TranscribeInput {
                media: media.clone(),
                language: language.clone(),
            })
            .await?;

        session.advance(SessionState::ScriptGenerating);
        let scripted = self
            .script_chain
            .run(&ScriptInput {
                transcript: transcribed.value.clone(),
                style,
                language,
                duration_secs: media.duration_secs,
            })
            .await?;

        let mut attempts = resolved.attempts;
        attempts.extend(transcribed.attempts);
        attempts.extend(scripted.attempts);

        Ok(PipelineOutcome {
            original_text: transcribed.value.text,
            script: scripted.value,
            processing_time_ms: 0,
            providers: ProviderAttribution {
                video_resolver: resolved.provider,
                transcription: transcribed.provider,
                script_generator: scripted.provider,
            },
            attempts,
        })
    }

    fn locate_url(&self, request: &PipelineRequest) -> Result<String, PipelineError> {
        if let Some(url) = request
            .video_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            return Ok(url.to_string());
        }
        match request
            .mixed_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            Some(text) => {
                let link = self.extractor.best(text).ok_or(PipelineError::NoVideoLink)?;
                tracing::debug!(
                    url = %link.url,
                    confidence = link.confidence,
                    "Extracted link from text"
                );
                Ok(link.url)
            }
            None => Err(PipelineError::InvalidRequest(
                "either videoUrl or mixedText is required".into(),
            )),
        }
    }

    fn resolve_language(&self, language: Option<&str>) -> Result<String, PipelineError> {
        let Some(language) = language.map(str::trim).filter(|l| !l.is_empty()) else {
            return Ok(self.default_language.clone());
        };
        match language {
            "zh" | "en" => Ok(language.to_string()),
            other => Err(PipelineError::InvalidRequest(format!(
                "unsupported language '{other}', expected zh or en"
            ))),
        }
    }
}

/// Everything built from one validated config: orchestrator, shared
/// clients, admission controller. Swapped wholesale on reload.
pub struct PipelineEngine {
    orchestrator: PipelineOrchestrator,
    /// Unique per provider name, sorted for stable status output.
    clients: Vec<Arc<ResilientClient>>,
    controller: Arc<ConcurrencyController>,
    callbacks: CallbackRegistry,
    security: SecurityValidator,
    config: PipelineConfig,
}

impl PipelineEngine {
    /// Build an engine from a validated config. Chain entries the
    /// engine cannot build (validation should have caught them) are
    /// skipped with a warning rather than taking the service down.
    pub fn from_config(config: PipelineConfig, callbacks: CallbackRegistry) -> Self {
        let security = SecurityValidator::from_config(&config.security);
        let controller = ConcurrencyController::new(
            config.concurrency.max_concurrency,
            config.concurrency.max_queue_length,
            Duration::from_millis(config.concurrency.queue_wait_timeout_ms),
        );
        let prompts = Arc::new(PromptRenderer::new());
        let http = reqwest::Client::new();
        let mut client_map: HashMap<String, Arc<ResilientClient>> = HashMap::new();

        let poll = PollSettings {
            initial: Duration::from_millis(config.callbacks.poll_initial_ms),
            max: Duration::from_millis(config.callbacks.poll_max_ms),
            budget: Duration::from_secs(config.callbacks.poll_budget_secs),
        };
        let notify_base = (!config.callbacks.public_base_url.is_empty())
            .then(|| config.callbacks.public_base_url.clone());

        let mut resolve: Vec<Arc<dyn StageAdapter<ResolveInput, MediaLocation>>> = Vec::new();
        for entry in &config.chains.resolve {
            match entry.as_str() {
                "direct" => resolve.push(Arc::new(DirectResolver)),
                "tikhub-web" | "tikhub-app" => {
                    let Some((client, key)) = remote_parts(&mut client_map, &config, entry, &http)
                    else {
                        continue;
                    };
                    let mode = if entry == "tikhub-web" {
                        TikHubMode::Web
                    } else {
                        TikHubMode::App
                    };
                    resolve.push(Arc::new(TikHubResolver::new(client, key, mode)));
                }
                other => {
                    tracing::warn!(provider = other, "No resolve adapter for chain entry, skipping")
                }
            }
        }

        let mut transcribe: Vec<Arc<dyn StageAdapter<TranscribeInput, Transcript>>> = Vec::new();
        for entry in &config.chains.transcribe {
            match entry.as_str() {
                "mock" => transcribe.push(Arc::new(MockTranscriber)),
                "yunmao" => {
                    let Some((client, key)) = remote_parts(&mut client_map, &config, entry, &http)
                    else {
                        continue;
                    };
                    transcribe.push(Arc::new(YunmaoTranscriber::new(
                        client,
                        key,
                        callbacks.clone(),
                        notify_base.clone(),
                        poll.clone(),
                    )));
                }
                "minimax" => {
                    let Some((client, key)) = remote_parts(&mut client_map, &config, entry, &http)
                    else {
                        continue;
                    };
                    transcribe.push(Arc::new(MiniMaxTranscriber::new(client, key)));
                }
                other => tracing::warn!(
                    provider = other,
                    "No transcribe adapter for chain entry, skipping"
                ),
            }
        }

        let mut script: Vec<Arc<dyn StageAdapter<ScriptInput, VideoScript>>> = Vec::new();
        for entry in &config.chains.script {
            match entry.as_str() {
                "mock" => script.push(Arc::new(MockScriptGenerator)),
                "tongyi" => {
                    let Some((client, key)) = remote_parts(&mut client_map, &config, entry, &http)
                    else {
                        continue;
                    };
                    script.push(Arc::new(TongyiScriptGenerator::new(
                        client,
                        key,
                        prompts.clone(),
                    )));
                }
                "minimax" => {
                    let Some((client, key)) = remote_parts(&mut client_map, &config, entry, &http)
                    else {
                        continue;
                    };
                    script.push(Arc::new(MiniMaxScriptGenerator::new(
                        client,
                        key,
                        prompts.clone(),
                    )));
                }
                other => {
                    tracing::warn!(provider = other, "No script adapter for chain entry, skipping")
                }
            }
        }

        let mut clients: Vec<Arc<ResilientClient>> = client_map.into_values().collect();
        clients.sort_by(|a, b| a.name().cmp(b.name()));

        let orchestrator = PipelineOrchestrator {
            resolve_chain: FallbackChain::new(StageName::Resolve, resolve),
            transcribe_chain: FallbackChain::new(StageName::Transcribe, transcribe),
            script_chain: FallbackChain::new(StageName::Script, script),
            controller: controller.clone(),
            extractor: LinkExtractor::new(),
            security: security.clone(),
            soft_budget: Duration::from_secs(config.session.soft_budget_secs),
            default_language: config.session.default_language.clone(),
        };

        Self {
            orchestrator,
            clients,
            controller,
            callbacks,
            security,
            config,
        }
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    pub fn dependency_states(&self) -> Vec<DependencyState> {
        self.clients.iter().map(|client| client.snapshot()).collect()
    }

    pub fn admission(&self) -> AdmissionSnapshot {
        self.controller.snapshot()
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn security(&self) -> &SecurityValidator {
        &self.security
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

fn remote_parts(
    clients: &mut HashMap<String, Arc<ResilientClient>>,
    config: &PipelineConfig,
    name: &str,
    http: &reqwest::Client,
) -> Option<(Arc<ResilientClient>, String)> {
    let provider = match config.provider(name) {
        Some(provider) if provider.enabled => provider,
        _ => {
            tracing::warn!(
                provider = name,
                "Chain references missing or disabled provider, skipping"
            );
            return None;
        }
    };
    let client = clients
        .entry(name.to_string())
        .or_insert_with(|| {
            let resilience = provider.resilience.as_ref().unwrap_or(&config.resilience);
            Arc::new(ResilientClient::new(
                name,
                provider.base_url.clone(),
                http.clone(),
                breaker_settings(resilience),
                retry_policy(resilience),
            ))
        })
        .clone();
    Some((client, api_key_for(provider)))
}

fn api_key_for(provider: &ProviderConfig) -> String {
    if !provider.api_key.is_empty() {
        return provider.api_key.clone();
    }
    let var = format!("{}_API_KEY", provider.name.to_uppercase().replace('-', "_"));
    std::env::var(&var).unwrap_or_default()
}

fn breaker_settings(resilience: &ResilienceConfig) -> BreakerSettings {
    BreakerSettings {
        error_rate_threshold: resilience.error_rate_threshold,
        min_request_volume: resilience.min_request_volume,
        max_failures: resilience.max_failures,
        reset_timeout: Duration::from_millis(resilience.reset_timeout_ms),
        window: Duration::from_secs(resilience.window_secs),
    }
}

fn retry_policy(resilience: &ResilienceConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: resilience.max_retries,
        retry_delay: Duration::from_millis(resilience.retry_delay_ms),
        max_retry_delay: Duration::from_millis(resilience.max_retry_delay_ms),
        request_timeout: Duration::from_millis(resilience.request_timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Instant;

    use crate::config::SecurityConfig;

    struct StubResolver;

    #[async_trait]
    impl StageAdapter<ResolveInput, MediaLocation> for StubResolver {
        fn name(&self) -> &str {
            "stub-resolver"
        }

        async fn call(&self, input: &ResolveInput) -> Result<MediaLocation, PipelineError> {
            Ok(MediaLocation {
                url: input.url.clone(),
                duration_secs: Some(40),
                title: Some("演示视频".to_string()),
            })
        }
    }

    struct StubTranscriber;

    #[async_trait]
    impl StageAdapter<TranscribeInput, Transcript> for StubTranscriber {
        fn name(&self) -> &str {
            "stub-transcriber"
        }

        async fn call(&self, input: &TranscribeInput) -> Result<Transcript, PipelineError> {
            Ok(Transcript {
                text: "今天分享三个冲泡技巧。".to_string(),
                confidence: 0.95,
                language: input.language.clone(),
            })
        }
    }

    struct FailingTranscriber;

    #[async_trait]
    impl StageAdapter<TranscribeInput, Transcript> for FailingTranscriber {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, _input: &TranscribeInput) -> Result<Transcript, PipelineError> {
            Err(PipelineError::Http {
                dependency: "flaky".to_string(),
                status: 500,
            })
        }
    }

    struct StubScripter;

    #[async_trait]
    impl StageAdapter<ScriptInput, VideoScript> for StubScripter {
        fn name(&self) -> &str {
            "stub-scripter"
        }

        async fn call(&self, input: &ScriptInput) -> Result<VideoScript, PipelineError> {
            Ok(VideoScript {
                title: "冲泡技巧".to_string(),
                duration_secs: input.duration_secs.unwrap_or(60),
                scenes: vec![crate::providers::Scene {
                    scene_number: 1,
                    timestamp: "00:00-00:40".to_string(),
                    description: "展示".to_string(),
                    dialogue: input.transcript.text.clone(),
                    notes: None,
                }],
            })
        }
    }

    fn orchestrator(
        transcribers: Vec<Arc<dyn StageAdapter<TranscribeInput, Transcript>>>,
        controller: Arc<ConcurrencyController>,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator {
            resolve_chain: FallbackChain::new(StageName::Resolve, vec![Arc::new(StubResolver)]),
            transcribe_chain: FallbackChain::new(StageName::Transcribe, transcribers),
            script_chain: FallbackChain::new(StageName::Script, vec![Arc::new(StubScripter)]),
            controller,
            extractor: LinkExtractor::new(),
            security: SecurityValidator::from_config(&SecurityConfig::default()),
            soft_budget: Duration::from_secs(50),
            default_language: "zh".to_string(),
        }
    }

    fn request(url: &str) -> PipelineRequest {
        PipelineRequest {
            video_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn happy_path_attribution_and_attempts() {
        let controller = ConcurrencyController::new(3, 10, Duration::from_secs(1));
        let orchestrator = orchestrator(
            vec![Arc::new(FailingTranscriber), Arc::new(StubTranscriber)],
            controller.clone(),
        );

        let outcome = orchestrator
            .run(request("https://cdn.example.com/demo.mp4"))
            .await
            .unwrap();

        assert_eq!(outcome.providers.video_resolver, "stub-resolver");
        assert_eq!(outcome.providers.transcription, "stub-transcriber");
        assert_eq!(outcome.providers.script_generator, "stub-scripter");
        assert_eq!(outcome.original_text, "今天分享三个冲泡技巧。");
        assert_eq!(outcome.script.scenes.len(), 1);
        // 1 resolve + 2 transcribe (one failed) + 1 script
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(controller.snapshot().active, 0);
    }

    #[tokio::test]
    async fn validation_runs_before_admission() {
        let controller = ConcurrencyController::new(1, 5, Duration::from_secs(10));
        let orchestrator = orchestrator(vec![Arc::new(StubTranscriber)], controller.clone());
        let _held = controller.admit("occupier").await.unwrap();

        let started = Instant::now();
        let err = orchestrator
            .run(request("ftp://example.com/a.mp4"))
            .await
            .unwrap_err();
        // with admission first this would have queued for 10s
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.code(), "INVALID_VIDEO_URL");

        let err = orchestrator
            .run(PipelineRequest {
                mixed_text: Some("这段文字没有链接".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.code(), "NO_VIDEO_LINK");
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let controller = ConcurrencyController::new(1, 5, Duration::from_secs(1));
        let orchestrator = orchestrator(vec![Arc::new(StubTranscriber)], controller);

        let err = orchestrator.run(PipelineRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err = orchestrator
            .run(PipelineRequest {
                style: Some("dramatic".to_string()),
                ..request("https://cdn.example.com/demo.mp4")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err = orchestrator
            .run(PipelineRequest {
                language: Some("fr".to_string()),
                ..request("https://cdn.example.com/demo.mp4")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn stage_exhaustion_releases_the_slot() {
        let controller = ConcurrencyController::new(1, 5, Duration::from_secs(1));
        let orchestrator = orchestrator(vec![Arc::new(FailingTranscriber)], controller.clone());

        let err = orchestrator
            .run(request("https://cdn.example.com/demo.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSCRIPTION_FAILED");
        assert_eq!(controller.snapshot().active, 0);
    }

    #[tokio::test]
    async fn engine_builds_from_default_config() {
        let engine = PipelineEngine::from_config(
            PipelineConfig::default(),
            CallbackRegistry::new(Duration::from_secs(300)),
        );

        let states = engine.dependency_states();
        let names: Vec<&str> = states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["minimax", "tikhub-app", "tikhub-web", "tongyi", "yunmao"]
        );
        assert_eq!(engine.admission().max_concurrency, 3);
        assert_eq!(engine.admission().active, 0);
    }
}
