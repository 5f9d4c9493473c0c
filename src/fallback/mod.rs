//! Ordered provider fallback for one pipeline stage.
//!
//! # Data Flow
//! ```text
//! Orchestrator
//!     → FallbackChain::run
//!         → skip adapters whose circuit would reject (recorded, not called)
//!         → first adapter to return Ok wins, attribution + attempts attached
//!         → all failed: aggregate error carrying every attempt
//! ```
//!
//! # Design Decisions
//! - Skips are attempt records too; the history must show why a
//!   provider was never asked
//! - The winning attempt is included in the history, so a clean run
//!   has exactly one record

use std::sync::Arc;
use std::time::Instant;

use crate::error::PipelineError;
use crate::observability::metrics;
use crate::providers::{
    epoch_ms, AttemptOutcome, AttemptRecord, StageAdapter, StageName, StageResult,
};

pub struct FallbackChain<I, O> {
    stage: StageName,
    adapters: Vec<Arc<dyn StageAdapter<I, O>>>,
}

impl<I, O> FallbackChain<I, O>
where
    I: Send + Sync,
    O: Send,
{
    pub fn new(stage: StageName, adapters: Vec<Arc<dyn StageAdapter<I, O>>>) -> Self {
        Self { stage, adapters }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Try each adapter in order until one succeeds.
    pub async fn run(&self, input: &I) -> Result<StageResult<O>, PipelineError> {
        let mut attempts = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let provider = adapter.name();

            if adapter.circuit_would_reject() {
                tracing::debug!(
                    stage = %self.stage,
                    provider,
                    "Skipping provider with open circuit"
                );
                attempts.push(AttemptRecord {
                    provider: provider.to_string(),
                    started_at: epoch_ms(),
                    duration_ms: 0,
                    outcome: AttemptOutcome::CircuitOpen,
                    error_kind: Some("CIRCUIT_OPEN".to_string()),
                });
                metrics::record_stage_attempt(self.stage, provider, "circuit_open", 0);
                continue;
            }

            let started_at = epoch_ms();
            let started = Instant::now();
            match adapter.call(input).await {
                Ok(value) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        stage = %self.stage,
                        provider,
                        duration_ms,
                        "Stage completed"
                    );
                    attempts.push(AttemptRecord {
                        provider: provider.to_string(),
                        started_at,
                        duration_ms,
                        outcome: AttemptOutcome::Success,
                        error_kind: None,
                    });
                    metrics::record_stage_attempt(self.stage, provider, "success", duration_ms);
                    return Ok(StageResult {
                        value,
                        provider: provider.to_string(),
                        attempts,
                    });
                }
                Err(err) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    let outcome = if matches!(err, PipelineError::CircuitOpen { .. }) {
                        AttemptOutcome::CircuitOpen
                    } else {
                        AttemptOutcome::Failure
                    };
                    tracing::warn!(
                        stage = %self.stage,
                        provider,
                        duration_ms,
                        error = %err,
                        "Provider failed, trying next"
                    );
                    attempts.push(AttemptRecord {
                        provider: provider.to_string(),
                        started_at,
                        duration_ms,
                        outcome,
                        error_kind: Some(err.code().to_string()),
                    });
                    metrics::record_stage_attempt(self.stage, provider, "failure", duration_ms);
                }
            }
        }

        tracing::error!(
            stage = %self.stage,
            attempts = attempts.len(),
            "All providers failed"
        );
        Err(PipelineError::stage_failure(self.stage, attempts))
    }
}
