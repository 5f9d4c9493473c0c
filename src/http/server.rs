//! HTTP server setup and request handlers.
//!
//! # Responsibilities
//! - Create the Axum router with all endpoints
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Hold the current `PipelineEngine` behind an atomic swap
//! - Apply config reloads without dropping in-flight sessions
//! - Sweep expired callback registrations
//!
//! # Design Decisions
//! - Reload builds a fresh engine and swaps the `Arc`; sessions that
//!   already loaded the old engine finish on it
//! - The callback registry survives reloads so webhooks for in-flight
//!   tasks still match
//! - Middleware limits come from the startup config; changing them
//!   requires a restart

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::MakeRequestUuid;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tower_http::ServiceBuilderExt;

use crate::callbacks::{CallbackOutcome, CallbackRegistry};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::http::response::{ApiSuccess, StatusBody, TranscribeRequest};
use crate::pipeline::PipelineEngine;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<ArcSwap<PipelineEngine>>,
    started_at: Instant,
}

/// HTTP server for the pipeline service.
pub struct HttpServer {
    state: AppState,
    config: PipelineConfig,
}

impl HttpServer {
    /// Build the initial engine from a validated configuration.
    pub fn new(config: PipelineConfig) -> Self {
        let callbacks =
            CallbackRegistry::new(Duration::from_secs(config.callbacks.pending_ttl_secs));
        let engine = PipelineEngine::from_config(config.clone(), callbacks);
        let state = AppState {
            engine: Arc::new(ArcSwap::from_pointee(engine)),
            started_at: Instant::now(),
        };
        Self { state, config }
    }

    // Body limit sits outside the timeout: Timeout requires its inner
    // response body to implement Default, which the limit body does not.
    #[allow(deprecated)]
    fn build_router(config: &PipelineConfig, state: AppState) -> Router {
        Router::new()
            .route("/api/video/transcribe", post(transcribe_handler))
            .route("/api/callbacks/yunmao", post(yunmao_callback_handler))
            .route("/api/status", get(status_handler))
            .route("/healthz", get(health_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .set_x_request_id(MakeRequestUuid)
                    .layer(TraceLayer::new_for_http())
                    .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.server.request_timeout_secs,
                    )))
                    .propagate_x_request_id(),
            )
    }

    /// Run the server until shutdown. `config_updates` delivers
    /// already-validated configs from the file watcher.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<PipelineConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reload_state = self.state.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                let callbacks = reload_state.engine.load().callbacks().clone();
                let engine = PipelineEngine::from_config(new_config, callbacks);
                reload_state.engine.store(Arc::new(engine));
                tracing::info!("Configuration reloaded, pipeline engine rebuilt");
            }
        });

        let sweep_state = self.state.clone();
        let sweep_every = Duration::from_secs(self.config.callbacks.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_state.engine.load().callbacks().evict_expired();
            }
        });

        let router = Self::build_router(&self.config, self.state.clone());

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = ctrl_c() => {}
                }
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

async fn ctrl_c() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
}

/// `POST /api/video/transcribe`
async fn transcribe_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TranscribeRequest>, JsonRejection>,
) -> Response {
    let engine = state.engine.load_full();

    if engine.config().security.require_auth {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if let Err(err) = engine.security().validate_auth_header(auth) {
            return err.into_response();
        }
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return PipelineError::InvalidRequest(rejection.body_text()).into_response();
        }
    };

    match engine.orchestrator().run(body.into()).await {
        Ok(outcome) => Json(ApiSuccess::from(outcome)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /api/callbacks/yunmao`
///
/// Accepts the provider's completion notification. Tolerant of shape
/// drift: the task id may arrive as `id`, `taskId` or `task_id`, and
/// the transcript as a string `data`, `data.text` or a flat `text`.
async fn yunmao_callback_handler(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Response {
    let engine = state.engine.load_full();

    let Some(task_id) = callback_task_id(&payload) else {
        return PipelineError::InvalidRequest("callback missing task id".into()).into_response();
    };

    let matched = engine.callbacks().resolve(&task_id, callback_outcome(&payload));
    tracing::debug!(task_id = %task_id, matched, "Provider callback received");
    Json(serde_json::json!({ "received": true, "matched": matched })).into_response()
}

fn callback_task_id(payload: &Value) -> Option<String> {
    for key in ["id", "taskId", "task_id"] {
        match payload.get(key) {
            Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
            Some(Value::Number(id)) => return Some(id.to_string()),
            _ => {}
        }
    }
    None
}

fn callback_outcome(payload: &Value) -> CallbackOutcome {
    let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = payload
            .get("message")
            .or_else(|| payload.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("task failed");
        return Err(format!("code {code}: {message}"));
    }

    let text = payload
        .get("data")
        .and_then(|data| match data {
            Value::String(text) => Some(text.as_str()),
            other => other.pointer("/text").and_then(Value::as_str),
        })
        .or_else(|| payload.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty());

    match text {
        Some(text) => Ok(text.to_string()),
        None => Err("callback carried no transcript text".to_string()),
    }
}

/// `GET /api/status`
async fn status_handler(State(state): State<AppState>) -> Json<StatusBody> {
    let engine = state.engine.load_full();
    Json(StatusBody {
        status: "operational",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        admission: engine.admission(),
        dependencies: engine.dependency_states(),
        pending_callbacks: engine.callbacks().pending(),
    })
}

/// `GET /healthz`
async fn health_handler() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
