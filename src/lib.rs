//! Resilient multi-provider video transcription pipeline library.

pub mod callbacks;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod security;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
