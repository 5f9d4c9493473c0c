//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → pipeline engine built from it
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new engine built, atomic swap of Arc<PipelineEngine>
//!     → in-flight sessions finish on the old engine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::PipelineConfig;
pub use schema::{
    CallbackConfig, ChainsConfig, ConcurrencyConfig, ObservabilityConfig, ProviderConfig,
    ResilienceConfig, SecurityConfig, ServerConfig, SessionConfig,
};
