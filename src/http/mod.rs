//! HTTP surface of the pipeline service.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, engine swap)
//!     → response.rs (request/response wire formats)
//!     → pipeline orchestrator
//!     → enveloped JSON back to the client
//! ```

pub mod response;
pub mod server;

pub use response::{ApiFailure, ApiSuccess, TranscribeRequest};
pub use server::HttpServer;
