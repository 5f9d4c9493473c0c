//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build engine → Start listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain sessions → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then engine, then listener
//! - Shutdown drains: in-flight pipeline runs finish

pub mod shutdown;

pub use shutdown::Shutdown;
