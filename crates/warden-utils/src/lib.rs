//! # Warden Utilities
//!
//! Shared utilities, logging, and helpers for Warden.
//!
//! This crate provides common functionality used across the Warden workspace,
//! most importantly the `tracing`-based logging setup shared by hosts, example
//! programs, and tests.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{LogFormat, LogLevel, init_file_logging, init_logging, init_logging_with_level};
pub use tracing::{debug, error, info, trace, warn};
