//! Shared building blocks for the content sync tools
//!
//! Provides functionality shared by the engine and its operational surfaces:
//! - logging bootstrap
//! - HTTP response envelopes
//! - graceful shutdown
//! - serde default helpers

pub mod api_types;
pub mod logging;
pub mod serde_helpers;
pub mod shutdown;

// Test utilities (for use in test code only)
#[cfg(feature = "sqlite")]
pub mod test_utils;

// Re-export commonly used API types
pub use api_types::{ErrorResponse, SuccessResponse};

// Re-export AppError when axum feature is enabled
#[cfg(feature = "axum")]
pub use api_types::AppError;

pub use errors::ErrorInfo;

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;
