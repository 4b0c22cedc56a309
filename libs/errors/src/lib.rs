//! Unified error handling for the content sync engine
//!
//! Every crate in the workspace reports failures through [`SyncError`]. The
//! engine never decides "abort or continue" by matching on individual
//! variants; it asks [`SyncError::severity`], which encodes the run-level
//! taxonomy (fatal, per-table recoverable, asset recoverable).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status or custom)
    pub code: u16,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// SyncError - Main error type
// ============================================================================

/// Main error type for the sync engine and its tools
#[derive(Debug, Error)]
pub enum SyncError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Connection & Migration Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // ======================================
    // Database Errors
    // ======================================
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query failed: {query}: {error}")]
    QueryFailed { query: String, error: String },

    // ======================================
    // Schema Errors
    // ======================================
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table {0} has no columns in common between source and destination")]
    NoCommonColumns(String),

    #[error("Table {0} has no usable primary key")]
    MissingPrimaryKey(String),

    #[error("Unsupported value in {table}.{column}: {reason}")]
    UnsupportedValue {
        table: String,
        column: String,
        reason: String,
    },

    // ======================================
    // Asset Store Errors
    // ======================================
    #[error("Asset store error: {0}")]
    AssetStore(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Runtime Errors
    // ======================================
    #[error("Sync already running: {0}")]
    Busy(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

/// How far an error is allowed to propagate within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Aborts the whole run before (further) writes
    Fatal,
    /// Skips the current table or row, the run continues
    TableRecoverable,
    /// Leaves a remote asset in place, never escalated
    AssetRecoverable,
}

impl SyncError {
    /// Create a connection error for an endpoint
    pub fn connection(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a query error keeping the offending statement
    pub fn query(query: impl Into<String>, error: impl ToString) -> Self {
        Self::QueryFailed {
            query: query.into(),
            error: error.to_string(),
        }
    }

    /// Run-level severity of this error
    pub fn severity(&self) -> Severity {
        match self {
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::MissingConfig(_)
            | Self::ConnectionFailed { .. }
            | Self::Migration(_)
            | Self::Busy(_) => Severity::Fatal,

            Self::AssetStore(_) | Self::HttpClient(_) => Severity::AssetRecoverable,

            _ => Severity::TableRecoverable,
        }
    }

    /// Whether this error must abort the run
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidConfig { .. } | Self::UnsupportedValue { .. } => 400,

            // 404 Not Found
            Self::TableNotFound(_) => 404,

            // 409 Conflict
            Self::Busy(_) => 409,

            // 502 Bad Gateway
            Self::ConnectionFailed { .. } | Self::AssetStore(_) | Self::HttpClient(_) => 502,

            // 504 Gateway Timeout
            Self::Timeout(_) => 504,

            // Everything else is an internal failure
            _ => 500,
        }
    }

    /// Convert to API ErrorInfo for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string()).with_code(self.status_code());

        match self {
            Self::InvalidConfig { field, reason } => {
                error_info = error_info.add_field_error(field, reason);
            },
            Self::QueryFailed { query, error } => {
                error_info = error_info.with_details(format!("Query: {}, Error: {}", query, error));
            },
            _ => {},
        }

        error_info
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::SyncError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SyncError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! asset_error {
    ($msg:expr) => {
        $crate::SyncError::AssetStore($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::SyncError::AssetStore(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// SyncError implements SyncErrorTrait
// ============================================================================

impl SyncErrorTrait for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",

            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Migration(_) => "MIGRATION_FAILED",
            Self::Timeout(_) => "TIMEOUT",

            Self::Database(_) => "DATABASE_ERROR",
            Self::QueryFailed { .. } => "QUERY_FAILED",

            Self::TableNotFound(_) => "TABLE_NOT_FOUND",
            Self::NoCommonColumns(_) => "NO_COMMON_COLUMNS",
            Self::MissingPrimaryKey(_) => "MISSING_PRIMARY_KEY",
            Self::UnsupportedValue { .. } => "UNSUPPORTED_VALUE",

            Self::AssetStore(_) => "ASSET_STORE_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",

            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",

            Self::Busy(_) => "SYNC_BUSY",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },

            Self::ConnectionFailed { .. } => ErrorCategory::Connection,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::Migration(_) | Self::Database(_) | Self::QueryFailed { .. } => {
                ErrorCategory::Database
            },

            Self::TableNotFound(_)
            | Self::NoCommonColumns(_)
            | Self::MissingPrimaryKey(_)
            | Self::UnsupportedValue { .. } => ErrorCategory::Schema,

            Self::AssetStore(_) => ErrorCategory::Asset,

            Self::HttpClient(_) => ErrorCategory::Network,

            Self::Busy(_) => ErrorCategory::ResourceBusy,

            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error capability trait
// ============================================================================

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Connection,
    Database,
    Network,
    Timeout,

    // Sync layer
    Schema,
    Asset,

    // System level
    Internal,
    ResourceBusy,

    // Others
    Unknown,
}

/// Error capability trait
///
/// Gives any error type used by the tools a common interface for codes,
/// categories and log levels.
pub trait SyncErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for API, logs)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::ResourceBusy
        )
    }

    /// Convert to HTTP status code
    #[cfg(feature = "axum-support")]
    fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.category() {
            ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
            ErrorCategory::Schema => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::Connection | ErrorCategory::Network | ErrorCategory::Asset => {
                StatusCode::BAD_GATEWAY
            },
            ErrorCategory::ResourceBusy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database | ErrorCategory::Connection => {
                Level::ERROR
            },
            ErrorCategory::Asset | ErrorCategory::Schema => Level::WARN,
            _ => Level::WARN,
        }
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_severity_taxonomy() {
        assert!(SyncError::connection("postgres://staging", "refused").is_fatal());
        assert!(SyncError::Migration("checksum mismatch".into()).is_fatal());
        assert_eq!(
            SyncError::NoCommonColumns("partners".into()).severity(),
            Severity::TableRecoverable
        );
        assert_eq!(
            SyncError::AssetStore("not found".into()).severity(),
            Severity::AssetRecoverable
        );
        assert_eq!(
            SyncError::query("SELECT 1", "boom").severity(),
            Severity::TableRecoverable
        );
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(SyncError::Busy("push".into()).status_code(), 409);
        assert_eq!(SyncError::Timeout("sync run".into()).status_code(), 504);
        assert_eq!(SyncError::TableNotFound("x".into()).status_code(), 404);
        assert_eq!(SyncError::Serialization("x".into()).status_code(), 500);
    }

    #[test]
    fn test_error_retryable() {
        assert!(SyncError::Timeout("test".into()).is_retryable());
        assert!(SyncError::connection("db", "reset").is_retryable());
        assert!(!SyncError::MissingPrimaryKey("t".into()).is_retryable());
    }

    #[test]
    fn test_error_info() {
        let error = SyncError::InvalidConfig {
            field: "tables".into(),
            reason: "duplicate name".into(),
        };
        let info = error.to_error_info();
        assert_eq!(info.code, 400);
        assert!(info.field_errors.contains_key("tables"));
    }
}
