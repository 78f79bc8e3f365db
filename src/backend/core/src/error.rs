//! Error handling for the stats service.
//!
//! This module provides:
//! - A single crate error type carrying a machine-readable code
//! - The aggregation phase in which a store operation failed
//! - User-facing vs internal messages
//! - HTTP status mapping and the `{success: false, error}` response body
//! - Error logging and metrics
//!
//! # Usage
//!
//! ```rust,ignore
//! use ourarchive_stats::error::{AggregationPhase, StatsError, Result};
//!
//! async fn count_users(store: &dyn DocumentStore) -> Result<u64> {
//!     store
//!         .count(&CollectionPath::root("users"))
//!         .await
//!         .map_err(|e| StatsError::aggregation(AggregationPhase::Count, e))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for stats operations.
pub type Result<T> = std::result::Result<T, StatsError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A store read or write failed while aggregating
    AggregationFailed,
    /// Configuration is missing or invalid
    ConfigurationError,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::AggregationFailed | Self::ConfigurationError | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable string form used in logs and metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AggregationFailed => "AGGREGATION_FAILED",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregation Phase
// ═══════════════════════════════════════════════════════════════════════════════

/// Which kind of store operation an aggregation failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPhase {
    /// Server-side count query
    Count,
    /// Full document scan
    List,
    /// Snapshot or history write
    Write,
}

impl fmt::Display for AggregationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::List => write!(f, "list"),
            Self::Write => write!(f, "write"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type for the stats service.
#[derive(Error, Debug)]
pub struct StatsError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to return to HTTP clients
    user_message: Cow<'static, str>,

    /// Detailed message for logs only
    internal_message: Option<String>,

    /// Phase of the failed store operation, for aggregation failures
    phase: Option<AggregationPhase>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl StatsError {
    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            phase: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// The aggregation failure: a store operation failed in `phase`.
    pub fn aggregation(phase: AggregationPhase, source: StoreError) -> Self {
        let mut error = Self::new(
            ErrorCode::AggregationFailed,
            format!("stats aggregation failed during {} phase: {}", phase, source),
        );
        error.phase = Some(phase);
        error.with_source(source)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    /// Create an internal error whose details stay out of client responses.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, "An internal error occurred")
            .with_internal_message(message)
    }

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Phase of the failed store operation, if this is an aggregation failure.
    pub fn phase(&self) -> Option<AggregationPhase> {
        self.phase
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Log this error.
    pub fn log(&self) {
        error!(
            error_code = %self.code,
            phase = ?self.phase,
            http_status = self.http_status().as_u16(),
            user_message = %self.user_message,
            internal_message = ?self.internal_message,
            source = ?self.source,
            "stats error"
        );
    }

    fn record_metrics(&self) {
        counter!(
            "ourarchive_stats_errors_total",
            "code" => self.code.as_str(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

/// Error body returned to HTTP clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable message
    pub error: String,
}

impl From<&StatsError> for ErrorResponse {
    fn from(error: &StatsError) -> Self {
        Self {
            success: false,
            error: error.user_message.to_string(),
        }
    }
}

impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.http_status();
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations
// ═══════════════════════════════════════════════════════════════════════════════

impl From<config::ConfigError> for StatsError {
    fn from(error: config::ConfigError) -> Self {
        Self::configuration(format!("invalid configuration: {}", error)).with_source(error)
    }
}

impl From<serde_json::Error> for StatsError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(error.to_string()).with_source(error)
    }
}
