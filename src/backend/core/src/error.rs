//! Error handling for Planwright Core.
//!
//! This module provides:
//! - A single crate error type carrying a stable [`ErrorCode`]
//! - Typed payloads for the recoverable cases (version conflicts, handler failures)
//! - Severity-aware logging through `tracing`
//! - An error counter through `metrics`
//!
//! # Usage
//!
//! ```rust,ignore
//! use planwright_core::error::{ErrorContext, Result};
//!
//! fn read_snapshot(path: &std::path::Path) -> Result<Vec<u8>> {
//!     std::fs::read(path).context("Failed to read execution snapshot")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Planwright operations.
pub type Result<T> = std::result::Result<T, PlanError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers (CLI, tool handlers) for
/// programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Event log errors (1000-1099)
    EventNotFound,
    EventDecodeFailed,
    EventAppendFailed,

    // Dispatch errors (1100-1199)
    HandlerFailed,
    DispatchFailed,
    DispatchCancelled,

    // Execution state errors (1200-1299)
    VersionConflict,
    InvalidProjectId,

    // Storage errors (2000-2099)
    StorageError,
    FileNotFound,
    PermissionDenied,
    LockFailed,

    // Serialization errors (2200-2299)
    SerializationError,
    DeserializationError,
    InvalidJson,

    // Validation errors (4100-4199)
    ValidationError,

    // Configuration errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::EventNotFound => 1000,
            Self::EventDecodeFailed => 1001,
            Self::EventAppendFailed => 1002,

            Self::HandlerFailed => 1100,
            Self::DispatchFailed => 1101,
            Self::DispatchCancelled => 1102,

            Self::VersionConflict => 1200,
            Self::InvalidProjectId => 1201,

            Self::StorageError => 2000,
            Self::FileNotFound => 2001,
            Self::PermissionDenied => 2002,
            Self::LockFailed => 2003,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,
            Self::InvalidJson => 2202,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Check if the failed operation can succeed when retried.
    ///
    /// A version conflict is retryable only after the caller reloads state.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict | Self::LockFailed | Self::StorageError)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "event_log",
            1100..=1199 => "dispatch",
            1200..=1299 => "execution_state",
            2000..=2099 => "storage",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids)
    Low,
    /// Expected operational outcomes (conflicts, handler failures)
    Medium,
    /// Local I/O or decode failures
    High,
    /// Bugs and unclassified failures
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::InvalidProjectId
            | ErrorCode::EventNotFound
            | ErrorCode::FileNotFound => Self::Low,

            ErrorCode::VersionConflict
            | ErrorCode::HandlerFailed
            | ErrorCode::DispatchFailed
            | ErrorCode::DispatchCancelled
            | ErrorCode::LockFailed => Self::Medium,

            ErrorCode::EventDecodeFailed
            | ErrorCode::EventAppendFailed
            | ErrorCode::StorageError
            | ErrorCode::PermissionDenied
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::InvalidJson
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (event, task, project)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed Payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// An optimistic save was attempted against a stale snapshot.
///
/// `expected` is the version the caller held in memory, `actual` is the version
/// found on disk. Reload, reapply the mutation and save again.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("version conflict: expected {expected}, found {actual}")]
pub struct ConflictError {
    pub expected: u64,
    pub actual: u64,
}

/// A single failed handler invocation.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Name the handler was registered under
    pub handler: String,
    /// The error it returned
    pub error: PlanError,
}

/// Every handler failure collected by a continue-on-error dispatch.
///
/// `source()` yields the first failure so single-error inspection keeps working.
#[derive(Debug)]
pub struct DispatchError {
    failures: Vec<HandlerFailure>,
}

impl DispatchError {
    pub(crate) fn new(failures: Vec<HandlerFailure>) -> Self {
        debug_assert!(!failures.is_empty());
        Self { failures }
    }

    /// All failures, in handler invocation order.
    pub fn failures(&self) -> &[HandlerFailure] {
        &self.failures
    }

    /// The first failure.
    pub fn first(&self) -> Option<&PlanError> {
        self.failures.first().map(|f| &f.error)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} event handler(s) failed", self.failures.len())?;
        if let Some(first) = self.failures.first() {
            write!(f, "; first: {} ({})", first.handler, first.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| &f.error as &(dyn std::error::Error + 'static))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Planwright Core.
#[derive(Error, Debug)]
pub struct PlanError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to show to end users
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl PlanError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a version conflict error for an optimistic save.
    pub fn conflict(project_id: &str, expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            format!(
                "Execution state for {} changed on disk (expected version {}, found {})",
                project_id, expected, actual
            ),
        )
        .with_details(
            ErrorDetails::new()
                .with_entity("project", project_id)
                .with_context("expected", expected)
                .with_context("actual", actual)
                .with_suggestion("Reload the execution state and reapply the change"),
        )
        .with_source(ConflictError { expected, actual })
    }

    /// Create an error for a log line that could not be decoded.
    pub fn event_decode(line: usize, source: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::EventDecodeFailed,
            format!("Event log record on line {} could not be decoded", line),
            source.to_string(),
        )
        .with_context("line", line)
        .with_source(source)
    }

    /// Wrap the collected failures of a continue-on-error dispatch.
    pub fn dispatch_failed(event_type: &str, failures: DispatchError) -> Self {
        Self::new(
            ErrorCode::DispatchFailed,
            format!("{} handler(s) failed for {}", failures.len(), event_type),
        )
        .with_context("event_type", event_type)
        .with_source(failures)
    }

    /// A handler observed cancellation and stopped early.
    pub fn cancelled(handler: impl Into<String>) -> Self {
        let handler = handler.into();
        Self::new(
            ErrorCode::DispatchCancelled,
            format!("Handler {} stopped: dispatch cancelled", handler),
        )
        .with_context("handler", handler)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// The version pair if this error is an optimistic-save conflict.
    pub fn conflict_versions(&self) -> Option<&ConflictError> {
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<ConflictError>())
    }

    /// All handler failures if this error came from a continue-on-error dispatch.
    pub fn dispatch_failures(&self) -> Option<&DispatchError> {
        self.source
            .as_deref()
            .and_then(|s| s.downcast_ref::<DispatchError>())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "planwright_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| PlanError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| PlanError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PlanError::new(ErrorCode::EventNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| PlanError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for PlanError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::FileNotFound, "File not found"),
            ErrorKind::PermissionDenied => (ErrorCode::PermissionDenied, "Permission denied"),
            ErrorKind::WouldBlock => (ErrorCode::LockFailed, "Resource is locked"),
            _ => (ErrorCode::StorageError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() {
            ErrorCode::DeserializationError
        } else if error.is_eof() {
            ErrorCode::InvalidJson
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for PlanError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::MissingConfiguration, "Required configuration not found")
            }
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<anyhow::Error> for PlanError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<PlanError>() {
            Ok(plan_error) => plan_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                format!("{:#}", error),
            ),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for PlanError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::with_internal(
            ErrorCode::DispatchFailed,
            "Background dispatch ended without reporting a result",
            error.to_string(),
        )
        .with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::EventNotFound.numeric_code(), 1000);
        assert_eq!(ErrorCode::VersionConflict.numeric_code(), 1200);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 9000);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::EventDecodeFailed.category(), "event_log");
        assert_eq!(ErrorCode::HandlerFailed.category(), "dispatch");
        assert_eq!(ErrorCode::VersionConflict.category(), "execution_state");
        assert_eq!(ErrorCode::LockFailed.category(), "storage");
    }

    #[test]
    fn test_conflict_carries_versions() {
        let err = PlanError::conflict("proj-1", 1, 2);
        assert_eq!(err.code(), ErrorCode::VersionConflict);
        assert!(err.is_retryable());
        assert_eq!(
            err.conflict_versions(),
            Some(&ConflictError { expected: 1, actual: 2 })
        );
        assert_eq!(err.details().entity_id.as_deref(), Some("proj-1"));
    }

    #[test]
    fn test_dispatch_error_sources_first_failure() {
        let failures = DispatchError::new(vec![
            HandlerFailure {
                handler: "first".to_string(),
                error: PlanError::validation("first broke"),
            },
            HandlerFailure {
                handler: "second".to_string(),
                error: PlanError::internal("second broke"),
            },
        ]);
        assert_eq!(failures.len(), 2);

        let err = PlanError::dispatch_failed("task.completed", failures);
        let aggregate = err.dispatch_failures().unwrap();
        let first = aggregate
            .source()
            .and_then(|s| s.downcast_ref::<PlanError>())
            .unwrap();
        assert_eq!(first.code(), ErrorCode::ValidationError);
        assert!(err.conflict_versions().is_none());
    }

    #[test]
    fn test_io_error_mapping() {
        let err: PlanError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert_eq!(err.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u32> = None;
        let err = missing.with_error_code(ErrorCode::EventNotFound).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventNotFound);
    }
}
