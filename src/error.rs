//! Error types for the batch orchestration pipeline.
//!
//! Mirrors the categorization scheme used throughout this crate's HTTP and
//! database boundaries: every error can be classified by [`ErrorCategory`]
//! for routing and by [`CoreError::is_retryable`] for retry decisions.
//!
//! Policy violations (entitlement denials) are intentionally *not*
//! represented here — see [`crate::entitlements::Decision`] — because
//! plan-limit business rules are expected outcomes, not failures.

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// High-level categorization of errors for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// External service failures (providers, database, key-value store).
    External,
    /// Internal invariant violations / bugs.
    Internal,
    /// Caller/config errors the operator can fix.
    Client,
    /// Should be retried with backoff.
    Transient,
}

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

/// Convenient result type used throughout this crate.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors that can occur anywhere in the batch pipeline.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database connection or query failure.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Provider HTTP request failed (upload, submit, poll, fetch).
    #[error("provider request failed: {message}")]
    ProviderRequestFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Provider returned a response this crate could not parse.
    #[error("provider response parsing failed: {message}")]
    ResponseParsing { message: String },

    /// Provider rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// A provider or database call exceeded its deadline.
    #[error("operation timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    /// Provider credentials missing or rejected.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Configuration is missing required fields or is internally inconsistent.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A named job handler or provider tag was not recognized.
    #[error("unknown identifier: {message}")]
    NotSupported { message: String },

    /// An invariant the system depends on was violated (should never happen).
    #[error("invariant violation: {message}")]
    Invariant { message: String },
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Database { .. } => ErrorCategory::External,
            Self::ProviderRequestFailed { .. } => ErrorCategory::External,
            Self::ResponseParsing { .. } => ErrorCategory::External,
            Self::RateLimitExceeded { .. } => ErrorCategory::Transient,
            Self::Timeout { .. } => ErrorCategory::Transient,
            Self::AuthenticationFailed { .. } => ErrorCategory::Client,
            Self::Configuration { .. } => ErrorCategory::Client,
            Self::NotSupported { .. } => ErrorCategory::Client,
            Self::Invariant { .. } => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Database { .. } => ErrorSeverity::Error,
            Self::ProviderRequestFailed { .. } => ErrorSeverity::Error,
            Self::ResponseParsing { .. } => ErrorSeverity::Warning,
            Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } => ErrorSeverity::Critical,
            Self::Configuration { .. } => ErrorSeverity::Error,
            Self::NotSupported { .. } => ErrorSeverity::Error,
            Self::Invariant { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether this error should trigger a retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. }
                | Self::Timeout { .. }
                | Self::ProviderRequestFailed { .. }
                | Self::Database { .. }
        )
    }

    pub fn database(message: impl Into<String>, source: Option<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        let message = message.into();
        log_error!(error_type = "database", message = %message, "database operation failed");
        Self::Database { message, source }
    }

    pub fn provider_request_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(error_type = "provider_request_failed", message = %message, "provider request failed");
        Self::ProviderRequestFailed { message, source }
    }

    pub fn response_parsing(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(error_type = "response_parsing", message = %message, "provider response did not parse");
        Self::ResponseParsing { message }
    }

    pub fn rate_limit_exceeded(retry_after_seconds: u64) -> Self {
        log_warn!(error_type = "rate_limit_exceeded", retry_after_seconds, "provider rate limit exceeded");
        Self::RateLimitExceeded { retry_after_seconds }
    }

    pub fn timeout(timeout_seconds: u64) -> Self {
        log_warn!(error_type = "timeout", timeout_seconds, "operation timed out");
        Self::Timeout { timeout_seconds }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "authentication_failed", message = %message, "provider authentication failed");
        Self::AuthenticationFailed { message }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "configuration", message = %message, "configuration invalid");
        Self::Configuration { message }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "not_supported", message = %message, "unsupported identifier");
        Self::NotSupported { message }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(error_type = "invariant", message = %message, "invariant violation");
        Self::Invariant { message }
    }
}

impl From<mongodb::error::Error> for CoreError {
    fn from(e: mongodb::error::Error) -> Self {
        CoreError::database(e.to_string(), Some(Box::new(e)))
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::database(e.to_string(), Some(Box::new(e)))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CoreError::timeout(45)
        } else {
            CoreError::provider_request_failed(e.to_string(), Some(Box::new(e)))
        }
    }
}
