//! Error hierarchy shared by the cache, retry engine, and observers.
//!
//! One [`QueryError`] enum covers every error kind named in the spec: transient
//! fetch failures bubbled from user code, cancellation, the two "this should
//! not happen" cache errors (`MissingFetcher`, `UndefinedResult`), and selector
//! failures that never touch `Entry` state.

use std::sync::Arc;
use std::time::Duration;

use crate::key::KeyHash;

/// Errors produced anywhere in the cache, retry, or observer pipeline.
///
/// `QueryError` is `Clone` because the same error is handed to every observer
/// of an `Entry` and to the cache-level `on_error` hook; cloning a boxed user
/// error would lose its `source()` chain, so [`QueryError::Fetch`] shares the
/// original error behind an `Arc` instead of flattening it to a string.
#[derive(Clone, Debug, thiserror::Error)]
pub enum QueryError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: Option<String>,
    },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Produced by `cancel({revert, silent})`. Carries the same attributes the
    /// spec's CancelledError carries (§4.2, §7).
    #[error("request was cancelled")]
    Cancelled { revert: bool, silent: bool },

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },

    #[error("custom error: {message}")]
    Custom {
        message: String,
        code: Option<String>,
    },

    #[error("cache error: {message}")]
    Cache { message: String },

    /// An `Entry` had no fetcher and no observer supplied one (§7).
    #[error("no fetcher registered for query {0}")]
    MissingFetcher(KeyHash),

    /// The user fetch function resolved to an absent value (§4.3 "On success").
    #[error("query function for {0} resolved to no value")]
    UndefinedResult(KeyHash),

    /// Raised only on a derived `EntryResult`; never stored on `Entry` (§4.5, §9.1).
    #[error("selector failed: {message}")]
    Selector { message: String },

    /// Wraps an arbitrary user fetch-function error, preserving its `source()`.
    #[error("{0}")]
    Fetch(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl QueryError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    pub fn http_with_body(status: u16, message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: Some(body.into()),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
            code: None,
        }
    }

    pub fn custom_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn cancelled(revert: bool, silent: bool) -> Self {
        Self::Cancelled { revert, silent }
    }

    /// Wrap an arbitrary user error, preserving its error chain.
    pub fn from_fetch_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fetch(Arc::new(err))
    }

    /// Whether the Retryer should attempt another try after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::RateLimit { .. } => true,
            Self::Fetch(_) => true,
            Self::Cancelled { .. } => false,
            Self::Serialization(_) => false,
            Self::Deserialization(_) => false,
            Self::TypeMismatch { .. } => false,
            Self::Custom { .. } => false,
            Self::Cache { .. } => false,
            Self::MissingFetcher(_) => false,
            Self::UndefinedResult(_) => false,
            Self::Selector { .. } => false,
        }
    }

    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            Self::Http { status, .. } if *status == 429 => Some(Duration::from_secs(60)),
            Self::Network { .. } => Some(Duration::from_millis(1000)),
            Self::Timeout { .. } => Some(Duration::from_millis(2000)),
            _ => None,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Http { status, .. } => match *status {
                400..=499 => ErrorSeverity::Info,
                500..=599 => ErrorSeverity::Error,
                _ => ErrorSeverity::Warning,
            },
            Self::RateLimit { .. } => ErrorSeverity::Warning,
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::Serialization(_) => ErrorSeverity::Error,
            Self::Deserialization(_) => ErrorSeverity::Error,
            Self::TypeMismatch { .. } => ErrorSeverity::Error,
            Self::Custom { .. } => ErrorSeverity::Warning,
            Self::Cache { .. } => ErrorSeverity::Warning,
            Self::MissingFetcher(_) => ErrorSeverity::Error,
            Self::UndefinedResult(_) => ErrorSeverity::Error,
            Self::Selector { .. } => ErrorSeverity::Error,
            Self::Fetch(_) => ErrorSeverity::Warning,
        }
    }

    /// True for a cancellation whose errors/hooks should be suppressed entirely.
    pub fn is_silent_cancel(&self) -> bool {
        matches!(self, Self::Cancelled { silent: true, .. })
    }

    pub fn as_cancelled(&self) -> Option<(bool, bool)> {
        match self {
            Self::Cancelled { revert, silent } => Some((*revert, *silent)),
            _ => None,
        }
    }
}

/// Error severity levels for logging (§6.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_teacher_table() {
        assert!(QueryError::network("down").is_retryable());
        assert!(QueryError::timeout(5000).is_retryable());
        assert!(QueryError::http(500, "server error").is_retryable());
        assert!(!QueryError::http(400, "bad request").is_retryable());
        assert!(!QueryError::custom("validation failed").is_retryable());
        assert!(!QueryError::cancelled(true, false).is_retryable());
    }

    #[test]
    fn silent_cancel_is_detected() {
        let err = QueryError::cancelled(false, true);
        assert!(err.is_silent_cancel());
        assert_eq!(err.as_cancelled(), Some((false, true)));
    }
}
