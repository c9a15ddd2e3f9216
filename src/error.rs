//! Error types for Tollgate.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Which quota a limiter enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// One unit per top-level pipeline invocation
    Request,
    /// Units are language-model tokens reported by the pipeline
    Token,
}

impl LimitKind {
    /// Short name used in counter keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Request => "request",
            LimitKind::Token => "token",
        }
    }

    /// Parse the short name produced by [`LimitKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(LimitKind::Request),
            "token" => Some(LimitKind::Token),
            _ => None,
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quota was exhausted for an identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} limit reached for '{identifier}' (limit {limit}, resets at {reset_at})")]
pub struct QuotaExceeded {
    /// The quota that denied the call
    pub kind: LimitKind,
    /// The identifier being limited
    pub identifier: String,
    /// Maximum units per window
    pub limit: u64,
    /// When the current window ends
    pub reset_at: DateTime<Utc>,
}

/// Failures talking to the counter store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the request timed out
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success HTTP status
    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    /// The store reported an error for the command
    #[error("store returned an error: {0}")]
    Response(String),

    /// The store's reply did not have the expected shape
    #[error("failed to decode store reply: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A request or token quota denied the call
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// The counter store is unreachable and the limiter fails closed
    #[error("counter store unavailable: {0}")]
    BackendUnavailable(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TollgateError {
    /// The quota failure, if this is one.
    pub fn quota_exceeded(&self) -> Option<&QuotaExceeded> {
        match self {
            TollgateError::QuotaExceeded(quota) => Some(quota),
            _ => None,
        }
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Outcome of a guarded pipeline invocation that did not return a value.
///
/// Limiter failures and pipeline failures stay separate so that the
/// pipeline's own error reaches the caller untouched.
#[derive(Debug)]
pub enum InvokeError<E> {
    /// The limiter denied the call or could not reach its store
    Limit(TollgateError),
    /// The pipeline itself failed
    Pipeline(E),
}

impl<E> InvokeError<E> {
    /// The quota failure, if the limiter denied the call.
    pub fn quota_exceeded(&self) -> Option<&QuotaExceeded> {
        match self {
            InvokeError::Limit(err) => err.quota_exceeded(),
            InvokeError::Pipeline(_) => None,
        }
    }

    /// Whether the counter store was unreachable.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            InvokeError::Limit(TollgateError::BackendUnavailable(_))
        )
    }

    /// The pipeline's error, if the pipeline failed.
    pub fn into_pipeline(self) -> Option<E> {
        match self {
            InvokeError::Pipeline(err) => Some(err),
            InvokeError::Limit(_) => None,
        }
    }
}

impl<E> From<TollgateError> for InvokeError<E> {
    fn from(err: TollgateError) -> Self {
        InvokeError::Limit(err)
    }
}

impl<E> From<QuotaExceeded> for InvokeError<E> {
    fn from(err: QuotaExceeded) -> Self {
        InvokeError::Limit(err.into())
    }
}

impl<E: fmt::Display> fmt::Display for InvokeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Limit(err) => write!(f, "{}", err),
            InvokeError::Pipeline(err) => write!(f, "pipeline error: {}", err),
        }
    }
}

impl<E> std::error::Error for InvokeError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Limit(err) => Some(err),
            InvokeError::Pipeline(err) => Some(err),
        }
    }
}
