//! Typed errors for the extraction library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::time::Duration;

use thiserror::Error;

use crate::types::request::{ExtractionResponse, FailoverEvent, Stage};

/// Errors that can occur while running an extraction request.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Request is missing required input or has an unusable shape
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Every configured provider failed, or one failed non-recoverably
    #[error("provider error: {0}")]
    Gateway(#[from] GatewayError),

    /// Model output could not be turned into extractions
    #[error("could not parse model output: {reason}")]
    Parse { reason: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Canceled,

    /// The request's deadline elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ExtractionError {
    /// Shorthand for an [`ExtractionError::InvalidRequest`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a single language model backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The call did not finish within its time budget
    #[error("request timed out")]
    Timeout,

    /// Backend asked us to slow down
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Backend failed on its side (5xx-equivalent)
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Backend could not be reached
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Backend rejected the request as malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No backend is registered for the requested provider
    #[error("provider not registered: {0}")]
    NotRegistered(String),

    /// The caller cancelled the request
    #[error("operation cancelled")]
    Canceled,

    /// The request's overall deadline elapsed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ProviderError {
    /// Whether the gateway may retry this error or fail over past it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited { .. } | Self::Server { .. } | Self::Unavailable(_)
        )
    }

    /// Short machine-friendly label used in failover events and health reports.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::Unavailable(_) => "unavailable",
            Self::Authentication(_) => "authentication",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotRegistered(_) => "not_registered",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// Errors returned by the provider gateway.
///
/// Every variant carries the failover events recorded before the failure so
/// the pipeline can report them on the partial response.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Nothing to call
    #[error("no providers configured")]
    NoProviders,

    /// A provider failed in a way retrying cannot fix
    #[error("provider {provider} failed: {source}")]
    NonRecoverable {
        provider: String,
        #[source]
        source: ProviderError,
        events: Vec<FailoverEvent>,
    },

    /// All providers were tried and failed
    #[error("all providers exhausted after {attempts} attempts, last error: {last}")]
    Exhausted {
        attempts: u32,
        last: ProviderError,
        events: Vec<FailoverEvent>,
    },

    /// The request was cancelled or ran out of time mid-call
    #[error("provider call interrupted: {reason}")]
    Interrupted {
        reason: ProviderError,
        events: Vec<FailoverEvent>,
    },
}

impl GatewayError {
    /// Failover events recorded before the failure.
    pub fn events(&self) -> &[FailoverEvent] {
        match self {
            Self::NoProviders => &[],
            Self::NonRecoverable { events, .. }
            | Self::Exhausted { events, .. }
            | Self::Interrupted { events, .. } => events,
        }
    }
}

/// An extraction rejected by a schema validator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Class is not part of the schema
    #[error("unknown extraction class: {class}")]
    UnknownClass { class: String },

    /// A required attribute is absent
    #[error("extraction '{class}' is missing required attribute '{attribute}'")]
    MissingAttribute { class: String, attribute: String },

    /// Free-form rejection from a custom validator
    #[error("{0}")]
    Invalid(String),
}

/// A fatal pipeline failure.
///
/// Names the stage that failed and owns the response as it stood at the time
/// of failure; partial results on it are valid.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: ExtractionError,
    pub partial: Box<ExtractionResponse>,
}

impl PipelineError {
    /// The partially populated response.
    pub fn response(&self) -> &ExtractionResponse {
        &self.partial
    }

    /// Take ownership of the partial response.
    pub fn into_response(self) -> ExtractionResponse {
        *self.partial
    }
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ProviderError::Timeout.is_recoverable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_recoverable());
        assert!(ProviderError::Server {
            status: 503,
            message: "overloaded".into()
        }
        .is_recoverable());
        assert!(!ProviderError::Authentication("bad key".into()).is_recoverable());
        assert!(!ProviderError::InvalidRequest("no prompt".into()).is_recoverable());
        assert!(!ProviderError::Canceled.is_recoverable());
    }

    #[test]
    fn test_gateway_error_exposes_events() {
        let err = GatewayError::NoProviders;
        assert!(err.events().is_empty());
    }
}
