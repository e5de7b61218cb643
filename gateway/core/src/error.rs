//! Error Taxonomy
//!
//! Every failure in the gateway surfaces as one [`GatewayError`]. The variants
//! carry enough structure for two decisions:
//!
//! - [`GatewayError::is_retryable`]: may a Client repeat the same HTTP call?
//! - [`GatewayError::is_candidate_skippable`]: may the Aggregator move on to
//!   the next candidate, or must it abort the whole logical request?

use std::fmt;

use thiserror::Error;

use crate::types::Candidate;

/// Result alias used throughout the crate
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors produced by the gateway
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Invalid or inconsistent configuration (also duplicate registration)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No Provider registered under this vendor name
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Model absent from its Provider, or marked unavailable
    #[error("model not found: {vendor}/{model}")]
    ModelNotFound {
        /// Vendor that was searched
        vendor: String,
        /// Model that was requested
        model: String,
    },

    /// No concurrency permit became available within the call timeout
    #[error("no capacity for {vendor}/{model} within {waited_ms}ms")]
    Capacity {
        /// Vendor of the saturated Client
        vendor: String,
        /// Model of the saturated Client
        model: String,
        /// How long the caller waited for a permit
        waited_ms: u64,
    },

    /// The upstream call (or one stream chunk) exceeded its deadline
    #[error("request to {vendor}/{model} timed out after {timeout_ms}ms")]
    Timeout {
        /// Vendor of the Client
        vendor: String,
        /// Model of the Client
        model: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Upstream API failure. `status` is `None` for connection-level failures.
    #[error("{}", format_api(.status, .message))]
    Api {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Upstream error body or transport error text
        message: String,
        /// Whether repeating the call may succeed
        retryable: bool,
    },

    /// Credential rejected by the vendor
    #[error("authentication rejected by {vendor}: {message}")]
    Auth {
        /// Vendor that rejected the credential
        vendor: String,
        /// Upstream message
        message: String,
    },

    /// The caller's request cannot be served as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The Client, Provider or Manager has been closed
    #[error("{0} is closed")]
    Closed(String),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Every candidate failed; causes are in attempt order
    #[error("all {} candidates failed: {}", .0.len(), format_failures(.0))]
    Aggregate(Vec<CandidateFailure>),
}

/// One failed attempt recorded by the Aggregator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Candidate that was attempted
    pub candidate: Candidate,
    /// Why it failed
    pub error: GatewayError,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.error)
    }
}

fn format_api(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("api error (status {code}): {message}"),
        None => format!("api error (no response): {message}"),
    }
}

fn format_failures(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Map an upstream HTTP status to an error kind.
    ///
    /// 401/403 are auth failures; 408, 429 and 5xx are retryable; any other
    /// status is a non-retryable API error.
    pub fn from_status(vendor: &str, status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Auth {
                vendor: vendor.to_string(),
                message,
            },
            408 | 429 | 500..=599 => Self::Api {
                status: Some(status),
                message,
                retryable: true,
            },
            _ => Self::Api {
                status: Some(status),
                message,
                retryable: false,
            },
        }
    }

    /// Connection-level failure before any response arrived
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
            retryable: true,
        }
    }

    /// Response arrived but could not be decoded
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether a Client may repeat the same call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Api { retryable: true, .. }
        )
    }

    /// Whether the Aggregator may advance to the next candidate
    pub fn is_candidate_skippable(&self) -> bool {
        match self {
            Self::ProviderNotFound(_) | Self::ModelNotFound { .. } | Self::Capacity { .. } => true,
            other => other.is_retryable(),
        }
    }

    /// HTTP status carried by an API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    /// Per-candidate causes of an aggregate failure (empty otherwise)
    pub fn failures(&self) -> &[CandidateFailure] {
        match self {
            Self::Aggregate(failures) => failures,
            _ => &[],
        }
    }
}
