//! Authentication Boundary
//!
//! Caller-facing token check and the JSON result envelope used at the edge of
//! the gateway. Transport adapters (HTTP routers, RPC servers) extract the
//! headers and hand them to [`TokenGuard`]; nothing here performs I/O.

use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// Header carrying a caller-supplied trace id
pub const TRACE_ID_HEADER: &str = "trace_id";

/// Legacy credential header, consulted after `Authorization`
pub const TOKEN_HEADER: &str = "token";

const MISSING_TOKEN_MESSAGE: &str =
    "missing access token (use `Authorization: Bearer <token>` or a `token` header)";
const UNAUTHORIZED_MESSAGE: &str = "unauthorized";

/// Result envelope returned at the boundary
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiResult<T> {
    /// 200 on success, an HTTP-like status otherwise
    pub code: u16,
    /// Human readable outcome
    pub message: String,
    /// Payload, `null` on failure
    pub data: Option<T>,
    /// Request trace id
    pub trace_id: Option<String>,
}

impl<T> ApiResult<T> {
    /// Successful result
    #[must_use]
    pub fn ok(data: T, trace_id: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: "ok".to_string(),
            data: Some(data),
            trace_id: Some(trace_id.into()),
        }
    }

    /// Failed result without data
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            trace_id: Some(trace_id.into()),
        }
    }

    /// Whether this is a success envelope
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }
}

/// Why a request was turned away
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthRejection {
    /// No credential in either header
    MissingToken,
    /// Credential present but wrong
    Unauthorized,
}

impl AuthRejection {
    /// Message shown to the caller
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingToken => MISSING_TOKEN_MESSAGE,
            Self::Unauthorized => UNAUTHORIZED_MESSAGE,
        }
    }

    /// 401 envelope for this rejection
    #[must_use]
    pub fn into_result<T>(self, trace_id: impl Into<String>) -> ApiResult<T> {
        ApiResult::error(401, self.message(), trace_id)
    }
}

/// Credential from `Authorization: Bearer <token>`, else the `token` header.
/// Blank values count as absent.
pub fn extract_token<'a>(
    authorization: Option<&'a str>,
    token_header: Option<&'a str>,
) -> Option<&'a str> {
    authorization
        .and_then(|value| value.strip_prefix("Bearer "))
        .or(token_header)
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Fresh UUID v4 trace id
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Caller-supplied trace id, or a fresh one
pub fn trace_id_or_new(header: Option<&str>) -> String {
    match header.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => new_trace_id(),
    }
}

/// Shared-token check for incoming requests
#[derive(Clone)]
pub struct TokenGuard {
    token: Option<String>,
    exempt_paths: Vec<String>,
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("exempt_paths", &self.exempt_paths)
            .finish()
    }
}

impl TokenGuard {
    /// Guard requiring `token`. With `None` every request is rejected as
    /// unauthorized.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            exempt_paths: Vec::new(),
        }
    }

    /// Guard from the `[auth]` config section
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.token.clone())
    }

    /// Paths served without a credential (health probes, docs)
    #[must_use]
    pub fn with_exempt_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Whether `path` skips authentication
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }

    /// Check the credential headers of one request
    pub fn authorize(
        &self,
        authorization: Option<&str>,
        token_header: Option<&str>,
    ) -> Result<(), AuthRejection> {
        let Some(presented) = extract_token(authorization, token_header) else {
            tracing::debug!("Request without access token");
            return Err(AuthRejection::MissingToken);
        };
        match self.token {
            Some(ref expected) if expected == presented => Ok(()),
            _ => {
                tracing::warn!("Request with invalid access token");
                Err(AuthRejection::Unauthorized)
            }
        }
    }

    /// [`authorize`](Self::authorize) unless `path` is exempt
    pub fn authorize_path(
        &self,
        path: &str,
        authorization: Option<&str>,
        token_header: Option<&str>,
    ) -> Result<(), AuthRejection> {
        if self.is_exempt(path) {
            return Ok(());
        }
        self.authorize(authorization, token_header)
    }
}
