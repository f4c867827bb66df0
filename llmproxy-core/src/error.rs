//! Error taxonomy for the key-rotation reverse proxy.
//!
//! Every variant maps onto a client-facing HTTP status and error `type`
//! string (§6, §7), and most map onto a [`RequestLogErrorType`] recorded
//! for the attempt. Variants that never reach the Proxy Pipeline's
//! logging step (`AuthenticationMaster`, `ClientInput`'s companion
//! `NoKeysAvailable`) still classify cleanly so callers don't need a
//! second switch statement.

use thiserror::Error;

use crate::types::RequestLogErrorType;

#[derive(Debug, Error)]
pub enum LlmProxyError {
    /// Request body could not be parsed as JSON.
    #[error("request body is not valid JSON: {0}")]
    ClientInput(String),

    /// Missing or incorrect `Authorization: Bearer <masterApiKey>`.
    #[error("missing or invalid master API key")]
    AuthenticationMaster,

    /// The Key Manager's rotation sweep found no usable key.
    #[error("no API keys available")]
    NoKeysAvailable,

    /// Upstream rejected the key itself (401/403/429).
    #[error("upstream rejected API key with status {status}: {message}")]
    UpstreamApiKey { status: u16, message: String },

    /// Upstream returned a 5xx.
    #[error("upstream server error with status {status}: {message}")]
    UpstreamServer { status: u16, message: String },

    /// The upstream call timed out or the transport aborted.
    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    /// Any other non-key 4xx from upstream.
    #[error("upstream error with status {status}: {message}")]
    UpstreamOther { status: u16, message: String },

    /// Every retry exhausted the budget for retriable reasons.
    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,

    /// Missing or unparseable configuration at process start.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying persistence backend failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Anything that should never happen.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LlmProxyError {
    /// HTTP status code returned to the client for this error, per §7.
    /// Upstream-sourced variants pass the upstream's own status through
    /// verbatim, matching §6's "surfaced"/"returned verbatim" language.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ClientInput(_) => 400,
            Self::AuthenticationMaster => 401,
            Self::NoKeysAvailable => 503,
            Self::UpstreamApiKey { status, .. } => *status,
            Self::UpstreamServer { status, .. } => *status,
            Self::UpstreamTimeout(_) => 504,
            Self::UpstreamOther { status, .. } => *status,
            Self::MaxRetriesExceeded => 500,
            Self::Config(_) => 500,
            Self::Persistence(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// The `type` field of the `{error: {message, type}}` body (§6).
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ClientInput(_) => "invalid_request_error",
            Self::AuthenticationMaster => "authentication_error",
            Self::NoKeysAvailable => "no_key_available",
            Self::UpstreamApiKey { .. } => "ApiKeyError",
            Self::UpstreamServer { .. } => "UpstreamServerError",
            Self::UpstreamTimeout(_) => "UpstreamTimeoutError",
            Self::UpstreamOther { .. } => "UpstreamError",
            Self::MaxRetriesExceeded => "internal_error",
            Self::Config(_) => "internal_error",
            Self::Persistence(_) => "internal_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The `RequestLog.errorType` this failure should be recorded under,
    /// or `None` for the two variants §7 excludes from that enum
    /// (no key was ever consumed, so there is nothing upstream to
    /// classify).
    pub fn request_error_type(&self) -> Option<RequestLogErrorType> {
        match self {
            Self::ClientInput(_) => Some(RequestLogErrorType::InvalidRequestError),
            Self::AuthenticationMaster => None,
            Self::NoKeysAvailable => None,
            Self::UpstreamApiKey { .. } => Some(RequestLogErrorType::ApiKeyError),
            Self::UpstreamServer { .. } => Some(RequestLogErrorType::UpstreamServerError),
            Self::UpstreamTimeout(_) => Some(RequestLogErrorType::UpstreamTimeoutError),
            Self::UpstreamOther { .. } => Some(RequestLogErrorType::UpstreamError),
            Self::MaxRetriesExceeded => Some(RequestLogErrorType::MaxRetriesExceeded),
            Self::Config(_) | Self::Persistence(_) | Self::Internal(_) => None,
        }
    }

    /// Whether the Proxy Pipeline's retry loop should attempt this error
    /// again, independent of the 429/5xx-specific logic in §4.5 step 5e
    /// (which also factors in `wasRateLimit` from `markKeyError`).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamApiKey { status: 429, .. }
                | Self::UpstreamServer { .. }
                | Self::UpstreamTimeout(_)
        )
    }

    pub fn client_input(msg: impl Into<String>) -> Self {
        Self::ClientInput(msg.into())
    }

    pub fn upstream_api_key(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamApiKey { status, message: message.into() }
    }

    pub fn upstream_server(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamServer { status, message: message.into() }
    }

    pub fn upstream_other(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamOther { status, message: message.into() }
    }

    /// Classify a caught upstream status/message pair per §4.5's
    /// "Error classification" rule.
    pub fn classify_upstream(status: u16, message: impl Into<String>, timed_out: bool) -> Self {
        let message = message.into();
        if timed_out || message.to_lowercase().contains("timeout") {
            return Self::UpstreamTimeout(message);
        }
        match status {
            401 | 403 | 429 => Self::upstream_api_key(status, message),
            s if s >= 500 => Self::upstream_server(s, message),
            s => Self::upstream_other(s, message),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmProxyError>;
