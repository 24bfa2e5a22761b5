// ── Core error types ──
//
// Errors surfaced by the cache layer. Consumers never see reqwest or
// tungstenite types directly; the `From<poolwatch_api::Error>` impl
// translates transport-layer errors into cache-level variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach pool API at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Stream unavailable: {reason}")]
    StreamUnavailable { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Whether a failed fetch with this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout | Self::StreamUnavailable { .. } => true,
            Self::Api { status, .. } => status.is_none_or(|s| s >= 500 || s == 429),
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<poolwatch_api::Error> for CoreError {
    fn from(err: poolwatch_api::Error) -> Self {
        use poolwatch_api::Error as ApiError;

        match err {
            ApiError::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::InvalidBaseUrl(url) => CoreError::Config {
                message: format!("Base URL cannot carry API paths: {url}"),
            },
            ApiError::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            ApiError::Http { status: 404, message } => CoreError::NotFound { resource: message },
            ApiError::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            ApiError::Unauthorized { message } => CoreError::AuthenticationFailed { message },
            ApiError::WebSocketConnect(reason) => CoreError::StreamUnavailable { reason },
            ApiError::WebSocketClosed { code, reason } => CoreError::StreamUnavailable {
                reason: format!("closed with code {code}: {reason}"),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::MalformedResponse { message }
            }
        }
    }
}
