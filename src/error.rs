//! Mimir error types
//!
//! One taxonomy shared by every provider, so callers can handle failures the
//! same way whichever backing store served the request. HTTP statuses are
//! mapped in exactly one place, [`MimirError::from_status`].

use std::time::Duration;

/// Mimir error types
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    // Input errors (never retried)
    #[error("[{provider}] invalid input: {message}")]
    Validation {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    // Credential errors (never retried)
    #[error("[{provider}] authentication failed")]
    Auth {
        provider: String,
        status: Option<u16>,
    },

    #[error("[{provider}] permission denied")]
    Permission {
        provider: String,
        status: Option<u16>,
    },

    #[error("[{provider}] not found: {what}")]
    NotFound {
        provider: String,
        status: Option<u16>,
        what: String,
    },

    // Backpressure
    #[error("[{provider}] rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    /// Short-circuited by the circuit breaker; no request was sent.
    #[error("[{provider}] circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        provider: String,
        retry_after: Option<Duration>,
    },

    // Transport errors (retried)
    #[error("[{provider}] network error: {message}")]
    Network { provider: String, message: String },

    #[error("[{provider}] request timed out after {elapsed:?}")]
    Timeout {
        provider: String,
        elapsed: Option<Duration>,
    },

    #[error("[{provider}] provider error ({status:?}): {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    // Local errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MimirError {
    /// Map a non-success HTTP status to the shared taxonomy.
    ///
    /// 400→Validation, 401→Auth, 403→Permission, 404→NotFound,
    /// 429→RateLimited, 5xx→Provider. Other 4xx codes are input problems
    /// and map to Validation; anything else is a Provider error.
    pub fn from_status(
        provider: &str,
        status: u16,
        retry_after: Option<Duration>,
        message: impl Into<String>,
    ) -> Self {
        let provider = provider.to_owned();
        let message = message.into();
        match status {
            401 => Self::Auth {
                provider,
                status: Some(status),
            },
            403 => Self::Permission {
                provider,
                status: Some(status),
            },
            404 => Self::NotFound {
                provider,
                status: Some(status),
                what: message,
            },
            429 => Self::RateLimited {
                provider,
                status: Some(status),
                retry_after,
            },
            400..=499 => Self::Validation {
                provider,
                status: Some(status),
                message,
            },
            _ => Self::Provider {
                provider,
                status: Some(status),
                message,
            },
        }
    }

    /// Map a `reqwest` failure by its error type.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                provider: provider.to_owned(),
                elapsed: None,
            };
        }
        if let Some(status) = err.status() {
            return Self::from_status(provider, status.as_u16(), None, err.to_string());
        }
        if err.is_decode() {
            return Self::Provider {
                provider: provider.to_owned(),
                status: None,
                message: format!("malformed response body: {err}"),
            };
        }
        Self::Network {
            provider: provider.to_owned(),
            message: err.to_string(),
        }
    }

    /// Shorthand for a provider-scoped validation failure.
    pub fn validation(provider: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            provider: provider.to_owned(),
            status: None,
            message: message.into(),
        }
    }

    /// Whether the error is worth retrying.
    ///
    /// Connection failures, timeouts, remote rate limiting and 5xx replies
    /// are transient. Input, credential and not-found errors are terminal,
    /// and so is a short-circuit from the local circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::Provider { .. }
        )
    }

    /// Remote or local backoff hint, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Provider the error originated from, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Validation { provider, .. }
            | Self::Auth { provider, .. }
            | Self::Permission { provider, .. }
            | Self::NotFound { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::CircuitOpen { provider, .. }
            | Self::Network { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Provider { provider, .. } => Some(provider),
            Self::Configuration(_) | Self::Cache(_) | Self::Io(_) | Self::Json(_) => None,
        }
    }

    /// HTTP status code that produced the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Validation { status, .. }
            | Self::Auth { status, .. }
            | Self::Permission { status, .. }
            | Self::NotFound { status, .. }
            | Self::RateLimited { status, .. }
            | Self::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Auth { .. } => "auth",
            Self::Permission { .. } => "permission",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limit",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Provider { .. } => "provider",
            Self::Configuration(_) => "configuration",
            Self::Cache(_) => "cache",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
