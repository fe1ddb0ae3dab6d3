use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use switchyard_config::ProviderType;
use switchyard_core::HttpError;
use thiserror::Error;

use crate::convert::ConvertError;
use crate::protocol::Protocol;

/// Coarse failure class reported to clients and observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential rejected upstream
    Auth,
    /// Network failure, timeout, 5xx or rate limit
    Transport,
    /// Upstream spoke a shape the gateway could not decode
    Protocol,
    /// Every eligible credential was tried
    PoolExhausted,
    /// Client request could not be converted
    InvalidRequest,
    /// Gateway misconfiguration
    Configuration,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::PoolExhausted => "pool_exhausted",
            Self::InvalidRequest => "invalid_request",
            Self::Configuration => "configuration",
        }
    }

    /// Machine-readable error type used in response bodies
    pub const fn error_type(self) -> &'static str {
        match self {
            Self::Auth => "authentication_error",
            Self::Transport => "upstream_error",
            Self::Protocol => "protocol_error",
            Self::PoolExhausted => "pool_exhausted_error",
            Self::InvalidRequest => "invalid_request_error",
            Self::Configuration => "configuration_error",
        }
    }
}

/// Failure of a single provider call
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 401/403 or an equivalent in-band signal
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// 429 from upstream
    #[error("rate limited: {message}")]
    RateLimited {
        /// Parsed `retry-after`
        retry_after: Option<Duration>,
        /// Upstream message
        message: String,
    },

    /// Connection failure, 408 or 5xx
    #[error("transport failure: {0}")]
    Transport(String),

    /// No response within the request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected status or undecodable body
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited { .. } | Self::Transport(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Whether the call may be retried on the same credential
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Map a non-success upstream status onto a provider error
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let message = if body.is_empty() {
        format!("provider returned {status}")
    } else {
        format!("provider returned {status}: {body}")
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after, message },
        StatusCode::REQUEST_TIMEOUT => ProviderError::Transport(message),
        status if status.is_server_error() => ProviderError::Transport(message),
        _ => ProviderError::Protocol(message),
    }
}

/// Parse a `retry-after` header given in seconds
pub fn parse_retry_after(headers: &http::HeaderMap) -> Option<Duration> {
    headers
        .get(http::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Errors surfaced to gateway callers
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Every credential of every provider in the chain failed
    #[error("credentials exhausted for {provider} after {attempts} attempts{}", last_error_suffix(.last_error.as_ref()))]
    Exhausted {
        /// Primary provider of the exchange
        provider: ProviderType,
        /// Whether providers beyond the primary were tried
        fallback_attempted: bool,
        /// Provider calls made
        attempts: u32,
        /// Last failure seen, if any call was made
        last_error: Option<ProviderError>,
    },

    /// Upstream returned something that does not fit its protocol
    #[error("provider {provider} returned an unexpected response: {message}")]
    Protocol {
        /// Provider that produced the response
        provider: ProviderType,
        /// Decode failure
        message: String,
    },

    /// Client request could not be converted
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ConvertError),

    /// No converter pair exists for this route
    #[error("cannot convert {from} requests for {to} providers")]
    UnsupportedRoute {
        /// Client protocol
        from: Protocol,
        /// Provider protocol
        to: Protocol,
    },

    /// `model-provider` header names no known provider
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    /// Gateway misconfiguration
    #[error("configuration error: {0}")]
    Configuration(String),
}

fn last_error_suffix(last_error: Option<&ProviderError>) -> String {
    last_error.map_or_else(String::new, |error| format!(": {error}"))
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { last_error, .. } => last_error.as_ref().map_or(ErrorKind::PoolExhausted, ProviderError::kind),
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::InvalidRequest(_) | Self::UnsupportedRoute { .. } | Self::UnknownProvider(_) => ErrorKind::InvalidRequest,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

impl HttpError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Exhausted { last_error, .. } => match last_error {
                None => StatusCode::SERVICE_UNAVAILABLE,
                Some(ProviderError::RateLimited { .. }) => StatusCode::TOO_MANY_REQUESTS,
                Some(ProviderError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                Some(_) => StatusCode::BAD_GATEWAY,
            },
            Self::Protocol { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) | Self::UnsupportedRoute { .. } | Self::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Exhausted {
                last_error: Some(ProviderError::RateLimited { .. }),
                ..
            } => "rate_limit_error",
            Self::Exhausted {
                last_error: Some(ProviderError::Timeout(_)),
                ..
            } => "timeout_error",
            other => other.kind().error_type(),
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Configuration(_) => "the gateway is misconfigured".to_owned(),
            other => other.to_string(),
        }
    }

    fn error_kind(&self) -> Option<&'static str> {
        Some(self.kind().as_str())
    }

    fn fallback_attempted(&self) -> bool {
        matches!(
            self,
            Self::Exhausted {
                fallback_attempted: true,
                ..
            }
        )
    }
}
