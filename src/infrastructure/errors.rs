//! Error taxonomy of the relay

use std::time::Duration;
use thiserror::Error;

/// Failures talking to the upstream inference server.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream could not be reached at all.
    #[error("failed to connect to upstream: {0}")]
    Connection(String),
    /// The upstream answered with a non-success status.
    #[error("upstream returned non-success status {status}: {body}")]
    Upstream { status: u16, body: String },
    /// The response body broke off while streaming.
    #[error("upstream stream failed: {0}")]
    Stream(String),
    /// No bytes arrived within the configured idle timeout.
    #[error("upstream stream stalled for {0:?}")]
    Stalled(Duration),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            RelayError::Upstream {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else if error.is_connect() || error.is_timeout() || error.is_request() {
            RelayError::Connection(error.to_string())
        } else if error.is_decode() {
            RelayError::InvalidResponse(error.to_string())
        } else {
            RelayError::Stream(error.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}
