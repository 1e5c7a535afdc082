use std::net::SocketAddr;
use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("upstream sent no response headers within {}s for {url}", .timeout.as_secs())]
    UpstreamTimeout { url: String, timeout: Duration },

    #[error("upstream unavailable for {url}: {source}")]
    UpstreamUnavailable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned HTTP {status} for {url}")]
    UpstreamStatus { status: StatusCode, url: String },

    #[error("failed to bind proxy listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid range `{value}`")]
    InvalidRange { value: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl ProxyError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_range(value: impl Into<String>) -> Self {
        Self::InvalidRange {
            value: value.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether a fresh attempt against the same origin could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpstreamTimeout { .. } | Self::UpstreamUnavailable { .. } => true,
            Self::UpstreamStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidUrl { .. }
            | Self::BindFailed { .. }
            | Self::InvalidRange { .. }
            | Self::Configuration { .. } => false,
        }
    }
}
