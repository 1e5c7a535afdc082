use std::time::Duration;

use thiserror::Error;

use crate::element::ElementError;
use crate::retry::RetryError;

/// Failure reported by the external catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The platform answered, but with a non-success payload (missing
    /// permissions, invalid identifier, region lock...).
    #[error("resolution failed (code {code}): {message}")]
    ResolutionFailed { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn resolution_failed(code: i64, message: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the playback controller and its handle.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio did not become playable within {}s", .timeout.as_secs())]
    AudioLoadTimeout { timeout: Duration },

    #[error("audio failed to load: {message}")]
    AudioLoadError { message: String },

    #[error("gave up after {attempts} attempts: {message}")]
    ExhaustedRetries { attempts: u32, message: String },

    #[error("failed to open media proxy: {message}")]
    ProxyFailed { message: String },

    /// `play()` was refused, e.g. by an autoplay policy. Not fatal.
    #[error("playback was rejected: {message}")]
    PlayRejected { message: String },

    #[error("no track is ready for playback")]
    NotReady,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("playback element error: {0}")]
    Element(#[from] ElementError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("playback controller is no longer running")]
    Closed,
}

impl<E: std::fmt::Display> From<RetryError<E>> for PlaybackError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::ExhaustedRetries { attempts, last } => Self::ExhaustedRetries {
                attempts,
                message: last.to_string(),
            },
        }
    }
}
