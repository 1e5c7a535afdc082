use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Notifications from the playback element, delivered over the channel that
/// was handed to the controller together with the element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementEvent {
    /// Enough data is buffered to start playback.
    CanPlay,
    Error { message: String },
    Ended,
    TimeUpdate { position_secs: f64 },
    DurationChange { duration_secs: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementError {
    /// Playback was refused, e.g. by an autoplay policy.
    #[error("play rejected: {0}")]
    Rejected(String),

    #[error("no source attached")]
    NoSource,

    #[error("{0}")]
    Failed(String),
}

/// The audio element the controller drives.
///
/// After `clear_source` returns the element must not emit further events for
/// the previous source.
#[async_trait]
pub trait PlaybackElement: Send + 'static {
    async fn set_source(&mut self, url: &Url) -> Result<(), ElementError>;

    async fn clear_source(&mut self);

    /// Begin (re)loading the current source. With no source this resets the element.
    async fn load(&mut self);

    async fn play(&mut self) -> Result<(), ElementError>;

    async fn pause(&mut self);

    async fn seek(&mut self, position_secs: f64) -> Result<(), ElementError>;

    /// `volume` is already clamped to `0.0..=1.0`.
    async fn set_volume(&mut self, volume: f32);

    async fn set_muted(&mut self, muted: bool);
}
