use serde::Serialize;

use crate::media::{CatalogItem, MediaReference};

/// Lifecycle of the current track.
///
/// ```text
/// Idle -> Loading -> Playing <-> Paused
///            |                     |
///            v                     v (natural end)
///          Failed --(select)---> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Failed,
}

impl PlayerPhase {
    /// `Playing` or `Paused`: a source is attached and playable.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

/// Snapshot published to observers on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackState {
    pub phase: PlayerPhase,
    pub is_playing: bool,
    pub is_loading: bool,
    pub current_time_secs: f64,
    pub duration_secs: f64,
    pub volume: f32,
    pub is_muted: bool,
    pub current_item: Option<CatalogItem>,
    /// Set once the media URL for `current_item` is resolved.
    pub active_media: Option<MediaReference>,
    /// Cover image of `current_item` as a `data:` URL.
    pub cover: Option<String>,
    pub last_error: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            phase: PlayerPhase::Idle,
            is_playing: false,
            is_loading: false,
            current_time_secs: 0.0,
            duration_secs: 0.0,
            volume: 1.0,
            is_muted: false,
            current_item: None,
            active_media: None,
            cover: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    TrackStarted { item: CatalogItem, local_url: String },
    TrackEnded { item: CatalogItem },
    LoadFailed { item: CatalogItem, message: String },
    /// The track is loaded but `play()` was refused; it stays paused.
    PlayRejected { item: CatalogItem, message: String },
    /// Natural end reached with nothing left to play.
    QueueExhausted,
}
