//! # playback-session
//!
//! Drives an audio element through track selection, media URL resolution,
//! proxy attachment and queue advancement.
//!
//! ```text
//! select(item) ─► resolve_media_url (retry) ─► open_proxy ─► element.set_source
//!                                                         │
//!        TrackStarted ◄── play() ◄── CanPlay ◄────────────┘
//! ```
//!
//! - [`PlaybackController`] is the actor; [`PlaybackHandle`] is its cloneable front end.
//! - [`retry::execute`] runs any remote operation with a per-attempt deadline,
//!   exponential backoff and cancellation.
//! - [`QueueNavigator`] decides what plays next: the parts of a multi-part item,
//!   a series, or the favorites page the item came from.

pub mod api;
pub mod config;
pub mod controller;
pub mod element;
pub mod error;
pub mod image;
pub mod media;
pub mod queue;
pub mod retry;
pub mod state;

pub use api::{CatalogApi, CredentialProvider, MediaProxy, StaticCredentials};
pub use config::PlaybackConfig;
pub use controller::{PlaybackController, PlaybackHandle, PlaybackServices};
pub use element::{ElementError, ElementEvent, PlaybackElement};
pub use error::{ApiError, PlaybackError};
pub use image::ImageResolver;
pub use media::{CatalogItem, FavoritePage, MediaReference};
pub use queue::{FlatPage, QueueContext, QueueNavigator};
pub use retry::{AttemptError, RetryError, RetryPolicy};
pub use state::{PlaybackEvent, PlaybackState, PlayerPhase};
