use std::time::Duration;

use crate::retry::RetryPolicy;

/// Log a warning when the element is not playable after this long.
pub const DEFAULT_READY_WARN_AFTER: Duration = Duration::from_secs(5);
/// Fail the load when the element is not playable after this long.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Media URL resolution.
    pub media_retry: RetryPolicy,
    /// Cover images.
    pub image_retry: RetryPolicy,
    /// Favorites page fetches during queue navigation.
    pub page_retry: RetryPolicy,
    pub ready_warn_after: Duration,
    pub ready_timeout: Duration,
    pub initial_volume: f32,
    pub resolve_covers: bool,
    /// Capacity of the command mailbox.
    pub command_buffer: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            media_retry: RetryPolicy::default(),
            image_retry: RetryPolicy::default().with_max_retries(1),
            page_retry: RetryPolicy::default(),
            ready_warn_after: DEFAULT_READY_WARN_AFTER,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            initial_volume: 1.0,
            resolve_covers: true,
            command_buffer: 32,
        }
    }
}

impl PlaybackConfig {
    pub fn with_media_retry(mut self, policy: RetryPolicy) -> Self {
        self.media_retry = policy;
        self
    }

    pub fn with_ready_timeouts(mut self, warn_after: Duration, timeout: Duration) -> Self {
        self.ready_warn_after = warn_after;
        self.ready_timeout = timeout;
        self
    }

    pub fn with_covers(mut self, resolve_covers: bool) -> Self {
        self.resolve_covers = resolve_covers;
        self
    }
}
