use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::CatalogApi;
use crate::error::PlaybackError;
use crate::retry::{self, RetryPolicy};

/// Fetches cover art through the retry client and returns `data:` URLs.
#[derive(Clone)]
pub struct ImageResolver {
    api: Arc<dyn CatalogApi>,
    policy: RetryPolicy,
}

impl ImageResolver {
    pub fn new(api: Arc<dyn CatalogApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    pub async fn resolve(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<String, PlaybackError> {
        if url.starts_with("data:") {
            return Ok(url.to_string());
        }

        debug!(url, "Resolving image");
        retry::execute(&self.policy, token, |_| self.api.fetch_image(url))
            .await
            .map_err(PlaybackError::from)
    }
}
