//! Collaborator seams used by the controller.
//!
//! The catalog API, the credential source and the proxy are all injected as
//! trait objects so the controller can be driven by in-memory fakes in tests.

use async_trait::async_trait;
use media_proxy::{CredentialHeaders, ProxyError, StreamingProxy};
use url::Url;

use crate::error::ApiError;
use crate::media::{CatalogItem, FavoritePage};

/// Remote catalog operations. Every method may fail or hang; callers wrap
/// them in the retry client.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Resolve a short-lived direct stream URL for one item or part.
    async fn resolve_media_url(
        &self,
        catalog_id: &str,
        part_index: Option<u32>,
    ) -> Result<String, ApiError>;

    async fn resolve_catalog_item(&self, catalog_id: &str) -> Result<CatalogItem, ApiError>;

    /// `page` is 1-based.
    async fn list_favorite_page(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<FavoritePage, ApiError>;

    /// Parts of a multi-part item, in order. A single-part item yields one entry.
    async fn list_episodes(&self, catalog_id: &str) -> Result<Vec<CatalogItem>, ApiError>;

    /// Entries of the series containing `catalog_id`. Empty when it belongs to none.
    async fn list_series(&self, catalog_id: &str) -> Result<Vec<CatalogItem>, ApiError>;

    /// Fetch an image and return it as a `data:` URL.
    async fn fetch_image(&self, url: &str) -> Result<String, ApiError>;
}

/// Supplies the session credentials attached to upstream media requests.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential_headers(&self) -> CredentialHeaders;
}

/// Fixed credentials, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(CredentialHeaders);

impl StaticCredentials {
    pub fn new(headers: CredentialHeaders) -> Self {
        Self(headers)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential_headers(&self) -> CredentialHeaders {
        self.0.clone()
    }
}

/// Opens a local URL that serves one remote stream.
#[async_trait]
pub trait MediaProxy: Send + Sync {
    async fn open_proxy(
        &self,
        remote_url: &str,
        credentials: CredentialHeaders,
    ) -> Result<Url, ProxyError>;

    /// Release every open session.
    fn close_all(&self);
}

#[async_trait]
impl MediaProxy for StreamingProxy {
    async fn open_proxy(
        &self,
        remote_url: &str,
        credentials: CredentialHeaders,
    ) -> Result<Url, ProxyError> {
        StreamingProxy::open_proxy(self, remote_url, credentials)
            .await
            .map(|session| session.base_url)
    }

    fn close_all(&self) {
        StreamingProxy::close_all(self);
    }
}
