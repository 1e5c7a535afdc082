use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use media_proxy::{CredentialHeaders, DEFAULT_USER_AGENT};
use parking_lot::Mutex;
use playback_session::{ApiError, CatalogApi, CatalogItem, FavoritePage};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::models::{Envelope, FavoriteListData, PlayUrlData, ViewData};

pub const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
pub const DEFAULT_REFERER: &str = "https://www.bilibili.com";
pub const DEFAULT_PAGE_SIZE: u32 = 20;

const FAVORITES_PATH: &str = "/x/v3/fav/resource/list";
const VIEW_PATH: &str = "/x/web-interface/view";
const PLAY_URL_PATH: &str = "/x/player/playurl";
/// `fnval=16` requests DASH, which carries separate audio tracks.
const FNVAL_DASH: &str = "16";
const VIEW_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub api_base: String,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// [`CatalogApi`] over the platform's web API.
///
/// Item metadata (`/x/web-interface/view`) is cached per item so that the
/// episode and series lookups done on every track change cost one request.
/// Play URLs are never cached; they expire.
pub struct CatalogClient {
    client: Client,
    api_base: Url,
    page_size: u32,
    views: Mutex<HashMap<String, Arc<ViewData>>>,
}

fn transport_error(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

fn check_status(status: StatusCode, what: &str) -> Result<(), ApiError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        return Err(ApiError::Transport(format!("{what} returned HTTP {status}")));
    }
    Ok(())
}

impl CatalogClient {
    pub fn new(config: CatalogConfig, credentials: &CredentialHeaders) -> Result<Self, ApiError> {
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| ApiError::Decode(format!("invalid API base {:?}: {e}", config.api_base)))?;

        let mut headers = HeaderMap::new();
        credentials.apply_to(&mut headers);
        if !headers.contains_key(header::REFERER) {
            headers.insert(header::REFERER, HeaderValue::from_static(DEFAULT_REFERER));
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(transport_error)?;

        Ok(Self {
            client,
            api_base,
            page_size: config.page_size.max(1),
            views: Mutex::new(HashMap::new()),
        })
    }

    async fn get_api<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self
            .api_base
            .join(path)
            .map_err(|e| ApiError::Decode(format!("invalid API path {path}: {e}")))?;

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status(), path)?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{path}: {e}")))?;
        debug!(path, code = envelope.code, "Catalog response");

        if envelope.code != 0 {
            return Err(ApiError::resolution_failed(envelope.code, envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| ApiError::Decode(format!("{path}: response carried no data")))
    }

    async fn view(&self, bvid: &str) -> Result<Arc<ViewData>, ApiError> {
        let cached = self.views.lock().get(bvid).cloned();
        if let Some(view) = cached {
            return Ok(view);
        }

        let view: ViewData = self
            .get_api(VIEW_PATH, &[("bvid", bvid.to_string())])
            .await?;
        let view = Arc::new(view);

        let mut views = self.views.lock();
        if views.len() >= VIEW_CACHE_CAPACITY {
            views.clear();
        }
        views.insert(bvid.to_string(), view.clone());
        Ok(view)
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn resolve_media_url(
        &self,
        catalog_id: &str,
        part_index: Option<u32>,
    ) -> Result<String, ApiError> {
        let view = self.view(catalog_id).await?;
        let wanted = part_index.unwrap_or(1);
        let cid = view
            .pages
            .iter()
            .find(|p| p.page == wanted)
            .map(|p| p.cid)
            .ok_or_else(|| ApiError::NotFound(format!("{catalog_id} has no part {wanted}")))?;

        let data: PlayUrlData = self
            .get_api(
                PLAY_URL_PATH,
                &[
                    ("bvid", catalog_id.to_string()),
                    ("cid", cid.to_string()),
                    ("fnval", FNVAL_DASH.to_string()),
                ],
            )
            .await?;

        let url = data
            .best_audio_url()
            .ok_or_else(|| ApiError::NotFound(format!("no playable stream for {catalog_id}")))?;
        debug!(catalog_id, cid, "Resolved media URL");
        Ok(url)
    }

    async fn resolve_catalog_item(&self, catalog_id: &str) -> Result<CatalogItem, ApiError> {
        let view = self.view(catalog_id).await?;
        let mut item = CatalogItem::new(view.bvid.clone(), view.title.clone())
            .with_duration(view.duration);
        item.cover_url = view.pic.clone();
        Ok(item)
    }

    async fn list_favorite_page(
        &self,
        collection_id: &str,
        page: u32,
    ) -> Result<FavoritePage, ApiError> {
        let data: FavoriteListData = self
            .get_api(
                FAVORITES_PATH,
                &[
                    ("media_id", collection_id.to_string()),
                    ("pn", page.max(1).to_string()),
                    ("ps", self.page_size.to_string()),
                    ("platform", "web".to_string()),
                ],
            )
            .await?;

        let items = data
            .medias
            .unwrap_or_default()
            .into_iter()
            .map(|m| CatalogItem {
                catalog_id: m.bvid,
                part_index: None,
                title: m.title,
                duration_secs: m.duration,
                cover_url: m.cover,
            })
            .collect();

        Ok(FavoritePage {
            items,
            has_more: data.has_more,
        })
    }

    async fn list_episodes(&self, catalog_id: &str) -> Result<Vec<CatalogItem>, ApiError> {
        let view = self.view(catalog_id).await?;
        Ok(view
            .pages
            .iter()
            .map(|p| CatalogItem {
                catalog_id: view.bvid.clone(),
                part_index: Some(p.page),
                title: if p.part.is_empty() {
                    view.title.clone()
                } else {
                    p.part.clone()
                },
                duration_secs: p.duration,
                cover_url: view.pic.clone(),
            })
            .collect())
    }

    async fn list_series(&self, catalog_id: &str) -> Result<Vec<CatalogItem>, ApiError> {
        let view = self.view(catalog_id).await?;
        let Some(season) = view.ugc_season.as_ref() else {
            return Ok(Vec::new());
        };

        Ok(season
            .sections
            .iter()
            .flat_map(|s| s.episodes.iter())
            .map(|e| CatalogItem {
                catalog_id: e.bvid.clone(),
                part_index: None,
                title: e.title.clone(),
                duration_secs: e.arc.as_ref().map_or(0, |a| a.duration),
                cover_url: e.arc.as_ref().and_then(|a| a.pic.clone()),
            })
            .collect())
    }

    async fn fetch_image(&self, url: &str) -> Result<String, ApiError> {
        // Covers are often protocol-relative.
        let url = match url.strip_prefix("//") {
            Some(rest) => format!("https://{rest}"),
            None => url.to_string(),
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status(), &url)?;

        let mime = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
            .filter(|m| m.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await.map_err(transport_error)?;

        Ok(format!(
            "data:{mime};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ))
    }
}
