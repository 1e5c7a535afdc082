//! Queue context and next/previous navigation.
//!
//! Every selected track is placed in exactly one context: the parts of a
//! multi-part item, the entries of a series, or the favorites page it was
//! picked from. Lookup order is episodes first, then series, then the page.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::CatalogApi;
use crate::error::PlaybackError;
use crate::media::CatalogItem;
use crate::retry::{self, RetryPolicy};

/// A loaded page of a favorites collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatPage {
    pub collection_id: String,
    pub items: Vec<CatalogItem>,
    pub has_more: bool,
    /// 1-based.
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueContext {
    FlatPage(FlatPage),
    EpisodeSet {
        items: Vec<CatalogItem>,
        current_index: usize,
    },
    SeriesSet {
        items: Vec<CatalogItem>,
        current_index: usize,
    },
}

impl QueueContext {
    pub fn items(&self) -> &[CatalogItem] {
        match self {
            Self::FlatPage(page) => &page.items,
            Self::EpisodeSet { items, .. } | Self::SeriesSet { items, .. } => items,
        }
    }
}

/// Find the context a track belongs to, ignoring the favorites page.
///
/// Lookup failures are treated as "no match".
pub async fn lookup_context(api: &dyn CatalogApi, item: &CatalogItem) -> Option<QueueContext> {
    match api.list_episodes(&item.catalog_id).await {
        Ok(parts) if parts.len() > 1 => {
            let current_index = parts.iter().position(|p| p.same_track(item)).unwrap_or(0);
            return Some(QueueContext::EpisodeSet {
                items: parts,
                current_index,
            });
        }
        Ok(_) => {}
        Err(e) => debug!(catalog_id = %item.catalog_id, error = %e, "Episode lookup failed"),
    }

    match api.list_series(&item.catalog_id).await {
        Ok(entries) => {
            let current_index = entries
                .iter()
                .position(|e| e.catalog_id == item.catalog_id)?;
            Some(QueueContext::SeriesSet {
                items: entries,
                current_index,
            })
        }
        Err(e) => {
            debug!(catalog_id = %item.catalog_id, error = %e, "Series lookup failed");
            None
        }
    }
}

fn locate(items: &[CatalogItem], current: &CatalogItem) -> Option<usize> {
    items.iter().position(|i| i.same_track(current))
}

pub struct QueueNavigator {
    favorites: Option<FlatPage>,
    context: Option<QueueContext>,
    page_retry: RetryPolicy,
}

impl QueueNavigator {
    pub fn new(page_retry: RetryPolicy) -> Self {
        Self {
            favorites: None,
            context: None,
            page_retry,
        }
    }

    /// Remember the favorites page the user is browsing.
    pub fn set_favorites(&mut self, page: FlatPage) {
        self.favorites = Some(page);
    }

    pub fn favorites(&self) -> Option<&FlatPage> {
        self.favorites.as_ref()
    }

    pub fn context(&self) -> Option<&QueueContext> {
        self.context.as_ref()
    }

    /// Install the context for `item` from a [`lookup_context`] result.
    pub fn apply_lookup(&mut self, item: &CatalogItem, found: Option<QueueContext>) {
        self.context = match found {
            Some(context) => Some(context),
            None => self
                .favorites
                .as_ref()
                .filter(|page| page.items.iter().any(|i| i.same_track(item)))
                .cloned()
                .map(QueueContext::FlatPage),
        };
    }

    /// Point the context at a newly selected `item`.
    ///
    /// An episode or series set that contains the item is kept and
    /// repositioned. Anything else is replaced by the favorites page when it
    /// holds the item, or cleared, until the lookup for the item reports back.
    pub fn retarget(&mut self, item: &CatalogItem) {
        let kept = match self.context.as_mut() {
            Some(
                QueueContext::EpisodeSet {
                    items,
                    current_index,
                }
                | QueueContext::SeriesSet {
                    items,
                    current_index,
                },
            ) => match locate(items, item) {
                Some(index) => {
                    *current_index = index;
                    true
                }
                None => false,
            },
            Some(QueueContext::FlatPage(_)) | None => false,
        };
        if !kept {
            self.apply_lookup(item, None);
        }
    }

    /// The item after `current`.
    ///
    /// At the end of a favorites page with more pages available, the next page
    /// is fetched once and its first item returned.
    pub async fn next(
        &mut self,
        api: &dyn CatalogApi,
        current: &CatalogItem,
        token: &CancellationToken,
    ) -> Result<Option<CatalogItem>, PlaybackError> {
        let Some(context) = self.context.as_mut() else {
            return Ok(None);
        };

        let page = match context {
            QueueContext::EpisodeSet {
                items,
                current_index,
            }
            | QueueContext::SeriesSet {
                items,
                current_index,
            } => {
                let Some(index) = locate(items, current) else {
                    return Ok(None);
                };
                return Ok(items.get(index + 1).cloned().inspect(|_| {
                    *current_index = index + 1;
                }));
            }
            QueueContext::FlatPage(page) => page,
        };

        let Some(index) = page.items.iter().position(|i| i.same_track(current)) else {
            return Ok(None);
        };
        if let Some(next) = page.items.get(index + 1) {
            return Ok(Some(next.clone()));
        }
        if !page.has_more {
            return Ok(None);
        }

        let next_page = page.page + 1;
        info!(collection_id = %page.collection_id, page = next_page, "Fetching next favorites page");
        let collection_id = page.collection_id.clone();
        let fetched = retry::execute(&self.page_retry, token, |_| {
            api.list_favorite_page(&collection_id, next_page)
        })
        .await?;

        let loaded = FlatPage {
            collection_id,
            items: fetched.items,
            has_more: fetched.has_more,
            page: next_page,
        };
        let first = loaded.items.first().cloned();
        *page = loaded.clone();
        self.favorites = Some(loaded);
        Ok(first)
    }

    /// The item before `current`; `None` at the start of the context.
    pub fn previous(&mut self, current: &CatalogItem) -> Option<CatalogItem> {
        match self.context.as_mut()? {
            QueueContext::EpisodeSet {
                items,
                current_index,
            }
            | QueueContext::SeriesSet {
                items,
                current_index,
            } => {
                let index = locate(items, current)?;
                let previous = items.get(index.checked_sub(1)?).cloned()?;
                *current_index = index - 1;
                Some(previous)
            }
            QueueContext::FlatPage(page) => {
                let index = page.items.iter().position(|i| i.same_track(current))?;
                page.items.get(index.checked_sub(1)?).cloned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::media::FavoritePage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeCatalog {
        episodes: HashMap<String, Vec<CatalogItem>>,
        series: HashMap<String, Vec<CatalogItem>>,
        pages: HashMap<u32, FavoritePage>,
        page_requests: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn resolve_media_url(&self, _: &str, _: Option<u32>) -> Result<String, ApiError> {
            Err(ApiError::NotFound("unused".into()))
        }

        async fn resolve_catalog_item(&self, id: &str) -> Result<CatalogItem, ApiError> {
            Err(ApiError::NotFound(id.into()))
        }

        async fn list_favorite_page(&self, _: &str, page: u32) -> Result<FavoritePage, ApiError> {
            self.page_requests.lock().push(page);
            self.pages
                .get(&page)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("page {page}")))
        }

        async fn list_episodes(&self, id: &str) -> Result<Vec<CatalogItem>, ApiError> {
            Ok(self.episodes.get(id).cloned().unwrap_or_default())
        }

        async fn list_series(&self, id: &str) -> Result<Vec<CatalogItem>, ApiError> {
            match self.series.get(id) {
                Some(entries) => Ok(entries.clone()),
                None => Err(ApiError::resolution_failed(-404, "no series")),
            }
        }

        async fn fetch_image(&self, url: &str) -> Result<String, ApiError> {
            Err(ApiError::NotFound(url.into()))
        }
    }

    fn item(id: &str) -> CatalogItem {
        CatalogItem::new(id, id)
    }

    fn page(items: &[&str], has_more: bool, number: u32) -> FlatPage {
        FlatPage {
            collection_id: "fav".into(),
            items: items.iter().map(|id| item(id)).collect(),
            has_more,
            page: number,
        }
    }

    fn navigator_on(flat: FlatPage, current: &CatalogItem) -> QueueNavigator {
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.set_favorites(flat);
        nav.apply_lookup(current, None);
        nav
    }

    #[tokio::test]
    async fn flat_page_advances_within_page() {
        let api = FakeCatalog::default();
        let mut nav = navigator_on(page(&["a", "b", "c"], false, 1), &item("a"));
        let token = CancellationToken::new();

        let next = nav.next(&api, &item("a"), &token).await.unwrap();
        assert_eq!(next.unwrap().catalog_id, "b");
        assert!(api.page_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn end_of_page_fetches_next_page_once() {
        let mut api = FakeCatalog::default();
        api.pages.insert(
            2,
            FavoritePage {
                items: vec![item("d"), item("e")],
                has_more: false,
            },
        );
        let mut nav = navigator_on(page(&["a", "b", "c"], true, 1), &item("c"));
        let token = CancellationToken::new();

        let next = nav.next(&api, &item("c"), &token).await.unwrap();

        assert_eq!(next.unwrap().catalog_id, "d");
        assert_eq!(*api.page_requests.lock(), vec![2]);
        assert_eq!(nav.favorites().unwrap().page, 2);
        assert!(matches!(nav.context(), Some(QueueContext::FlatPage(p)) if p.page == 2));
    }

    #[tokio::test]
    async fn end_of_last_page_has_no_next() {
        let api = FakeCatalog::default();
        let mut nav = navigator_on(page(&["a", "b"], false, 3), &item("b"));
        let token = CancellationToken::new();

        assert_eq!(nav.next(&api, &item("b"), &token).await.unwrap(), None);
        assert!(api.page_requests.lock().is_empty());
    }

    #[test]
    fn previous_at_start_is_none() {
        let mut nav = navigator_on(page(&["a", "b"], false, 1), &item("a"));
        assert_eq!(nav.previous(&item("a")), None);
        assert_eq!(nav.previous(&item("b")).unwrap().catalog_id, "a");
    }

    #[tokio::test]
    async fn lookup_prefers_episodes_over_series() {
        let mut api = FakeCatalog::default();
        let parts = vec![
            item("BV1").with_part(1),
            item("BV1").with_part(2),
            item("BV1").with_part(3),
        ];
        api.episodes.insert("BV1".into(), parts);
        api.series.insert("BV1".into(), vec![item("BV0"), item("BV1")]);

        let found = lookup_context(&api, &item("BV1").with_part(2)).await;
        assert!(matches!(
            found,
            Some(QueueContext::EpisodeSet { current_index: 1, ref items }) if items.len() == 3
        ));
    }

    #[tokio::test]
    async fn lookup_falls_back_to_series() {
        let mut api = FakeCatalog::default();
        api.episodes.insert("BV2".into(), vec![item("BV2").with_part(1)]);
        api.series
            .insert("BV2".into(), vec![item("BV1"), item("BV2"), item("BV3")]);

        let found = lookup_context(&api, &item("BV2")).await;
        assert!(matches!(found, Some(QueueContext::SeriesSet { current_index: 1, .. })));
    }

    #[tokio::test]
    async fn lookup_without_match_uses_favorites_page() {
        let api = FakeCatalog::default();
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.set_favorites(page(&["a", "b"], false, 1));

        let found = lookup_context(&api, &item("b")).await;
        assert!(found.is_none());
        nav.apply_lookup(&item("b"), found);
        assert!(matches!(nav.context(), Some(QueueContext::FlatPage(_))));

        nav.apply_lookup(&item("zzz"), None);
        assert!(nav.context().is_none());
    }

    #[tokio::test]
    async fn episode_set_walks_parts_in_order() {
        let api = FakeCatalog::default();
        let parts = vec![item("BV1").with_part(1), item("BV1").with_part(2)];
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.apply_lookup(
            &parts[0],
            Some(QueueContext::EpisodeSet {
                items: parts.clone(),
                current_index: 0,
            }),
        );
        let token = CancellationToken::new();

        let second = nav.next(&api, &parts[0], &token).await.unwrap().unwrap();
        assert_eq!(second.part_index, Some(2));
        assert_eq!(nav.next(&api, &second, &token).await.unwrap(), None);
        assert_eq!(nav.previous(&second).unwrap().part_index, Some(1));
        assert_eq!(nav.previous(&parts[0]), None);
    }

    #[tokio::test]
    async fn stale_episode_set_does_not_answer_for_another_item() {
        let api = FakeCatalog::default();
        let parts = vec![
            item("A").with_part(1),
            item("A").with_part(2),
            item("A").with_part(3),
        ];
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.apply_lookup(
            &parts[0],
            Some(QueueContext::EpisodeSet {
                items: parts.clone(),
                current_index: 0,
            }),
        );
        let token = CancellationToken::new();

        assert_eq!(nav.next(&api, &item("B"), &token).await.unwrap(), None);
        assert_eq!(nav.previous(&item("B")), None);
    }

    #[tokio::test]
    async fn retarget_keeps_a_set_containing_the_new_item() {
        let api = FakeCatalog::default();
        let parts = vec![
            item("A").with_part(1),
            item("A").with_part(2),
            item("A").with_part(3),
        ];
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.apply_lookup(
            &parts[0],
            Some(QueueContext::EpisodeSet {
                items: parts.clone(),
                current_index: 0,
            }),
        );

        // A single-part selection without a part index is part 1.
        nav.retarget(&item("A"));
        assert!(matches!(
            nav.context(),
            Some(QueueContext::EpisodeSet { current_index: 0, .. })
        ));

        let third = item("A").with_part(3);
        nav.retarget(&third);
        assert!(matches!(
            nav.context(),
            Some(QueueContext::EpisodeSet { current_index: 2, .. })
        ));
        let token = CancellationToken::new();
        assert_eq!(nav.next(&api, &third, &token).await.unwrap(), None);
        assert_eq!(nav.previous(&third).unwrap().part_index, Some(2));
    }

    #[test]
    fn retarget_away_from_a_set_falls_back_to_favorites() {
        let parts = vec![item("A").with_part(1), item("A").with_part(2)];
        let mut nav = QueueNavigator::new(RetryPolicy::default());
        nav.set_favorites(page(&["A", "B", "C"], false, 1));
        nav.apply_lookup(
            &parts[0],
            Some(QueueContext::EpisodeSet {
                items: parts.clone(),
                current_index: 0,
            }),
        );

        nav.retarget(&item("B"));
        assert!(matches!(nav.context(), Some(QueueContext::FlatPage(_))));
        assert_eq!(nav.previous(&item("B")).unwrap().catalog_id, "A");

        nav.retarget(&item("Z"));
        assert!(nav.context().is_none());
    }
}
