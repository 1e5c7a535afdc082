use serde::{Deserialize, Serialize};

/// One playable unit: a whole video, or one part of a multi-part video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub catalog_id: String,
    /// 1-based part number inside a multi-part item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_index: Option<u32>,
    pub title: String,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl CatalogItem {
    pub fn new(catalog_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            part_index: None,
            title: title.into(),
            duration_secs: 0,
            cover_url: None,
        }
    }

    pub fn with_part(mut self, part_index: u32) -> Self {
        self.part_index = Some(part_index);
        self
    }

    pub fn with_duration(mut self, duration_secs: u64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    pub fn with_cover(mut self, cover_url: impl Into<String>) -> Self {
        self.cover_url = Some(cover_url.into());
        self
    }

    /// Two items are the same track when catalog id and part agree.
    /// A missing part index means the first part.
    pub fn same_track(&self, other: &CatalogItem) -> bool {
        self.catalog_id == other.catalog_id
            && self.part_index.unwrap_or(1) == other.part_index.unwrap_or(1)
    }
}

/// A resolved, directly fetchable stream for one catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub catalog_id: String,
    pub part_index: Option<u32>,
    pub remote_url: String,
}

/// One page of a favorites collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritePage {
    pub items: Vec<CatalogItem>,
    pub has_more: bool,
}
