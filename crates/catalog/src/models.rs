//! Wire models for the platform web API.
//!
//! Only the fields the player needs are declared; everything else is ignored.

use serde::Deserialize;

/// Every endpoint wraps its payload in `{code, message, data}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FavoriteListData {
    #[serde(default)]
    pub medias: Option<Vec<FavoriteMedia>>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FavoriteMedia {
    pub bvid: String,
    pub title: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub cover: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ViewData {
    pub bvid: String,
    pub title: String,
    #[serde(default)]
    pub pic: Option<String>,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub pages: Vec<ViewPage>,
    #[serde(default)]
    pub ugc_season: Option<UgcSeason>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ViewPage {
    pub cid: u64,
    pub page: u32,
    #[serde(default)]
    pub part: String,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UgcSeason {
    #[serde(default)]
    pub sections: Vec<SeasonSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeasonSection {
    #[serde(default)]
    pub episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SeasonEpisode {
    pub bvid: String,
    pub title: String,
    #[serde(default)]
    pub arc: Option<EpisodeArc>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EpisodeArc {
    #[serde(default)]
    pub pic: Option<String>,
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlayUrlData {
    #[serde(default)]
    pub dash: Option<Dash>,
    #[serde(default)]
    pub durl: Option<Vec<Durl>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Dash {
    #[serde(default)]
    pub audio: Option<Vec<DashStream>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashStream {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub bandwidth: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Durl {
    pub url: String,
}

impl PlayUrlData {
    /// Highest-bandwidth DASH audio, else the first progressive URL.
    pub fn best_audio_url(self) -> Option<String> {
        let dash_audio = self
            .dash
            .and_then(|d| d.audio)
            .and_then(|tracks| tracks.into_iter().max_by_key(|t| t.bandwidth))
            .map(|t| t.base_url);
        dash_audio.or_else(|| self.durl.into_iter().flatten().next().map(|d| d.url))
    }
}
