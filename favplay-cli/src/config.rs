use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use catalog_client::{CatalogConfig, DEFAULT_API_BASE, DEFAULT_PAGE_SIZE, DEFAULT_REFERER};
use media_proxy::{
    CredentialHeaders, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, ProxyConfig, SupersedePolicy,
    UpstreamConfig,
};
use playback_session::{PlaybackConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_DIR: &str = "favplay";
const CONFIG_FILE: &str = "config.toml";

/// Persistent settings, stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cookie header for the platform (e.g. `SESSDATA=...`)
    pub cookies: Option<String>,
    pub referer: String,
    pub user_agent: String,
    pub api_base: String,
    pub page_size: u32,
    /// Fetch cover art for the now-playing item
    pub covers: bool,
    pub player: PlayerCommand,
    pub proxy: ProxySettings,
    pub playback: PlaybackSettings,
}

/// External player invocation. `{url}`, `{start}` (seconds) and `{volume}`
/// (0-100) are substituted in each argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub supersede: SupersedePolicy,
    pub header_timeout_secs: u64,
    pub max_redirects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_secs: u64,
    pub jitter: bool,
    pub ready_warn_secs: u64,
    pub ready_timeout_secs: u64,
    pub volume: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cookies: None,
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            covers: false,
            player: PlayerCommand::default(),
            proxy: ProxySettings::default(),
            playback: PlaybackSettings::default(),
        }
    }
}

impl Default for PlayerCommand {
    fn default() -> Self {
        let args = [
            "-nodisp",
            "-autoexit",
            "-loglevel",
            "error",
            "-ss",
            "{start}",
            "-volume",
            "{volume}",
            "{url}",
        ];
        Self {
            program: "ffplay".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            supersede: SupersedePolicy::default(),
            header_timeout_secs: UpstreamConfig::default().header_timeout.as_secs(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let playback = PlaybackConfig::default();
        Self {
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            attempt_timeout_secs: retry.attempt_timeout.as_secs(),
            jitter: retry.jitter,
            ready_warn_secs: playback.ready_warn_after.as_secs(),
            ready_timeout_secs: playback.ready_timeout.as_secs(),
            volume: playback.initial_volume,
        }
    }
}

impl AppConfig {
    /// Default location: `<config dir>/favplay/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("could not determine the configuration directory")?;
        Ok(dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::default_path(),
        }
    }

    /// Load the configuration. A missing file yields defaults and is not
    /// created.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        match std::fs::read_to_string(&path) {
            Ok(data) => {
                let config: AppConfig = toml::from_str(&data)
                    .with_context(|| format!("invalid configuration in {}", path.display()))?;
                debug!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Write atomically: temp file, then rename.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        info!("Saved configuration to {}", path.display());
        Ok(path)
    }

    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        Self::default().save(path)
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Credential headers from the configured cookie and referer.
    pub fn credentials(&self) -> CredentialHeaders {
        let mut headers = CredentialHeaders::new()
            .with_referer(&self.referer)
            .with_user_agent(&self.user_agent);
        if let Some(cookies) = self.cookies.as_deref().filter(|c| !c.trim().is_empty()) {
            headers = headers.with_cookies(cookies);
        }
        headers
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        let upstream = UpstreamConfig {
            header_timeout: Duration::from_secs(self.proxy.header_timeout_secs.max(1)),
            max_redirects: self.proxy.max_redirects,
            user_agent: self.user_agent.clone(),
            ..UpstreamConfig::default()
        };
        ProxyConfig::default()
            .with_supersede(self.proxy.supersede)
            .with_upstream(upstream)
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            api_base: self.api_base.clone(),
            page_size: self.page_size,
            user_agent: self.user_agent.clone(),
            ..CatalogConfig::default()
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        let settings = &self.playback;
        let media_retry = RetryPolicy {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            attempt_timeout: Duration::from_secs(settings.attempt_timeout_secs.max(1)),
            jitter: settings.jitter,
        };

        let mut config = PlaybackConfig::default()
            .with_media_retry(media_retry)
            .with_ready_timeouts(
                Duration::from_secs(settings.ready_warn_secs),
                Duration::from_secs(settings.ready_timeout_secs.max(1)),
            )
            .with_covers(self.covers);
        config.initial_volume = settings.volume.clamp(0.0, 1.0);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(!dir.path().join("absent.toml").exists());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "cookies = \"SESSDATA=abc\"\n\n[proxy]\nsupersede = \"keep_alive\"\n\n[playback]\nmax_retries = 4\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.cookies.as_deref(), Some("SESSDATA=abc"));
        assert_eq!(config.proxy.supersede, SupersedePolicy::KeepAlive);
        assert_eq!(config.proxy.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(config.playback.max_retries, 4);
        assert_eq!(config.playback.ready_timeout_secs, 8);
        assert_eq!(config.player.program, "ffplay");
    }

    #[test]
    fn reset_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        AppConfig::reset(Some(&path)).unwrap();
        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "page_size = \"many\"").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn settings_flow_into_library_configs() {
        let mut config = AppConfig::default();
        config.playback.max_retries = 5;
        config.playback.volume = 3.0;
        config.proxy.header_timeout_secs = 12;

        let playback = config.playback_config();
        assert_eq!(playback.media_retry.max_retries, 5);
        assert_eq!(playback.initial_volume, 1.0);
        assert_eq!(config.proxy_config().upstream.header_timeout, Duration::from_secs(12));

        let credentials = config.credentials();
        assert!(credentials.get("cookie").is_none());
        config.cookies = Some("SESSDATA=x".into());
        let credentials = config.credentials();
        let cookie = credentials.get("cookie").map(|v| v.to_str().unwrap());
        assert_eq!(cookie, Some("SESSDATA=x"));
    }
}
