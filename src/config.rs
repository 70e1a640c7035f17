//! Persistent application configuration model and defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Title override value that removes a title from searching entirely.
pub const SKIP_TITLE_SENTINEL: &str = "skip";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Catalog endpoint and entry visibility.
    pub anilist: AniListConfig,
    #[serde(default)]
    /// Retry, pacing, and reconciliation behavior.
    pub sync: SyncConfig,
    #[serde(default)]
    /// Cache and report locations.
    pub paths: PathsConfig,
    /// Exported title -> title to search. The value `skip` excludes the title.
    #[serde(default)]
    pub title_overrides: BTreeMap<String, String>,
}

/// Catalog endpoint and list preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AniListConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Mark every saved list entry private.
    #[serde(default)]
    pub private_entries: bool,
    #[serde(default = "default_list_chunk_size")]
    pub list_chunk_size: u32,
}

/// Sync behavior persisted between runs.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SyncConfig {
    /// Titles unread for this many 30-day months are pushed as paused. Zero disables.
    #[serde(default)]
    pub staleness_months: u32,
    #[serde(default = "default_search_retries")]
    pub search_retries: u32,
    #[serde(default = "default_rate_limit_wait_attempts")]
    pub rate_limit_wait_attempts: u32,
    #[serde(default = "default_rate_limit_delay_secs")]
    pub rate_limit_delay_secs: u64,
    #[serde(default = "default_unexpected_error_delay_secs")]
    pub unexpected_error_delay_secs: u64,
    #[serde(default = "default_server_error_retries")]
    pub server_error_retries: u32,
    #[serde(default = "default_server_error_delay_secs")]
    pub server_error_delay_secs: u64,
    #[serde(default = "default_rate_limit_floor_secs")]
    pub rate_limit_floor_secs: u64,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,
    /// Client-side request pacing. Zero disables pacing.
    #[serde(default)]
    pub requests_per_minute: u32,
}

/// Optional overrides for on-disk locations.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_dir: Option<PathBuf>,
}

impl Default for AniListConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            private_entries: false,
            list_chunk_size: default_list_chunk_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            staleness_months: 0,
            search_retries: default_search_retries(),
            rate_limit_wait_attempts: default_rate_limit_wait_attempts(),
            rate_limit_delay_secs: default_rate_limit_delay_secs(),
            unexpected_error_delay_secs: default_unexpected_error_delay_secs(),
            server_error_retries: default_server_error_retries(),
            server_error_delay_secs: default_server_error_delay_secs(),
            rate_limit_floor_secs: default_rate_limit_floor_secs(),
            search_page_size: default_search_page_size(),
            requests_per_minute: 0,
        }
    }
}

fn default_api_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_list_chunk_size() -> u32 {
    500
}

fn default_search_retries() -> u32 {
    3
}

fn default_rate_limit_wait_attempts() -> u32 {
    5
}

fn default_rate_limit_delay_secs() -> u64 {
    60
}

fn default_unexpected_error_delay_secs() -> u64 {
    2
}

fn default_server_error_retries() -> u32 {
    3
}

fn default_server_error_delay_secs() -> u64 {
    2
}

fn default_rate_limit_floor_secs() -> u64 {
    60
}

fn default_search_page_size() -> u32 {
    100
}

/// Clamps values that would otherwise stall or break a run.
pub fn sanitize_config(config: Config) -> Config {
    let anilist = AniListConfig {
        api_url: if config.anilist.api_url.trim().is_empty() {
            default_api_url()
        } else {
            config.anilist.api_url.trim().to_string()
        },
        list_chunk_size: config.anilist.list_chunk_size.clamp(1, 500),
        ..config.anilist
    };
    let sync = SyncConfig {
        search_retries: config.sync.search_retries.max(1),
        search_page_size: config.sync.search_page_size.clamp(1, 100),
        staleness_months: config.sync.staleness_months.min(1_200),
        ..config.sync
    };
    let title_overrides = config
        .title_overrides
        .into_iter()
        .filter_map(|(title, replacement)| {
            let title = title.trim().to_string();
            let replacement = replacement.trim().to_string();
            (!title.is_empty() && !replacement.is_empty()).then_some((title, replacement))
        })
        .collect();

    Config {
        anilist,
        sync,
        paths: config.paths,
        title_overrides,
    }
}

/// Immutable per-run settings threaded into every pipeline component.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub api_url: String,
    pub access_token: String,
    pub private_entries: bool,
    pub list_chunk_size: u32,
    pub staleness_months: u32,
    pub search_retries: u32,
    pub rate_limit_wait_attempts: u32,
    pub rate_limit_delay: Duration,
    pub unexpected_error_delay: Duration,
    pub server_error_retries: u32,
    pub server_error_delay: Duration,
    pub rate_limit_floor: Duration,
    pub search_page_size: u32,
    pub requests_per_minute: u32,
    pub title_overrides: BTreeMap<String, String>,
    pub dry_run: bool,
    pub cache_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl SyncSettings {
    pub fn from_config(
        config: &Config,
        access_token: String,
        cache_dir: PathBuf,
        report_dir: PathBuf,
        dry_run: bool,
    ) -> Self {
        Self {
            api_url: config.anilist.api_url.clone(),
            access_token,
            private_entries: config.anilist.private_entries,
            list_chunk_size: config.anilist.list_chunk_size,
            staleness_months: config.sync.staleness_months,
            search_retries: config.sync.search_retries,
            rate_limit_wait_attempts: config.sync.rate_limit_wait_attempts,
            rate_limit_delay: Duration::from_secs(config.sync.rate_limit_delay_secs),
            unexpected_error_delay: Duration::from_secs(config.sync.unexpected_error_delay_secs),
            server_error_retries: config.sync.server_error_retries,
            server_error_delay: Duration::from_secs(config.sync.server_error_delay_secs),
            rate_limit_floor: Duration::from_secs(config.sync.rate_limit_floor_secs),
            search_page_size: config.sync.search_page_size,
            requests_per_minute: config.sync.requests_per_minute,
            title_overrides: config.title_overrides.clone(),
            dry_run,
            cache_dir,
            report_dir,
        }
    }

    /// Returns a copy carrying a refreshed access token.
    #[allow(dead_code)]
    pub fn with_access_token(&self, access_token: String) -> Self {
        Self {
            access_token,
            ..self.clone()
        }
    }
}
