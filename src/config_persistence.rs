use std::path::{Path, PathBuf};

use log::info;

use crate::config::{sanitize_config, Config};
use crate::error::SyncError;

const APP_DIR_NAME: &str = "mangasync";
const CONFIG_FILE_NAME: &str = "config.toml";

fn app_dir(base: Option<PathBuf>, kind: &str) -> Result<PathBuf, SyncError> {
    base.map(|path| path.join(APP_DIR_NAME))
        .ok_or_else(|| SyncError::Config(format!("could not determine the user {kind} directory")))
}

/// Default `config.toml` location under the user config directory.
pub fn default_config_file() -> Result<PathBuf, SyncError> {
    Ok(app_dir(dirs::config_dir(), "config")?.join(CONFIG_FILE_NAME))
}

/// Loads `config_file`, writing a default one first when it does not exist.
pub fn load_or_create_config(config_file: &Path) -> Result<Config, SyncError> {
    if let Some(parent) = config_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        let default_config = sanitize_config(Config::default());
        let content = toml::to_string(&default_config)
            .map_err(|err| SyncError::Config(format!("failed to serialize defaults: {err}")))?;
        std::fs::write(config_file, content)?;
    }

    let content = std::fs::read_to_string(config_file)?;
    let parsed = toml::from_str::<Config>(&content).map_err(|err| {
        SyncError::Config(format!("invalid config {}: {err}", config_file.display()))
    })?;
    Ok(sanitize_config(parsed))
}

/// Directory holding the search and format caches.
pub fn resolve_cache_dir(config: &Config) -> Result<PathBuf, SyncError> {
    match &config.paths.cache_dir {
        Some(path) => Ok(path.clone()),
        None => app_dir(dirs::cache_dir(), "cache"),
    }
}

/// Directory receiving the end-of-run reports.
pub fn resolve_report_dir(config: &Config) -> Result<PathBuf, SyncError> {
    match &config.paths.report_dir {
        Some(path) => Ok(path.clone()),
        None => app_dir(dirs::data_dir(), "data"),
    }
}
