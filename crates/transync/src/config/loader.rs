use std::path::{Path, PathBuf};

use crate::config::schema::{SyncConfig, MAX_PAGE_LIMIT};
use crate::error::ConfigError;

pub const API_URL_ENV: &str = "TRANSYNC_API_URL";
/// Variable used by the web frontend; read when `TRANSYNC_API_URL` is unset.
pub const LEGACY_API_URL_ENV: &str = "API_URL";
pub const POLL_INTERVAL_ENV: &str = "TRANSYNC_POLL_INTERVAL_SECS";

const CONFIG_FILE_NAME: &str = "config.json";

/// `<platform config dir>/transync/config.json`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("transync").join(CONFIG_FILE_NAME))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads `path` when given, else the default file when it exists, else
/// defaults; then applies environment overrides and validates.
pub fn resolve_config(path: Option<&Path>) -> Result<SyncConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                log::debug!("Using config file {:?}", path);
                load_config(&path)?
            }
            None => SyncConfig::default(),
        },
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_env_overrides(config: &mut SyncConfig) -> Result<(), ConfigError> {
    let api_url = std::env::var(API_URL_ENV)
        .or_else(|_| std::env::var(LEGACY_API_URL_ENV))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(api_url) = api_url {
        config.api_url = api_url;
    }

    if let Ok(raw) = std::env::var(POLL_INTERVAL_ENV) {
        config.poll_interval_secs = raw.trim().parse().map_err(|_| ConfigError::Validation {
            message: format!("{} must be a positive integer, got '{}'", POLL_INTERVAL_ENV, raw),
        })?;
    }

    Ok(())
}

pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    let api_url = config.api_url.trim();
    if api_url.is_empty() {
        return Err(ConfigError::Validation {
            message: "apiUrl must not be empty".to_string(),
        });
    }

    let parsed = reqwest::Url::parse(api_url).map_err(|e| ConfigError::Validation {
        message: format!("apiUrl '{}' is not a valid URL: {}", api_url, e),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            message: format!("apiUrl must use http or https, got '{}'", parsed.scheme()),
        });
    }

    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "pollIntervalSecs must be > 0".to_string(),
        });
    }

    if config.page_limit == 0 || config.page_limit > MAX_PAGE_LIMIT {
        return Err(ConfigError::Validation {
            message: format!(
                "pageLimit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, config.page_limit
            ),
        });
    }

    if config.stream_idle_timeout_secs == Some(0) {
        return Err(ConfigError::Validation {
            message: "streamIdleTimeoutSecs must be > 0 when set".to_string(),
        });
    }

    if config.failure_threshold == 0 {
        return Err(ConfigError::Validation {
            message: "failureThreshold must be > 0".to_string(),
        });
    }

    if config.change_channel_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "changeChannelCapacity must be > 0".to_string(),
        });
    }

    Ok(())
}
