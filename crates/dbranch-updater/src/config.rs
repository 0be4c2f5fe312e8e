// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Configuration module for the updater

use crate::error::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an updater config file.
pub const CONFIG_PATH_ENV: &str = "DBRANCH_UPDATER_CONFIG";
pub const REGISTRY_URL_ENV: &str = "DBRANCH_UPDATE_REGISTRY_URL";
pub const DOWNLOAD_URL_ENV: &str = "DBRANCH_UPDATE_DOWNLOAD_URL";

fn default_registry_url() -> String {
    "https://api.github.com/repos/dbranch-dev/dbranch/releases/latest".to_owned()
}

fn default_download_base_url() -> String {
    "https://github.com/dbranch-dev/dbranch/releases/download".to_owned()
}

fn default_10() -> u64 {
    10
}

fn default_300() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Endpoint returning the latest release descriptor
    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    /// Base of artifact URLs: `<base>/<tag>/<artifact>`
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Timeout for the registry and checksum manifest requests (seconds)
    #[serde(default = "default_10")]
    pub metadata_timeout_secs: u64,

    /// Timeout for the binary payload (seconds)
    #[serde(default = "default_300")]
    pub download_timeout_secs: u64,

    /// Directory for the temporary download (defaults to the OS temp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            download_base_url: default_download_base_url(),
            metadata_timeout_secs: default_10(),
            download_timeout_secs: default_300(),
            download_dir: None,
        }
    }
}

impl UpdaterConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Apply URL overrides from the environment. `lookup` is usually
    /// `|key| std::env::var(key).ok()`.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REGISTRY_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.registry_url = url.trim().to_owned();
        }
        if let Some(url) = lookup(DOWNLOAD_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.download_base_url = url.trim().to_owned();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("registry_url", &self.registry_url),
            ("download_base_url", &self.download_base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(UpdateError::Config(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.metadata_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(UpdateError::Config(
                "timeouts must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Load the config from `path`. A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<UpdaterConfig> {
    let Some(path) = path else {
        return Ok(UpdaterConfig::default());
    };
    if !path.exists() {
        tracing::debug!("No updater config at {}, using defaults", path.display());
        return Ok(UpdaterConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        UpdateError::Config(format!("Failed to read {}: {e}", path.display()))
    })?;
    let config: UpdaterConfig = serde_json::from_str(&content).map_err(|e| {
        UpdateError::Config(format!("Failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}
