// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Release registry client

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

/// Latest published release, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Tag name (e.g., "v1.4.0")
    pub tag: String,
    pub display_name: String,
    pub release_url: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct RegistryRelease {
    tag_name: String,
    name: Option<String>,
    html_url: String,
}

pub fn user_agent(current_version: &str) -> String {
    format!("dbranch-updater/{current_version}")
}

/// Fetches the latest release descriptor from the registry endpoint.
#[derive(Debug)]
pub struct ReleaseSource {
    client: Client,
    registry_url: String,
}

impl ReleaseSource {
    pub fn new(config: &UpdaterConfig, current_version: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent(current_version))
            .timeout(config.metadata_timeout())
            .build()
            .map_err(|e| UpdateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            registry_url: config.registry_url.clone(),
        })
    }

    pub fn fetch_latest(&self) -> Result<ReleaseDescriptor> {
        let url = self.registry_url.as_str();
        tracing::debug!("Fetching latest release from {url}");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|source| UpdateError::Network {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(UpdateError::Protocol {
                url: url.to_owned(),
                message: format!("registry returned {status}: {}", body.trim()),
            });
        }

        let release: RegistryRelease = response.json().map_err(|e| UpdateError::Protocol {
            url: url.to_owned(),
            message: format!("malformed release descriptor: {e}"),
        })?;

        let tag = release.tag_name.trim();
        if tag.is_empty() {
            return Err(UpdateError::Protocol {
                url: url.to_owned(),
                message: "release descriptor has an empty tag_name".to_owned(),
            });
        }

        Ok(ReleaseDescriptor {
            tag: tag.to_owned(),
            display_name: release
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| tag.to_owned()),
            release_url: release.html_url,
        })
    }
}
