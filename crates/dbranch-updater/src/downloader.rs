// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Binary downloader module
//!
//! The payload is streamed into a fresh temporary file outside the install
//! directory. The file is owned by [`DownloadedArtifact`] and deleted when the
//! artifact is dropped, so every exit path cleans it up.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdateError};
use crate::platform::{Platform, resolve_platform_artifact};
use crate::release_checker::{ReleaseDescriptor, user_agent};
use reqwest::blocking::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A downloaded, not yet verified, release binary.
#[derive(Debug)]
pub struct DownloadedArtifact {
    pub(crate) file: NamedTempFile,
    pub url: String,
    pub name: String,
    pub platform: Platform,
    pub bytes: u64,
}

impl DownloadedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[derive(Debug)]
pub struct Downloader {
    client: Client,
    base_url: String,
    download_dir: PathBuf,
}

impl Downloader {
    pub fn new(config: &UpdaterConfig, current_version: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent(current_version))
            .timeout(config.download_timeout())
            .build()
            .map_err(|e| UpdateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.download_base_url.trim_end_matches('/').to_owned(),
            download_dir: config.download_dir(),
        })
    }

    /// Conventional artifact URL: `<base>/<tag>/<artifact>`.
    pub fn artifact_url(&self, tag: &str, artifact: &str) -> String {
        format!("{}/{tag}/{artifact}", self.base_url)
    }

    /// Resolve, locate and download the binary for `platform`.
    pub fn download_release(
        &self,
        release: &ReleaseDescriptor,
        platform: &Platform,
    ) -> Result<DownloadedArtifact> {
        let name = resolve_platform_artifact(&platform.os, &platform.arch)?;
        let url = self.artifact_url(&release.tag, &name);
        let (file, bytes) = self.download(&url)?;

        Ok(DownloadedArtifact {
            file,
            url,
            name,
            platform: platform.clone(),
            bytes,
        })
    }

    /// Stream `url` into a new temporary file.
    pub fn download(&self, url: &str) -> Result<(NamedTempFile, u64)> {
        let download_error = |message: String| UpdateError::Download {
            url: url.to_owned(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| download_error(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("server returned {status}")));
        }

        let mut file = tempfile::Builder::new()
            .prefix("dbranch-update-")
            .tempfile_in(&self.download_dir)
            .map_err(|e| {
                download_error(format!(
                    "cannot create temporary file in {}: {e}",
                    self.download_dir.display()
                ))
            })?;

        let bytes = std::io::copy(&mut response, file.as_file_mut())
            .map_err(|e| download_error(format!("transfer interrupted: {e}")))?;
        file.as_file_mut()
            .flush()
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| download_error(format!("cannot flush temporary file: {e}")))?;

        if bytes == 0 {
            return Err(download_error("response body was empty".to_owned()));
        }

        tracing::info!("Downloaded {bytes} bytes from {url}");
        Ok((file, bytes))
    }
}
