// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! SHA256 integrity verification module

use crate::config::UpdaterConfig;
use crate::downloader::DownloadedArtifact;
use crate::error::{Result, UpdateError};
use crate::release_checker::user_agent;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Suffix of the checksum manifest published next to each artifact.
pub const MANIFEST_SUFFIX: &str = ".sha256";

/// An artifact whose SHA256 matched its manifest. Only the verifier creates
/// these, and only a verified artifact can be installed.
#[derive(Debug)]
pub struct VerifiedArtifact {
    artifact: DownloadedArtifact,
    pub checksum: String,
}

impl VerifiedArtifact {
    pub fn path(&self) -> &Path {
        self.artifact.path()
    }

    pub fn artifact(&self) -> &DownloadedArtifact {
        &self.artifact
    }
}

#[derive(Debug)]
pub struct IntegrityVerifier {
    client: Client,
}

impl IntegrityVerifier {
    pub fn new(config: &UpdaterConfig, current_version: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent(current_version))
            .timeout(config.metadata_timeout())
            .build()
            .map_err(|e| UpdateError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download `<artifact_url>.sha256` and return the expected digest.
    pub fn fetch_manifest(&self, artifact_url: &str) -> Result<String> {
        let url = format!("{artifact_url}{MANIFEST_SUFFIX}");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| UpdateError::Network {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Protocol {
                url,
                message: format!("checksum manifest request returned {status}"),
            });
        }

        let body = response.text().map_err(|source| UpdateError::Network {
            url: url.clone(),
            source,
        })?;

        parse_manifest(&body).ok_or_else(|| UpdateError::Protocol {
            url,
            message: format!("malformed checksum manifest: {:?}", truncate(&body, 80)),
        })
    }

    /// Fetch the manifest for `artifact` and check the file against it.
    pub fn verify_artifact(&self, artifact: DownloadedArtifact) -> Result<VerifiedArtifact> {
        let expected = self.fetch_manifest(&artifact.url)?;
        let actual = file_sha256(artifact.path())?;

        if !digests_match(&actual, &expected) {
            return Err(UpdateError::ChecksumMismatch {
                path: artifact.path().to_path_buf(),
                expected,
                actual,
            });
        }

        tracing::info!("Checksum verified for {}: {actual}", artifact.name);
        Ok(VerifiedArtifact {
            artifact,
            checksum: actual,
        })
    }
}

/// Parse a `<hex>  <filename>` manifest. Only the first token matters, and it
/// has to be a 64 character hex digest.
pub fn parse_manifest(content: &str) -> Option<String> {
    let token = content.split_whitespace().next()?;
    let valid = token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| token.to_ascii_lowercase())
}

/// Hex-encoded SHA256 of the whole file.
pub fn file_sha256(path: &Path) -> Result<String> {
    let read_error = |source: std::io::Error| UpdateError::ArtifactRead {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_error)?);
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(read_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Returns true when the file's digest equals `expected_hex`, ignoring case.
pub fn verify(path: &Path, expected_hex: &str) -> Result<bool> {
    Ok(digests_match(&file_sha256(path)?, expected_hex))
}

fn digests_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

fn truncate(s: &str, max: usize) -> &str {
    s.char_indices()
        .nth(max)
        .and_then(|(idx, _)| s.get(..idx))
        .unwrap_or(s)
}
