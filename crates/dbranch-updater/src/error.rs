// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Error types for the updater crate

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    VersionCheck,
    PlatformResolution,
    Download,
    Verification,
    Install,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VersionCheck => "version check",
            Self::PlatformResolution => "platform resolution",
            Self::Download => "download",
            Self::Verification => "checksum verification",
            Self::Install => "install",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("config error: {0}")]
    Config(String),

    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected response from {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("unsupported platform: {os}/{arch} has no published binary")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("install into {} failed, previous binary left in place: {message}", .target.display())]
    Install {
        target: PathBuf,
        message: String,
        /// A backup was taken and the previous binary was put back from it
        rolled_back: bool,
    },

    #[error(
        "install into {target_path} failed and automatic rollback did not complete.\n\
         install error: {cause}\n\
         rollback error: {rollback}\n\
         To recover manually, move {backup_path} to {target_path}",
        target_path = .target.display(),
        backup_path = .backup.display()
    )]
    RecoveryRequired {
        target: PathBuf,
        backup: PathBuf,
        cause: String,
        rollback: String,
    },

    #[error("update aborted during {stage}")]
    Aborted {
        stage: UpdateStage,
        #[source]
        source: Box<UpdateError>,
    },

    #[error("cannot read artifact {}: {source}", .path.display())]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdateError {
    /// Wrap this error with the pipeline stage that produced it.
    pub fn at_stage(self, stage: UpdateStage) -> Self {
        Self::Aborted {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping stage wrappers.
    pub fn root_cause(&self) -> &UpdateError {
        match self {
            Self::Aborted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when an install failed after a backup was taken and the previous
    /// binary was put back.
    pub fn rolled_back(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Install {
                rolled_back: true,
                ..
            }
        )
    }

    /// Stage the error was raised in, if it was wrapped by the orchestrator.
    pub fn stage(&self) -> Option<UpdateStage> {
        if let Self::Aborted { stage, .. } = self {
            Some(*stage)
        } else {
            None
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
