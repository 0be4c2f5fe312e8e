// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Platform probe and artifact naming

use crate::error::{Result, UpdateError};
use std::fmt;

/// Base name of the published binaries.
pub const BINARY_NAME: &str = "dbranch";

/// Operating system and architecture in release naming (`linux`, `darwin`,
/// `windows` / `amd64`, `arm64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Probe the platform this binary was built for.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Resolve the release artifact name for an (os, arch) pair.
///
/// Only the published matrix is accepted; anything else is
/// [`UpdateError::UnsupportedPlatform`], never a guessed fallback.
pub fn resolve_platform_artifact(os: &str, arch: &str) -> Result<String> {
    let supported = matches!(
        (os, arch),
        ("linux" | "darwin", "amd64" | "arm64") | ("windows", "amd64")
    );
    if !supported {
        return Err(UpdateError::UnsupportedPlatform {
            os: os.to_owned(),
            arch: arch.to_owned(),
        });
    }

    let extension = if os == "windows" { ".exe" } else { "" };
    Ok(format!("{BINARY_NAME}-{os}-{arch}{extension}"))
}

/// How the live executable gets replaced. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// The running image may be replaced underneath the process: back up by
    /// copy, publish the new bytes, delete the backup.
    CopyReplace,
    /// The OS locks a loaded executable: rename it away, rename the new binary
    /// in, keep the backup on disk.
    RenameReplace,
}

impl InstallMode {
    pub fn for_platform(platform: &Platform) -> Self {
        if platform.is_windows() {
            Self::RenameReplace
        } else {
            Self::CopyReplace
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyReplace => f.write_str("copy-replace"),
            Self::RenameReplace => f.write_str("rename-replace"),
        }
    }
}
