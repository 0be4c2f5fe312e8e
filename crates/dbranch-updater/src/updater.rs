// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update orchestrator
//!
//! One call to [`Updater::run`] is one complete attempt: version check,
//! platform resolution, download, checksum verification, install. The first
//! failing stage aborts the rest; nothing is retried.

use crate::config::UpdaterConfig;
use crate::downloader::Downloader;
use crate::error::{Result, UpdateError, UpdateStage};
use crate::installer::{BinaryInstaller, InstallReport};
use crate::platform::{InstallMode, Platform, resolve_platform_artifact};
use crate::release_checker::{ReleaseDescriptor, ReleaseSource};
use crate::telemetry::{UpdateEvent, report_event};
use crate::verifier::IntegrityVerifier;
use crate::version;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Result of a version check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub current_version: String,
    pub latest: ReleaseDescriptor,
    pub update_available: bool,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    Updated {
        from: String,
        to: String,
        report: InstallReport,
    },
}

/// Resolve the executable path once, following every symlink.
pub fn resolve_target(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| UpdateError::Install {
        target: path.to_path_buf(),
        message: format!("cannot resolve executable path: {e}"),
        rolled_back: false,
    })
}

#[derive(Debug)]
pub struct Updater {
    current_version: String,
    platform: Platform,
    release_source: ReleaseSource,
    downloader: Downloader,
    verifier: IntegrityVerifier,
    installer: BinaryInstaller,
}

impl Updater {
    /// Build an updater for the executable at `target`.
    ///
    /// The install mode is derived from `platform` here and never re-probed.
    pub fn new(
        config: &UpdaterConfig,
        current_version: impl Into<String>,
        target: &Path,
        platform: Platform,
    ) -> Result<Self> {
        config.validate()?;
        let current_version = current_version.into();
        let target = resolve_target(target)?;
        ensure_download_dir_outside(&config.download_dir(), &target)?;

        let mode = InstallMode::for_platform(&platform);
        Ok(Self {
            release_source: ReleaseSource::new(config, &current_version)?,
            downloader: Downloader::new(config, &current_version)?,
            verifier: IntegrityVerifier::new(config, &current_version)?,
            installer: BinaryInstaller::new(mode, target),
            current_version,
            platform,
        })
    }

    /// Override the platform-derived install mode.
    #[must_use]
    pub fn with_install_mode(mut self, mode: InstallMode) -> Self {
        self.installer = BinaryInstaller::new(mode, self.installer.target().to_path_buf());
        self
    }

    pub fn target(&self) -> &Path {
        self.installer.target()
    }

    pub fn install_mode(&self) -> InstallMode {
        self.installer.mode()
    }

    /// Fetch the latest release and compare it with the running version.
    pub fn check(&self) -> Result<CheckOutcome> {
        let latest = self
            .release_source
            .fetch_latest()
            .map_err(|e| e.at_stage(UpdateStage::VersionCheck))?;
        let update_available = version::needs_update(&self.current_version, &latest.tag);

        report_event(&UpdateEvent::CheckCompleted {
            current_version: self.current_version.clone(),
            latest_version: latest.tag.clone(),
            update_available,
        });

        Ok(CheckOutcome {
            current_version: self.current_version.clone(),
            latest,
            update_available,
        })
    }

    /// Run the full update.
    pub fn run(&self) -> Result<UpdateOutcome> {
        let started = Instant::now();

        let check = self.check()?;
        if !check.update_available {
            info!("Already up to date ({})", self.current_version);
            return Ok(UpdateOutcome::UpToDate {
                version: self.current_version.clone(),
            });
        }

        info!(
            "New version available: {} (current: {})",
            check.latest.tag, self.current_version
        );
        report_event(&UpdateEvent::UpdateStarted {
            from_version: self.current_version.clone(),
            to_version: check.latest.tag.clone(),
        });

        match self.apply(&check.latest) {
            Ok(report) => {
                report_event(&UpdateEvent::UpdateCompleted {
                    from_version: self.current_version.clone(),
                    to_version: check.latest.tag.clone(),
                    duration_secs: started.elapsed().as_secs(),
                });
                Ok(UpdateOutcome::Updated {
                    from: self.current_version.clone(),
                    to: check.latest.tag,
                    report,
                })
            }
            Err(e) => {
                for event in failure_events(&self.current_version, &e) {
                    report_event(&event);
                }
                Err(e)
            }
        }
    }

    fn apply(&self, release: &ReleaseDescriptor) -> Result<InstallReport> {
        let artifact_name = resolve_platform_artifact(&self.platform.os, &self.platform.arch)
            .map_err(|e| e.at_stage(UpdateStage::PlatformResolution))?;
        info!("Downloading {artifact_name} for {}", release.tag);

        let downloaded = self
            .downloader
            .download_release(release, &self.platform)
            .map_err(|e| e.at_stage(UpdateStage::Download))?;

        let verified = self
            .verifier
            .verify_artifact(downloaded)
            .map_err(|e| e.at_stage(UpdateStage::Verification))?;

        let report = self
            .installer
            .install(&verified)
            .map_err(|e| e.at_stage(UpdateStage::Install))?;

        info!("Updated {} to {}", report.target.display(), release.tag);
        Ok(report)
    }
}

/// Events describing a failed run. A rollback is only reported when the
/// installer actually restored the previous binary from its backup.
fn failure_events(current_version: &str, err: &UpdateError) -> Vec<UpdateEvent> {
    let mut events = vec![UpdateEvent::UpdateFailed {
        from_version: current_version.to_owned(),
        stage: err.stage().map(|stage| stage.to_string()),
        error: err.root_cause().to_string(),
    }];
    if err.rolled_back() {
        events.push(UpdateEvent::RollbackCompleted {
            restored_version: current_version.to_owned(),
        });
    }
    events
}

fn ensure_download_dir_outside(download_dir: &Path, target: &Path) -> Result<()> {
    let Some(install_dir) = target.parent() else {
        return Ok(());
    };
    let download_dir = download_dir
        .canonicalize()
        .unwrap_or_else(|_| download_dir.to_path_buf());
    if download_dir == install_dir {
        return Err(UpdateError::Config(format!(
            "download_dir {} must not be the install directory",
            download_dir.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use std::fs;
    use tempfile::TempDir;

    const NEW_BINARY: &[u8] = b"#!/bin/sh\necho dbranch 1.1.0\n";
    const ARTIFACT_PATH: &str = "/download/v1.1.0/dbranch-linux-amd64";

    struct Env {
        server: ServerGuard,
        dir: TempDir,
        target: PathBuf,
        downloads: PathBuf,
    }

    impl Env {
        fn new() -> Self {
            let server = Server::new();
            let dir = TempDir::new().unwrap();
            let bin_dir = dir.path().join("bin");
            let downloads = dir.path().join("downloads");
            fs::create_dir(&bin_dir).unwrap();
            fs::create_dir(&downloads).unwrap();
            let target = bin_dir.join("dbranch");
            fs::write(&target, b"old binary").unwrap();
            Self {
                server,
                dir,
                target,
                downloads,
            }
        }

        fn config(&self) -> UpdaterConfig {
            UpdaterConfig {
                registry_url: format!("{}/releases/latest", self.server.url()),
                download_base_url: format!("{}/download", self.server.url()),
                download_dir: Some(self.downloads.clone()),
                ..Default::default()
            }
        }

        fn updater(&self, current: &str) -> Updater {
            Updater::new(
                &self.config(),
                current,
                &self.target,
                Platform::new("linux", "amd64"),
            )
            .unwrap()
        }

        fn mock_latest(&mut self, tag: &str) -> Mock {
            self.server
                .mock("GET", "/releases/latest")
                .with_status(200)
                .with_body(
                    json!({
                        "tag_name": tag,
                        "name": tag,
                        "html_url": format!("https://example.com/releases/{tag}")
                    })
                    .to_string(),
                )
                .create()
        }

        fn mock_artifact(&mut self, body: &[u8]) -> Mock {
            self.server
                .mock("GET", ARTIFACT_PATH)
                .with_status(200)
                .with_body(body)
                .create()
        }

        fn mock_manifest(&mut self, digest_of: &[u8]) -> Mock {
            let digest = format!("{:x}", Sha256::digest(digest_of));
            self.server
                .mock("GET", format!("{ARTIFACT_PATH}.sha256").as_str())
                .with_status(200)
                .with_body(format!("{digest}  dbranch-linux-amd64\n"))
                .create()
        }

        fn bin_entries(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.target.parent().unwrap())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        fn downloads_empty(&self) -> bool {
            fs::read_dir(&self.downloads).unwrap().next().is_none()
        }
    }

    #[test]
    fn test_already_up_to_date_skips_download() {
        let mut env = Env::new();
        let latest = env.mock_latest("v1.0.0");
        let download = env
            .server
            .mock("GET", Matcher::Regex("^/download/".to_owned()))
            .expect(0)
            .create();

        let outcome = env.updater("v1.0.0").run().unwrap();

        assert!(matches!(outcome, UpdateOutcome::UpToDate { ref version } if version == "v1.0.0"));
        assert_eq!(fs::read(&env.target).unwrap(), b"old binary");
        latest.assert();
        download.assert();
    }

    #[test]
    fn test_update_copy_replace() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let artifact = env.mock_artifact(NEW_BINARY);
        let manifest = env.mock_manifest(NEW_BINARY);

        let updater = env
            .updater("v1.0.0")
            .with_install_mode(InstallMode::CopyReplace);
        let outcome = updater.run().unwrap();

        match outcome {
            UpdateOutcome::Updated { from, to, report } => {
                assert_eq!(from, "v1.0.0");
                assert_eq!(to, "v1.1.0");
                assert!(report.retained_backup.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fs::read(&env.target).unwrap(), NEW_BINARY);
        assert_eq!(env.bin_entries(), ["dbranch"]);
        assert!(env.downloads_empty());
        artifact.assert();
        manifest.assert();
    }

    #[test]
    fn test_update_rename_replace_keeps_backup() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let _artifact = env.mock_artifact(NEW_BINARY);
        let _manifest = env.mock_manifest(NEW_BINARY);

        let updater = env
            .updater("v1.0.0")
            .with_install_mode(InstallMode::RenameReplace);
        let outcome = updater.run().unwrap();

        let UpdateOutcome::Updated { report, .. } = outcome else {
            panic!("expected an update");
        };
        let backup = report.retained_backup.unwrap();
        assert_eq!(fs::read(&backup).unwrap(), b"old binary");
        assert_eq!(fs::read(&env.target).unwrap(), NEW_BINARY);
        assert_eq!(env.bin_entries(), ["dbranch", "dbranch.old"]);
        assert!(env.downloads_empty());
    }

    #[test]
    fn test_checksum_mismatch_never_installs() {
        for mode in [InstallMode::CopyReplace, InstallMode::RenameReplace] {
            let mut env = Env::new();
            let _latest = env.mock_latest("v1.1.0");
            let _artifact = env.mock_artifact(NEW_BINARY);
            let _manifest = env.mock_manifest(b"some other build");

            let err = env
                .updater("v1.0.0")
                .with_install_mode(mode)
                .run()
                .unwrap_err();

            assert_eq!(err.stage(), Some(UpdateStage::Verification));
            assert!(matches!(
                err.root_cause(),
                UpdateError::ChecksumMismatch { .. }
            ));
            assert_eq!(fs::read(&env.target).unwrap(), b"old binary");
            assert_eq!(env.bin_entries(), ["dbranch"]);
            assert!(env.downloads_empty());
        }
    }

    #[test]
    fn test_development_build_always_updates() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let _artifact = env.mock_artifact(NEW_BINARY);
        let _manifest = env.mock_manifest(NEW_BINARY);

        let outcome = env.updater("dev").run().unwrap();

        assert!(matches!(outcome, UpdateOutcome::Updated { .. }));
        assert_eq!(fs::read(&env.target).unwrap(), NEW_BINARY);
    }

    #[test]
    fn test_check_only_reports_without_downloading() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let download = env
            .server
            .mock("GET", Matcher::Regex("^/download/".to_owned()))
            .expect(0)
            .create();

        let check = env.updater("1.0.0").check().unwrap();

        assert!(check.update_available);
        assert_eq!(check.latest.tag, "v1.1.0");
        assert_eq!(fs::read(&env.target).unwrap(), b"old binary");
        download.assert();
    }

    #[test]
    fn test_registry_failure_is_version_check_stage() {
        let mut env = Env::new();
        let _latest = env
            .server
            .mock("GET", "/releases/latest")
            .with_status(500)
            .create();

        let err = env.updater("v1.0.0").run().unwrap_err();

        assert_eq!(err.stage(), Some(UpdateStage::VersionCheck));
        assert!(matches!(err.root_cause(), UpdateError::Protocol { .. }));
    }

    #[test]
    fn test_missing_artifact_is_download_stage() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let _artifact = env.server.mock("GET", ARTIFACT_PATH).with_status(404).create();

        let err = env.updater("v1.0.0").run().unwrap_err();

        assert_eq!(err.stage(), Some(UpdateStage::Download));
        assert_eq!(fs::read(&env.target).unwrap(), b"old binary");
        assert!(env.downloads_empty());
    }

    #[test]
    fn test_unsupported_platform_is_platform_stage() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let download = env
            .server
            .mock("GET", Matcher::Regex("^/download/".to_owned()))
            .expect(0)
            .create();

        let updater = Updater::new(
            &env.config(),
            "v1.0.0",
            &env.target,
            Platform::new("freebsd", "amd64"),
        )
        .unwrap();
        let err = updater.run().unwrap_err();

        assert_eq!(err.stage(), Some(UpdateStage::PlatformResolution));
        assert!(err.root_cause().to_string().contains("freebsd/amd64"));
        download.assert();
    }

    #[test]
    fn test_download_dir_in_install_dir_rejected() {
        let env = Env::new();
        let config = UpdaterConfig {
            download_dir: Some(env.target.parent().unwrap().to_path_buf()),
            ..env.config()
        };

        let err = Updater::new(&config, "v1.0.0", &env.target, Platform::new("linux", "amd64"))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_target_symlink_is_resolved() {
        let env = Env::new();
        let link = env.dir.path().join("dbranch-link");
        std::os::unix::fs::symlink(&env.target, &link).unwrap();

        let updater =
            Updater::new(&env.config(), "v1.0.0", &link, Platform::new("linux", "amd64")).unwrap();

        assert_eq!(updater.target(), env.target.canonicalize().unwrap());
    }

    fn install_error(rolled_back: bool) -> UpdateError {
        UpdateError::Install {
            target: PathBuf::from("/usr/local/bin/dbranch"),
            message: "cannot move new binary".to_owned(),
            rolled_back,
        }
        .at_stage(UpdateStage::Install)
    }

    #[test]
    fn test_rollback_event_only_after_restore() {
        let events = failure_events("v1.0.0", &install_error(true));
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            UpdateEvent::RollbackCompleted { ref restored_version } if restored_version == "v1.0.0"
        ));

        let events = failure_events("v1.0.0", &install_error(false));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            UpdateEvent::UpdateFailed { stage: Some(ref stage), .. } if stage == "install"
        ));
    }

    #[test]
    fn test_stale_backup_failure_reports_no_rollback() {
        let mut env = Env::new();
        let _latest = env.mock_latest("v1.1.0");
        let _artifact = env.mock_artifact(NEW_BINARY);
        let _manifest = env.mock_manifest(NEW_BINARY);
        // A directory at the backup path cannot be removed as a file.
        fs::create_dir(env.target.with_file_name("dbranch.old")).unwrap();

        let err = env
            .updater("v1.0.0")
            .with_install_mode(InstallMode::RenameReplace)
            .run()
            .unwrap_err();

        assert_eq!(err.stage(), Some(UpdateStage::Install));
        assert!(!err.rolled_back());
        assert_eq!(failure_events("v1.0.0", &err).len(), 1);
        assert_eq!(fs::read(&env.target).unwrap(), b"old binary");
    }

    #[test]
    fn test_install_mode_follows_platform() {
        let env = Env::new();
        let updater = Updater::new(
            &env.config(),
            "v1.0.0",
            &env.target,
            Platform::new("windows", "amd64"),
        )
        .unwrap();
        assert_eq!(updater.install_mode(), InstallMode::RenameReplace);
    }
}
