// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Replacement of the running executable
//!
//! An install runs as a small state machine over [`InstallPhase`]:
//!
//! ```text
//! Idle -> Staged -> BackedUp -> Installed -> Committed
//!                                  |
//!                                  +-> RolledBack | Failed
//! ```
//!
//! The verified artifact is first copied next to the target as `<target>.new`
//! so the step that publishes it is a single same-filesystem rename. The
//! backup lives at `<target>.old`. Rollback also only ever renames onto the
//! target; the target file itself is never opened for writing.
//!
//! The staged file takes the live binary's mode bits. The owner execute bit
//! is added only when the live binary has no execute bit at all. Owner and
//! group are copied best effort: when the updating user may not `chown`, the
//! new binary ends up owned by that user.

use crate::error::{Result, UpdateError};
use crate::platform::InstallMode;
use crate::verifier::VerifiedArtifact;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, Permissions};
use std::io;
use std::path::{Path, PathBuf};

const STAGED_SUFFIX: &str = ".new";
const BACKUP_SUFFIX: &str = ".old";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Idle,
    /// Artifact copied beside the target and marked executable
    Staged,
    /// Original binary preserved at the backup path
    BackedUp,
    /// New binary occupies the target path
    Installed,
    /// Done; the backup is removed (copy) or retained (rename)
    Committed,
    /// Install failed and the target was restored from the backup
    RolledBack,
    /// Install failed and the target could not be restored
    Failed,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Paths touched by one install and the last phase that committed.
#[derive(Debug, Clone)]
pub struct InstallTransaction {
    pub source_path: PathBuf,
    pub staged_path: PathBuf,
    pub target_path: PathBuf,
    pub backup_path: PathBuf,
    pub phase: InstallPhase,
}

impl InstallTransaction {
    pub fn new(source: &Path, target: &Path) -> Self {
        Self {
            source_path: source.to_path_buf(),
            staged_path: sibling(target, STAGED_SUFFIX),
            target_path: target.to_path_buf(),
            backup_path: sibling(target, BACKUP_SUFFIX),
            phase: InstallPhase::Idle,
        }
    }

    fn advance(&mut self, phase: InstallPhase) {
        tracing::debug!("Install phase {} -> {phase}", self.phase);
        self.phase = phase;
    }
}

/// `/usr/bin/dbranch` + `.old` -> `/usr/bin/dbranch.old`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(OsString::new, std::ffi::OsStr::to_os_string);
    name.push(suffix);
    path.with_file_name(name)
}

/// Result of a committed install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub mode: InstallMode,
    pub target: PathBuf,
    /// Backup left on disk for the operator to delete
    pub retained_backup: Option<PathBuf>,
}

/// Filesystem operations used by the installer.
pub trait InstallFs {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn permissions(&self, path: &Path) -> io::Result<Permissions>;
    fn set_permissions(&self, path: &Path, perms: Permissions) -> io::Result<()>;
    fn exists(&self, path: &Path) -> bool;
    /// Give `to` the owner and group of `from`.
    fn copy_owner(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`InstallFs`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl InstallFs for StdFs {
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn permissions(&self, path: &Path) -> io::Result<Permissions> {
        fs::metadata(path).map(|m| m.permissions())
    }

    fn set_permissions(&self, path: &Path, perms: Permissions) -> io::Result<()> {
        fs::set_permissions(path, perms)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    #[cfg(unix)]
    fn copy_owner(&self, from: &Path, to: &Path) -> io::Result<()> {
        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(from)?;
        std::os::unix::fs::chown(to, Some(meta.uid()), Some(meta.gid()))
    }

    #[cfg(not(unix))]
    fn copy_owner(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// The live binary's mode, plus owner execute if nobody could execute it.
#[cfg(unix)]
fn executable(perms: Permissions) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    let mode = perms.mode() & 0o7777;
    if mode & 0o111 == 0 {
        Permissions::from_mode(mode | 0o100)
    } else {
        Permissions::from_mode(mode)
    }
}

#[cfg(not(unix))]
fn executable(perms: Permissions) -> Permissions {
    perms
}

#[derive(Debug)]
pub struct BinaryInstaller<F = StdFs> {
    mode: InstallMode,
    target: PathBuf,
    fs: F,
}

impl BinaryInstaller<StdFs> {
    /// `target` must already be fully resolved (no symlinks).
    pub fn new(mode: InstallMode, target: PathBuf) -> Self {
        Self::with_fs(mode, target, StdFs)
    }
}

impl<F: InstallFs> BinaryInstaller<F> {
    pub fn with_fs(mode: InstallMode, target: PathBuf, fs: F) -> Self {
        Self { mode, target, fs }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    /// Replace the target with a verified artifact.
    pub fn install(&self, artifact: &VerifiedArtifact) -> Result<InstallReport> {
        self.install_path(artifact.path())
    }

    pub(crate) fn install_path(&self, source: &Path) -> Result<InstallReport> {
        let mut tx = InstallTransaction::new(source, &self.target);
        tracing::info!(
            "Installing {} over {} ({})",
            source.display(),
            self.target.display(),
            self.mode
        );

        self.stage(&mut tx)?;
        let result = match self.mode {
            InstallMode::CopyReplace => self.copy_replace(&mut tx),
            InstallMode::RenameReplace => self.rename_replace(&mut tx),
        };

        if result.is_err() {
            self.discard_staged(&tx);
        }
        result
    }

    /// Idle -> Staged
    fn stage(&self, tx: &mut InstallTransaction) -> Result<()> {
        let perms = self.fs.permissions(&tx.target_path).map_err(|e| {
            self.install_error(format!(
                "cannot read current binary {}: {e}",
                tx.target_path.display()
            ))
        })?;

        let staged = self
            .fs
            .copy(&tx.source_path, &tx.staged_path)
            .map(|_| self.copy_owner(tx))
            .and_then(|()| self.fs.set_permissions(&tx.staged_path, executable(perms)));
        if let Err(e) = staged {
            self.discard_staged(tx);
            return Err(self.install_error(format!(
                "cannot stage new binary at {}: {e}",
                tx.staged_path.display()
            )));
        }

        tx.advance(InstallPhase::Staged);
        Ok(())
    }

    fn copy_replace(&self, tx: &mut InstallTransaction) -> Result<InstallReport> {
        // Staged -> BackedUp: the live binary never leaves the target path.
        if let Err(e) = self.fs.copy(&tx.target_path, &tx.backup_path) {
            self.remove_quietly(&tx.backup_path);
            return Err(self.install_error(format!(
                "cannot back up {} to {}: {e}",
                tx.target_path.display(),
                tx.backup_path.display()
            )));
        }
        tx.advance(InstallPhase::BackedUp);

        // BackedUp -> Installed
        if let Err(e) = self.fs.rename(&tx.staged_path, &tx.target_path) {
            return Err(self.rollback_copy(tx, &e));
        }
        tx.advance(InstallPhase::Installed);

        // Installed -> Committed
        let retained_backup = match self.fs.remove(&tx.backup_path) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    "New binary installed but backup {} could not be removed: {e}",
                    tx.backup_path.display()
                );
                Some(tx.backup_path.clone())
            }
        };
        tx.advance(InstallPhase::Committed);

        Ok(InstallReport {
            mode: self.mode,
            target: tx.target_path.clone(),
            retained_backup,
        })
    }

    fn rename_replace(&self, tx: &mut InstallTransaction) -> Result<InstallReport> {
        if self.fs.exists(&tx.backup_path) {
            self.fs.remove(&tx.backup_path).map_err(|e| {
                self.install_error(format!(
                    "stale backup {} from a previous update could not be removed: {e}",
                    tx.backup_path.display()
                ))
            })?;
        }

        // Staged -> BackedUp
        if let Err(e) = self.fs.rename(&tx.target_path, &tx.backup_path) {
            return Err(self.install_error(format!(
                "cannot move {} to {}: {e}",
                tx.target_path.display(),
                tx.backup_path.display()
            )));
        }
        tx.advance(InstallPhase::BackedUp);

        // BackedUp -> Installed
        if let Err(e) = self.fs.rename(&tx.staged_path, &tx.target_path) {
            return Err(self.rollback_rename(tx, &e));
        }
        tx.advance(InstallPhase::Installed);

        // Deleting the previous image right after swapping it out is not safe
        // while the process may still hold it, so the backup stays.
        tx.advance(InstallPhase::Committed);
        tracing::info!(
            "Previous binary kept at {}; it can be removed manually",
            tx.backup_path.display()
        );

        Ok(InstallReport {
            mode: self.mode,
            target: tx.target_path.clone(),
            retained_backup: Some(tx.backup_path.clone()),
        })
    }

    fn rollback_copy(&self, tx: &mut InstallTransaction, cause: &io::Error) -> UpdateError {
        tracing::warn!("Install failed ({cause}), restoring backup");
        // A failed rename leaves its destination untouched.
        if self.fs.exists(&tx.target_path) {
            self.remove_quietly(&tx.backup_path);
            return self.rolled_back(tx, cause);
        }
        self.restore_by_rename(tx, cause)
    }

    fn rollback_rename(&self, tx: &mut InstallTransaction, cause: &io::Error) -> UpdateError {
        tracing::warn!("Install failed ({cause}), moving backup back");
        self.restore_by_rename(tx, cause)
    }

    /// Rename the backup over the target. Never writes into the target file,
    /// which may be the image of a running process.
    fn restore_by_rename(&self, tx: &mut InstallTransaction, cause: &io::Error) -> UpdateError {
        if !self.fs.exists(&tx.backup_path) {
            return self.fail(tx, cause, "backup is missing");
        }
        if let Err(e) = self.fs.rename(&tx.backup_path, &tx.target_path) {
            return self.fail(tx, cause, &e.to_string());
        }
        self.rolled_back(tx, cause)
    }

    fn rolled_back(&self, tx: &mut InstallTransaction, cause: &io::Error) -> UpdateError {
        tx.advance(InstallPhase::RolledBack);
        tracing::info!("Previous binary in place at {}", tx.target_path.display());
        UpdateError::Install {
            target: self.target.clone(),
            message: format!(
                "cannot move new binary into {}: {cause}",
                tx.target_path.display()
            ),
            rolled_back: true,
        }
    }

    fn fail(&self, tx: &mut InstallTransaction, cause: &io::Error, rollback: &str) -> UpdateError {
        tx.advance(InstallPhase::Failed);
        tracing::error!(
            "Rollback failed: {rollback}. Backup: {}, target: {}",
            tx.backup_path.display(),
            tx.target_path.display()
        );
        UpdateError::RecoveryRequired {
            target: tx.target_path.clone(),
            backup: tx.backup_path.clone(),
            cause: cause.to_string(),
            rollback: rollback.to_owned(),
        }
    }

    fn copy_owner(&self, tx: &InstallTransaction) {
        if let Err(e) = self.fs.copy_owner(&tx.target_path, &tx.staged_path) {
            tracing::warn!(
                "Could not give {} the owner of {}: {e}",
                tx.staged_path.display(),
                tx.target_path.display()
            );
        }
    }

    fn discard_staged(&self, tx: &InstallTransaction) {
        self.remove_quietly(&tx.staged_path);
    }

    fn remove_quietly(&self, path: &Path) {
        if !self.fs.exists(path) {
            return;
        }
        if let Err(e) = self.fs.remove(path) {
            tracing::warn!("Could not remove {}: {e}", path.display());
        }
    }

    fn install_error(&self, message: String) -> UpdateError {
        UpdateError::Install {
            target: self.target.clone(),
            message,
            rolled_back: false,
        }
    }
}
