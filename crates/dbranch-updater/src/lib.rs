// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of dbranch.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! dbranch updater - self-update for the dbranch CLI
//!
//! Checks the release registry, downloads the binary for the running
//! platform, verifies it against its published SHA256 manifest and replaces
//! the running executable, rolling back when the replacement fails.

pub mod config;
pub mod downloader;
pub mod error;
pub mod installer;
pub mod platform;
pub mod release_checker;
pub mod telemetry;
pub mod updater;
pub mod verifier;
pub mod version;

pub use config::{UpdaterConfig, load_config};
pub use error::{UpdateError, UpdateStage};
pub use installer::{BinaryInstaller, InstallPhase, InstallReport};
pub use platform::{InstallMode, Platform};
pub use updater::{CheckOutcome, UpdateOutcome, Updater, resolve_target};
pub use version::{DEV_VERSION, needs_update};
