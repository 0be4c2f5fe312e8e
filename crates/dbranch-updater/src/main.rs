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

//! dbranch updater - Entry point for the `dbranch` binary
//!
//! Without arguments it performs a full self-update of the executable it was
//! invoked as. `--check` only reports whether a newer release exists. The
//! binary is named after the `dbranch-<os>-<arch>` release artifacts it
//! installs over itself; the rest of the CLI links `dbranch_updater` the same
//! way.

use anyhow::{Context, Result};
use clap::Parser;
use dbranch_updater::config::{CONFIG_PATH_ENV, load_config};
use dbranch_updater::platform::BINARY_NAME;
use dbranch_updater::{DEV_VERSION, Platform, UpdateOutcome, Updater, resolve_target};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Version stamped in by release builds.
const CURRENT_VERSION: &str = match option_env!("DBRANCH_VERSION") {
    Some(version) => version,
    None => DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = BINARY_NAME,
    version = CURRENT_VERSION,
    about = "Update dbranch to the latest release"
)]
struct Cli {
    /// Only check whether a newer release is available
    #[arg(long)]
    check: bool,

    /// Path to the updater config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dbranch_updater={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    let config = load_config(config_path.as_deref())
        .context("Failed to load updater config")?
        .with_env_overrides(|key| std::env::var(key).ok());

    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let target = resolve_target(&exe)?;
    let platform = Platform::current();
    info!(
        "dbranch {CURRENT_VERSION} at {} ({platform})",
        target.display()
    );

    let updater = Updater::new(&config, CURRENT_VERSION, &target, platform)
        .context("Failed to initialize updater")?;

    if cli.check {
        let check = updater.check()?;
        if check.update_available {
            println!(
                "Update available: {} -> {} ({})",
                check.current_version, check.latest.tag, check.latest.release_url
            );
        } else {
            println!("dbranch {} is up to date", check.current_version);
        }
        return Ok(());
    }

    match updater.run()? {
        UpdateOutcome::UpToDate { version } => {
            println!("dbranch {version} is already up to date");
        }
        UpdateOutcome::Updated { from, to, report } => {
            println!("Updated dbranch {from} -> {to}");
            if let Some(backup) = report.retained_backup {
                println!(
                    "The previous binary was kept at {}; you can delete it once the new version works",
                    backup.display()
                );
            }
        }
    }
    Ok(())
}
