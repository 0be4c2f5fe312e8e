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

//! Telemetry module for reporting update events

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum UpdateEvent {
    CheckCompleted {
        current_version: String,
        latest_version: String,
        update_available: bool,
    },
    UpdateStarted {
        from_version: String,
        to_version: String,
    },
    UpdateCompleted {
        from_version: String,
        to_version: String,
        duration_secs: u64,
    },
    UpdateFailed {
        from_version: String,
        stage: Option<String>,
        error: String,
    },
    RollbackCompleted {
        restored_version: String,
    },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a UpdateEvent,
}

/// Serialize `event` into one timestamped JSON line.
pub fn render_event(event: &UpdateEvent) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope {
        timestamp: Utc::now(),
        event,
    })
}

/// Log an update event. Never fails the caller.
pub fn report_event(event: &UpdateEvent) {
    match render_event(event) {
        Ok(json) => tracing::info!("Telemetry event: {json}"),
        Err(e) => tracing::warn!("Failed to serialize telemetry event: {e}"),
    }
}
