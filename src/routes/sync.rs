// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync trigger route (called by Cloud Scheduler or by hand).

use crate::error::{AppError, Result};
use crate::services::sync::COMPLETION_MESSAGE;
use crate::AppState;
use axum::{extract::State, routing::get, Router};
use std::sync::Arc;

/// Trigger routes. `GET` and `POST` both start a run.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(run_sync).post(run_sync))
}

/// Run one full sync and return the completion message.
///
/// Runs never overlap; a trigger that arrives mid-run gets 409.
async fn run_sync(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    let _guard = state.sync_lock.try_lock().map_err(|_| {
        tracing::warn!("Sync trigger rejected: a run is already in progress");
        AppError::SyncInProgress
    })?;

    let started = std::time::Instant::now();
    tracing::info!(
        destination = %state.config.destination(),
        wait_for_load_job = state.config.wait_for_load_job,
        "Starting Strava sync run"
    );

    let report = state.sync_service.run().await?;

    tracing::info!(
        pages = report.pages,
        records = report.records,
        job_id = %report.job_id,
        job_completed = report.job_completed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Strava sync run finished"
    );

    Ok(COMPLETION_MESSAGE)
}
