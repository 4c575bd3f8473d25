// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The sync run: secrets, token exchange, activity fetch, warehouse load.
//!
//! Stages run strictly in sequence and any failure aborts the run; the
//! destination table is only touched by the final stage.

use crate::config::{Config, TableRef};
use crate::error::AppError;
use crate::services::bigquery::Warehouse;
use crate::services::secrets::{load_credentials, SecretStore};
use crate::services::strava::{StravaClient, TokenGrant};
use std::sync::Arc;

/// Message returned to the invoker after a successful run.
pub const COMPLETION_MESSAGE: &str = "Strava API Job completed.";

/// Summary of one successful run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pages: u32,
    pub records: usize,
    pub job_id: String,
    pub job_completed: bool,
    pub destination: TableRef,
}

/// Runs the full Strava to BigQuery sync.
#[derive(Clone)]
pub struct SyncService {
    config: Config,
    secrets: Arc<dyn SecretStore>,
    strava: StravaClient,
    warehouse: Arc<dyn Warehouse>,
}

impl SyncService {
    pub fn new(
        config: Config,
        secrets: Arc<dyn SecretStore>,
        strava: StravaClient,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            config,
            secrets,
            strava,
            warehouse,
        }
    }

    /// Execute one run.
    pub async fn run(&self) -> Result<SyncReport, AppError> {
        let credentials = load_credentials(self.secrets.as_ref(), &self.config).await?;

        let grant = self.strava.refresh_access_token(&credentials).await?;
        let rotated = grant
            .rotated_refresh_token(credentials.refresh_token.expose())
            .is_some();
        tracing::info!(rotated, expires_at = ?grant.expires_at, "Retrieved access token");

        if rotated {
            self.handle_rotated_refresh_token(&grant).await;
        }

        let fetch = self.strava.fetch_all_activities(&grant.access_token).await?;

        let destination = self.config.destination();
        let job = self
            .warehouse
            .load_truncate(&fetch.activities, &destination)
            .await?;

        Ok(SyncReport {
            pages: fetch.pages,
            records: fetch.activities.len(),
            job_id: job.job_id,
            job_completed: job.completed,
            destination,
        })
    }

    /// Strava may hand back a new refresh token; the stored one stops working
    /// once it does. Persisting it is opt-in and never fails the run.
    async fn handle_rotated_refresh_token(&self, grant: &TokenGrant) {
        let Some(new_token) = grant.refresh_token.as_deref() else {
            return;
        };
        let secret_name = &self.config.secret_names.refresh_token;

        if !self.config.persist_rotated_refresh_token {
            tracing::warn!(
                secret = %secret_name,
                "Strava rotated the refresh token; discarding it (persistence is off)"
            );
            return;
        }

        match self
            .secrets
            .add_version(&self.config.secret_project_id, secret_name, new_token)
            .await
        {
            Ok(()) => tracing::info!(secret = %secret_name, "Stored rotated refresh token"),
            Err(e) => tracing::warn!(
                error = %e,
                secret = %secret_name,
                "Failed to store rotated refresh token"
            ),
        }
    }
}
