// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava-BigQuery Sync Server
//!
//! Serves the sync trigger that Cloud Scheduler calls; each request runs
//! one full Strava to BigQuery load.

use std::sync::Arc;
use strava_bigquery_sync::{
    config::{Config, SecretSource},
    services::{
        BigQueryOptions, BigQueryWarehouse, EnvSecretStore, GoogleOidcVerifier,
        SecretManagerStore, SecretStore, StravaClient, SyncService,
    },
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        destination = %config.destination(),
        "Starting Strava-BigQuery sync service"
    );

    let secrets: Arc<dyn SecretStore> = match config.secret_source {
        SecretSource::SecretManager => {
            tracing::info!(project = %config.secret_project_id, "Using Secret Manager");
            Arc::new(SecretManagerStore::new().await?)
        }
        SecretSource::Env => {
            tracing::info!("Reading Strava secrets from environment variables");
            Arc::new(EnvSecretStore)
        }
    };

    let strava = StravaClient::from_config(&config)?;
    let warehouse = Arc::new(BigQueryWarehouse::new(BigQueryOptions::from_config(&config)).await?);
    tracing::info!(
        wait_for_load_job = config.wait_for_load_job,
        "BigQuery client initialized"
    );

    let oidc_verifier = match (&config.invoker_service_account, &config.service_url) {
        (Some(email), Some(audience)) => Some(Arc::new(GoogleOidcVerifier::new(audience, email)?)),
        _ => {
            tracing::warn!("INVOKER_SERVICE_ACCOUNT not set; sync trigger is unauthenticated");
            None
        }
    };

    let sync_service = SyncService::new(config.clone(), secrets, strava, warehouse);
    let state = Arc::new(AppState::new(config.clone(), sync_service, oidc_verifier));

    let app = strava_bigquery_sync::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("strava_bigquery_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
