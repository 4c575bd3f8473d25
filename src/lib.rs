// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava-BigQuery sync: load a Strava activity history into BigQuery
//!
//! Each run reads OAuth credentials from Secret Manager, exchanges the
//! refresh token for an access token, pages through every activity, and
//! replaces the destination table with the result.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use services::{GoogleOidcVerifier, SyncService};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub sync_service: SyncService,
    /// Present when INVOKER_SERVICE_ACCOUNT is configured
    pub oidc_verifier: Option<Arc<GoogleOidcVerifier>>,
    /// Held for the duration of a run
    pub sync_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(
        config: Config,
        sync_service: SyncService,
        oidc_verifier: Option<Arc<GoogleOidcVerifier>>,
    ) -> Self {
        Self {
            config,
            sync_service,
            oidc_verifier,
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }
}
