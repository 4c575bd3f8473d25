// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - the sync stages and their backends.

pub mod bigquery;
pub mod google_oidc;
pub mod secrets;
pub mod strava;
pub mod sync;

pub use bigquery::{BigQueryOptions, BigQueryWarehouse, LoadJob, Warehouse};
pub use google_oidc::{GoogleOidcVerifier, OidcError, VerifiedInvoker};
pub use secrets::{EnvSecretStore, SecretManagerStore, SecretStore};
pub use strava::{ActivityFetch, StravaClient, TokenGrant};
pub use sync::{SyncReport, SyncService};
