// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Built once at startup and handed to each sync stage by reference.

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STRAVA_API_URL: &str = "https://www.strava.com/api/v3";
pub const DEFAULT_STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
pub const DEFAULT_BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com";

/// Where the three Strava credentials are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// Google Secret Manager (production).
    SecretManager,
    /// Environment variables named after each secret (local development).
    Env,
}

impl FromStr for SecretSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "secret-manager" | "secretmanager" | "gcp" => Ok(Self::SecretManager),
            "env" => Ok(Self::Env),
            _ => Err(ConfigError::Invalid("SECRET_SOURCE", s.to_string())),
        }
    }
}

/// Fully-qualified BigQuery destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Names of the three Strava secrets in the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// GCP project holding the destination dataset
    pub gcp_project_id: String,
    /// GCP project holding the Strava secrets
    pub secret_project_id: String,
    pub bq_dataset: String,
    pub bq_table: String,
    /// BigQuery job location (e.g. "US"), if the dataset is not multi-region default
    pub bq_location: Option<String>,
    pub secret_names: SecretNames,
    pub secret_source: SecretSource,

    pub strava_api_url: String,
    pub strava_token_url: String,
    pub bigquery_api_url: String,

    /// Upper bound on activity pages fetched in a single run
    pub strava_max_pages: u32,
    /// Per-request timeout for every outbound HTTP call
    pub http_timeout: Duration,

    /// Poll the load job until BigQuery reports it DONE
    pub wait_for_load_job: bool,
    pub load_poll_interval: Duration,
    pub load_poll_attempts: u32,

    /// Write a rotated refresh token back as a new secret version
    pub persist_rotated_refresh_token: bool,

    /// Service account Cloud Scheduler signs its OIDC tokens as
    pub invoker_service_account: Option<String>,
    /// Public URL of this service (OIDC audience)
    pub service_url: Option<String>,
    pub port: u16,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            gcp_project_id: "test-project".to_string(),
            secret_project_id: "test-project".to_string(),
            bq_dataset: "strava".to_string(),
            bq_table: "activities".to_string(),
            bq_location: None,
            secret_names: SecretNames {
                client_id: "strava_clientid".to_string(),
                client_secret: "strava_clientsecret".to_string(),
                refresh_token: "strava_refreshtoken".to_string(),
            },
            secret_source: SecretSource::Env,
            strava_api_url: DEFAULT_STRAVA_API_URL.to_string(),
            strava_token_url: DEFAULT_STRAVA_TOKEN_URL.to_string(),
            bigquery_api_url: DEFAULT_BIGQUERY_API_URL.to_string(),
            strava_max_pages: 1000,
            http_timeout: Duration::from_secs(60),
            wait_for_load_job: false,
            load_poll_interval: Duration::from_millis(0),
            load_poll_attempts: 3,
            persist_rotated_refresh_token: false,
            invoker_service_account: None,
            service_url: None,
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let gcp_project_id =
            env::var("GCP_PROJECT_ID").map_err(|_| ConfigError::Missing("GCP_PROJECT_ID"))?;
        let secret_project_id =
            env::var("SECRET_PROJECT_ID").unwrap_or_else(|_| gcp_project_id.clone());

        let invoker_service_account = optional_var("INVOKER_SERVICE_ACCOUNT");
        let service_url = optional_var("SERVICE_URL");
        if invoker_service_account.is_some() && service_url.is_none() {
            return Err(ConfigError::Missing("SERVICE_URL"));
        }

        Ok(Self {
            gcp_project_id,
            secret_project_id,
            bq_dataset: env::var("BQ_DATASET").unwrap_or_else(|_| "strava".to_string()),
            bq_table: env::var("BQ_TABLE").unwrap_or_else(|_| "activities".to_string()),
            bq_location: optional_var("BQ_LOCATION"),
            secret_names: SecretNames {
                client_id: env::var("STRAVA_CLIENT_ID_SECRET")
                    .unwrap_or_else(|_| "strava_clientid".to_string()),
                client_secret: env::var("STRAVA_CLIENT_SECRET_SECRET")
                    .unwrap_or_else(|_| "strava_clientsecret".to_string()),
                refresh_token: env::var("STRAVA_REFRESH_TOKEN_SECRET")
                    .unwrap_or_else(|_| "strava_refreshtoken".to_string()),
            },
            secret_source: match optional_var("SECRET_SOURCE") {
                Some(v) => v.parse()?,
                None => SecretSource::SecretManager,
            },
            strava_api_url: env::var("STRAVA_API_URL")
                .unwrap_or_else(|_| DEFAULT_STRAVA_API_URL.to_string()),
            strava_token_url: env::var("STRAVA_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_STRAVA_TOKEN_URL.to_string()),
            bigquery_api_url: env::var("BIGQUERY_API_URL")
                .unwrap_or_else(|_| DEFAULT_BIGQUERY_API_URL.to_string()),
            strava_max_pages: parse_var("STRAVA_MAX_PAGES", 1000)?,
            http_timeout: Duration::from_secs(parse_nonzero_var("HTTP_TIMEOUT_SECS", 60)?),
            wait_for_load_job: parse_bool_var("WAIT_FOR_LOAD_JOB", true)?,
            load_poll_interval: Duration::from_millis(parse_var("LOAD_POLL_INTERVAL_MS", 2000)?),
            load_poll_attempts: parse_nonzero_var("LOAD_POLL_ATTEMPTS", 150)?,
            persist_rotated_refresh_token: parse_bool_var("PERSIST_ROTATED_REFRESH_TOKEN", false)?,
            invoker_service_account,
            service_url,
            port: parse_var("PORT", 8080)?,
        })
    }

    /// The destination table this service replaces on every run.
    pub fn destination(&self) -> TableRef {
        TableRef {
            project_id: self.gcp_project_id.clone(),
            dataset_id: self.bq_dataset.clone(),
            table_id: self.bq_table.clone(),
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

/// Like [`parse_var`] but rejects zero.
fn parse_nonzero_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
{
    let value = parse_var(key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid(key, "0".to_string()));
    }
    Ok(value)
}

fn parse_bool_var(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional_var(key) {
        Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}
