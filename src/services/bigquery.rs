// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! BigQuery bulk loader.
//!
//! Replaces the destination table with one NDJSON load job per run:
//! autodetected schema, `WRITE_TRUNCATE`, `CREATE_IF_NEEDED`. The data is
//! sent with the resumable upload protocol (session POST, then one PUT).

use crate::config::{Config, TableRef};
use crate::error::AppError;
use crate::models::activity::{to_ndjson, Activity};
use async_trait::async_trait;
use gcloud_sdk::GoogleAuthTokenGenerator;
use gcloud_sdk::TokenSourceType;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Destination for the fetched activity collection.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Replace the contents of `destination` with exactly `activities`.
    async fn load_truncate(
        &self,
        activities: &[Activity],
        destination: &TableRef,
    ) -> Result<LoadJob, AppError>;
}

/// A submitted load job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    pub location: Option<String>,
    /// True once BigQuery reported the job DONE without errors
    pub completed: bool,
}

/// Load-job settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct BigQueryOptions {
    pub base_url: String,
    pub location: Option<String>,
    pub timeout: Duration,
    pub wait_for_completion: bool,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
}

impl BigQueryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.bigquery_api_url.clone(),
            location: config.bq_location.clone(),
            timeout: config.http_timeout,
            wait_for_completion: config.wait_for_load_job,
            poll_interval: config.load_poll_interval,
            poll_attempts: config.load_poll_attempts,
        }
    }
}

/// BigQuery REST client.
#[derive(Clone)]
pub struct BigQueryWarehouse {
    http: reqwest::Client,
    options: BigQueryOptions,
    /// Google OAuth2 token source; `None` for the emulator and tests
    auth: Option<Arc<GoogleAuthTokenGenerator>>,
}

impl BigQueryWarehouse {
    /// Create a BigQuery client authenticated with Application Default Credentials.
    ///
    /// For local development against an emulator, set BIGQUERY_EMULATOR_HOST.
    pub async fn new(mut options: BigQueryOptions) -> Result<Self, AppError> {
        if let Ok(host) = std::env::var("BIGQUERY_EMULATOR_HOST") {
            tracing::info!(host = %host, "Using unauthenticated connection for BigQuery emulator");
            options.base_url = format!("http://{}", host.trim_end_matches('/'));
            return Self::unauthenticated(options);
        }

        let generator = GoogleAuthTokenGenerator::new(
            TokenSourceType::Default,
            vec![BIGQUERY_SCOPE.to_string()],
        )
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Google auth setup failed: {}", e)))?;

        let mut warehouse = Self::unauthenticated(options)?;
        warehouse.auth = Some(Arc::new(generator));
        Ok(warehouse)
    }

    /// Create a client that sends no Authorization header.
    pub fn unauthenticated(mut options: BigQueryOptions) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        options.base_url = options.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            options,
            auth: None,
        })
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, AppError> {
        let Some(auth) = &self.auth else {
            return Ok(request);
        };

        let token = auth
            .create_token()
            .await
            .map_err(|e| AppError::LoadFailed(format!("failed to obtain Google token: {}", e)))?;

        Ok(request.header(AUTHORIZATION, token.header_value()))
    }

    /// Open a resumable upload session for a new load job; returns the session URI.
    async fn start_upload(
        &self,
        destination: &TableRef,
        job_id: &str,
        content_length: usize,
    ) -> Result<String, AppError> {
        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs",
            self.options.base_url,
            urlencoding::encode(&destination.project_id)
        );

        let job = load_job_configuration(destination, job_id, self.options.location.as_deref());

        let request = self
            .http
            .post(&url)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", content_length.to_string())
            .json(&job);

        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| AppError::LoadFailed(format!("upload session request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "upload session").await);
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::LoadFailed("upload session has no Location header".to_string())
            })
    }

    /// Send the NDJSON payload to an open session; returns the created job.
    async fn upload(&self, session_url: &str, body: Vec<u8>) -> Result<JobResource, AppError> {
        let request = self
            .http
            .put(session_url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);

        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| AppError::LoadFailed(format!("upload request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "upload").await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::LoadFailed(format!("invalid job response: {}", e)))
    }

    async fn get_job(
        &self,
        project_id: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource, AppError> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.options.base_url,
            urlencoding::encode(project_id),
            urlencoding::encode(job_id)
        );

        let mut request = self.http.get(&url);
        if let Some(location) = location {
            request = request.query(&[("location", location)]);
        }

        let response = self
            .authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| AppError::LoadFailed(format!("job status request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "job status").await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::LoadFailed(format!("invalid job response: {}", e)))
    }

    /// Poll a job until it is DONE, failing on a job error or after
    /// `poll_attempts` polls.
    async fn wait_for_job(&self, project_id: &str, job: &LoadJob) -> Result<(), AppError> {
        for attempt in 1..=self.options.poll_attempts {
            let resource = self
                .get_job(project_id, &job.job_id, job.location.as_deref())
                .await?;
            let status = resource.status.unwrap_or_default();

            if let Some(err) = status.error_result {
                return Err(AppError::LoadFailed(format!(
                    "job {} failed: {}",
                    job.job_id,
                    err.describe()
                )));
            }

            if status.state.as_deref() == Some("DONE") {
                return Ok(());
            }

            tracing::debug!(
                job_id = %job.job_id,
                attempt,
                state = status.state.as_deref().unwrap_or("UNKNOWN"),
                "Load job still running"
            );
            if attempt < self.options.poll_attempts {
                tokio::time::sleep(self.options.poll_interval).await;
            }
        }

        Err(AppError::LoadFailed(format!(
            "job {} did not finish after {} status checks",
            job.job_id, self.options.poll_attempts
        )))
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn load_truncate(
        &self,
        activities: &[Activity],
        destination: &TableRef,
    ) -> Result<LoadJob, AppError> {
        tracing::info!(
            destination = %destination,
            records = activities.len(),
            "Loading activities into BigQuery"
        );

        let body = to_ndjson(activities)
            .map_err(|e| AppError::LoadFailed(format!("failed to encode records: {}", e)))?;

        let job_id = new_job_id();
        let session_url = self.start_upload(destination, &job_id, body.len()).await?;
        let resource = self.upload(&session_url, body).await?;

        let reference = resource
            .job_reference
            .ok_or_else(|| AppError::LoadFailed("response has no jobReference".to_string()))?;

        if let Some(err) = resource.status.and_then(|s| s.error_result) {
            return Err(AppError::LoadFailed(format!(
                "job {} rejected: {}",
                reference.job_id,
                err.describe()
            )));
        }

        let mut job = LoadJob {
            job_id: reference.job_id,
            location: reference.location.or_else(|| self.options.location.clone()),
            completed: false,
        };

        tracing::info!(job_id = %job.job_id, destination = %destination, "Launched load job");

        if self.options.wait_for_completion {
            self.wait_for_job(&destination.project_id, &job).await?;
            job.completed = true;
            tracing::info!(job_id = %job.job_id, "Load job completed");
        }

        Ok(job)
    }
}

/// Job resource body for a truncate-and-write NDJSON load.
pub fn load_job_configuration(
    destination: &TableRef,
    job_id: &str,
    location: Option<&str>,
) -> serde_json::Value {
    let mut job_reference = serde_json::json!({
        "projectId": destination.project_id,
        "jobId": job_id,
    });
    if let Some(location) = location {
        job_reference["location"] = serde_json::Value::String(location.to_string());
    }

    serde_json::json!({
        "jobReference": job_reference,
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": destination.project_id,
                    "datasetId": destination.dataset_id,
                    "tableId": destination.table_id,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_TRUNCATE",
                "createDisposition": "CREATE_IF_NEEDED",
                "autodetect": true,
            }
        }
    })
}

/// Client-side job ID, unique per run.
fn new_job_id() -> String {
    format!(
        "strava_load_{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%6fZ")
    )
}

async fn error_from_response(response: reqwest::Response, step: &str) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or(body);

    AppError::LoadFailed(format!("{} returned HTTP {}: {}", step, status, message))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: Option<JobReference>,
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: Option<String>,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}
