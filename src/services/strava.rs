// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for the sync run.
//!
//! Handles:
//! - Refresh-token exchange for a short-lived access token
//! - Paging through the athlete's full activity history
//! - Rate limit / rejected token detection

use crate::config::Config;
use crate::error::AppError;
use crate::models::{Activity, StravaCredentials};
use serde::Deserialize;
use std::time::Duration;

/// Fixed page size for the activities list endpoint (Strava's maximum).
pub const PAGE_SIZE: usize = 200;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    max_pages: u32,
}

impl StravaClient {
    /// Create a client against explicit endpoints.
    pub fn new(
        base_url: impl Into<String>,
        token_url: impl Into<String>,
        timeout: Duration,
        max_pages: u32,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            max_pages: max_pages.max(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            config.strava_api_url.clone(),
            config.strava_token_url.clone(),
            config.http_timeout,
            config.strava_max_pages,
        )
    }

    // ─── Token Exchange ──────────────────────────────────────────────────────

    /// Exchange the stored refresh token for a fresh access token.
    ///
    /// One POST, no retry.
    pub async fn refresh_access_token(
        &self,
        credentials: &StravaCredentials,
    ) -> Result<TokenGrant, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", credentials.client_id.expose()),
                ("client_secret", credentials.client_secret.expose()),
                ("grant_type", "refresh_token"),
                ("refresh_token", credentials.refresh_token.expose()),
            ])
            .send()
            .await
            .map_err(|e| AppError::AuthExchangeFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::AuthExchangeFailed(format!("failed to read body: {}", e)))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Strava token exchange failed");
            return Err(AppError::AuthExchangeFailed(format!("HTTP {}", status)));
        }

        let raw: TokenRefreshResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::AuthExchangeFailed(format!("invalid JSON response: {}", e)))?;

        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::AuthExchangeFailed("response has no access_token".to_string())
            })?;

        Ok(TokenGrant {
            access_token,
            refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
            expires_at: raw.expires_at,
        })
    }

    // ─── Activities ──────────────────────────────────────────────────────────

    /// Fetch a single page of the athlete's activities (1-based page number).
    pub async fn list_activities(
        &self,
        access_token: &str,
        page: u32,
    ) -> Result<Vec<Activity>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("page", page.to_string()), ("per_page", PAGE_SIZE.to_string())])
            .send()
            .await
            .map_err(|e| AppError::FetchFailed(format!("page {}: {}", page, e)))?;

        let body = check_response(response, page).await?;

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Array(items)) => {
                Ok(items.into_iter().map(Activity::from).collect())
            }
            Ok(_) => Err(AppError::FetchFailed(format!(
                "page {}: expected a JSON array",
                page
            ))),
            Err(e) => Err(AppError::FetchFailed(format!(
                "page {}: JSON parse error: {}",
                page, e
            ))),
        }
    }

    /// Page through the full activity history.
    ///
    /// Stops after the first page holding fewer than [`PAGE_SIZE`] records.
    /// Fails rather than returning a truncated history if `max_pages` full
    /// pages come back.
    pub async fn fetch_all_activities(
        &self,
        access_token: &str,
    ) -> Result<ActivityFetch, AppError> {
        let mut activities = Vec::new();
        let mut page = 1u32;

        loop {
            let batch = self.list_activities(access_token, page).await?;
            let batch_len = batch.len();
            let last_id = batch.last().and_then(Activity::id);
            activities.extend(batch);

            tracing::debug!(
                page,
                count = batch_len,
                total = activities.len(),
                last_id,
                "Fetched page"
            );

            if batch_len < PAGE_SIZE {
                break;
            }

            if page >= self.max_pages {
                tracing::error!(
                    pages = page,
                    total = activities.len(),
                    "Activity pagination did not terminate"
                );
                return Err(AppError::FetchFailed(format!(
                    "exceeded maximum of {} pages without a partial page",
                    self.max_pages
                )));
            }

            page += 1;
        }

        tracing::info!(count = activities.len(), pages = page, "Fetched activities");

        Ok(ActivityFetch {
            activities,
            pages: page,
        })
    }
}

/// Check response status and return the body text if successful.
async fn check_response(response: reqwest::Response, page: u32) -> Result<String, AppError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            tracing::warn!("Strava rate limit hit (429)");
            return Err(AppError::FetchFailed(AppError::STRAVA_RATE_LIMIT.to_string()));
        }

        if status.as_u16() == 401 {
            return Err(AppError::FetchFailed(
                AppError::STRAVA_TOKEN_REJECTED.to_string(),
            ));
        }

        return Err(AppError::FetchFailed(format!(
            "page {}: HTTP {}: {}",
            page, status, body
        )));
    }

    response
        .text()
        .await
        .map_err(|e| AppError::FetchFailed(format!("page {}: failed to read body: {}", page, e)))
}

/// Raw token refresh response; every field is optional so a missing
/// `access_token` is reported as such rather than as a parse error.
#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

/// Result of a refresh-token grant.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    /// Refresh token returned alongside, possibly rotated
    pub refresh_token: Option<String>,
    /// Unix timestamp; informational only
    pub expires_at: Option<i64>,
}

impl TokenGrant {
    /// The refresh token returned by Strava, if it differs from `current`.
    pub fn rotated_refresh_token(&self, current: &str) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| *t != current)
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// All activities from one run, in API order.
#[derive(Debug, Clone)]
pub struct ActivityFetch {
    pub activities: Vec<Activity>,
    /// Number of page requests made
    pub pages: u32,
}
