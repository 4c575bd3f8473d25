// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
///
/// Each sync stage fails with its own variant; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Secret {name} unavailable: {reason}")]
    SecretUnavailable { name: String, reason: String },

    #[error("Strava token exchange failed: {0}")]
    AuthExchangeFailed(String),

    #[error("Strava activity fetch failed: {0}")]
    FetchFailed(String),

    #[error("BigQuery load failed: {0}")]
    LoadFailed(String),

    #[error("A sync run is already in progress")]
    SyncInProgress,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker message for HTTP 429 from Strava.
    pub const STRAVA_RATE_LIMIT: &'static str = "Rate limit exceeded";
    /// Marker message for HTTP 401 from Strava.
    pub const STRAVA_TOKEN_REJECTED: &'static str = "Access token rejected";

    pub(crate) fn secret(name: &str, reason: impl std::fmt::Display) -> Self {
        AppError::SecretUnavailable {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable kind, used in the JSON error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::SecretUnavailable { .. } => "secret_unavailable",
            AppError::AuthExchangeFailed(_) => "auth_exchange_failed",
            AppError::FetchFailed(_) => "fetch_failed",
            AppError::LoadFailed(_) => "load_failed",
            AppError::SyncInProgress => "sync_in_progress",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::SecretUnavailable { .. } | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::AuthExchangeFailed(_)
            | AppError::FetchFailed(_)
            | AppError::LoadFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::SyncInProgress => StatusCode::CONFLICT,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let details = match &self {
            AppError::SyncInProgress => None,
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                None
            }
            other => {
                tracing::error!(kind = other.kind(), error = %other, "Sync run failed");
                Some(other.to_string())
            }
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type Result<T> = std::result::Result<T, AppError>;
