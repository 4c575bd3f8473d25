// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Invoker authentication middleware for the sync trigger.

use crate::services::google_oidc::OidcError;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Require a valid Google OIDC token from the configured invoker.
///
/// Passes everything through when no invoker service account is configured
/// (Cloud Run IAM is then the only gate).
pub async fn require_invoker_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(verifier) = state.oidc_verifier.as_ref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request.headers().get(header::AUTHORIZATION);

    let invoker = verifier
        .verify_invoker_token(auth_header)
        .await
        .map_err(|err| match err {
            OidcError::Forbidden(reason) => {
                tracing::warn!(reason = %reason, "Blocked sync trigger: invalid OIDC token");
                StatusCode::FORBIDDEN
            }
            OidcError::Transient(reason) => {
                tracing::error!(reason = %reason, "Invoker OIDC verification transient failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    tracing::debug!(
        email = %invoker.email,
        subject = %invoker.subject,
        "Invoker OIDC verification succeeded"
    );

    Ok(next.run(request).await)
}
