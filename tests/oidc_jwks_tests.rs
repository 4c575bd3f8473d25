// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Invoker token verification against a mock Google JWKS endpoint.

use axum::http::HeaderValue;
use serde_json::{json, Value};
use strava_bigquery_sync::services::{GoogleOidcVerifier, OidcError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{TEST_INVOKER_EMAIL, TEST_SERVICE_URL};

fn jwks() -> Value {
    serde_json::from_str(include_str!("fixtures/oidc_test_jwks.json")).unwrap()
}

fn verifier_for(server: &MockServer) -> GoogleOidcVerifier {
    GoogleOidcVerifier::with_jwks_url(
        TEST_SERVICE_URL,
        TEST_INVOKER_EMAIL,
        &format!("{}/oauth2/v3/certs", server.uri()),
    )
    .unwrap()
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[tokio::test]
async fn test_jwks_fetched_once_and_cached() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/oauth2/v3/certs"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "public, max-age=3600")
                .set_body_json(jwks()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let verifier = verifier_for(&server);
    let header = bearer(&common::create_test_oidc_jwt(json!({})));

    let first = verifier.verify_invoker_token(Some(&header)).await.unwrap();
    let second = verifier.verify_invoker_token(Some(&header)).await.unwrap();

    assert_eq!(first.email, TEST_INVOKER_EMAIL);
    assert_eq!(second.subject, "1234567890");
    server.verify().await;
}

#[tokio::test]
async fn test_jwks_unavailable_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/oauth2/v3/certs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let verifier = verifier_for(&server);
    let header = bearer(&common::create_test_oidc_jwt(json!({})));

    let result = verifier.verify_invoker_token(Some(&header)).await;

    assert!(matches!(result, Err(OidcError::Transient(ref msg)) if msg.contains("503")));
}

#[tokio::test]
async fn test_unknown_kid_after_refresh_is_forbidden() {
    let server = MockServer::start().await;

    let mut keys = jwks();
    keys["keys"][0]["kid"] = json!("rotated-away");
    Mock::given(method("GET"))
        .and(path("/oauth2/v3/certs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys))
        .expect(2)
        .mount(&server)
        .await;

    let verifier = verifier_for(&server);
    let header = bearer(&common::create_test_oidc_jwt(json!({})));

    let result = verifier.verify_invoker_token(Some(&header)).await;

    assert!(matches!(result, Err(OidcError::Forbidden(_))));
    server.verify().await;
}
