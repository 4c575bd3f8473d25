// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use strava_bigquery_sync::config::{Config, TableRef};
use strava_bigquery_sync::error::AppError;
use strava_bigquery_sync::models::activity::to_ndjson;
use strava_bigquery_sync::models::Activity;
use strava_bigquery_sync::routes::create_router;
use strava_bigquery_sync::services::{
    GoogleOidcVerifier, LoadJob, SecretStore, StravaClient, SyncService, Warehouse,
};
use strava_bigquery_sync::AppState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[allow(dead_code)]
pub const TEST_INVOKER_EMAIL: &str = "scheduler@test-project.iam.gserviceaccount.com";
#[allow(dead_code)]
pub const TEST_SERVICE_URL: &str = "https://strava-sync.example.run.app";
#[allow(dead_code)]
pub const TEST_KID: &str = "test-kid";

/// Config pointing every Strava and BigQuery URL at the mock server.
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> Config {
    Config {
        strava_api_url: format!("{}/api/v3", server.uri()),
        strava_token_url: format!("{}/oauth/token", server.uri()),
        bigquery_api_url: server.uri(),
        ..Config::default()
    }
}

/// Secrets matching the default secret names in `Config::default()`.
#[allow(dead_code)]
pub fn default_secrets() -> InMemorySecretStore {
    InMemorySecretStore::new([
        ("strava_clientid", "12345"),
        ("strava_clientsecret", "client-secret"),
        ("strava_refreshtoken", "refresh-token"),
    ])
}

/// A page of `count` fake activities with ids starting at `first_id`.
#[allow(dead_code)]
pub fn activities_page(first_id: u64, count: usize) -> Value {
    Value::Array(
        (0..count as u64)
            .map(|i| {
                json!({
                    "id": first_id + i,
                    "name": format!("Activity {}", first_id + i),
                    "sport_type": "Ride",
                    "distance": 1000.0 + i as f64,
                })
            })
            .collect(),
    )
}

/// Mount a successful token exchange returning `access-token`.
#[allow(dead_code)]
pub async fn mount_token_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": "access-token",
            "refresh_token": "refresh-token",
            "expires_at": 1_900_000_000,
        })))
        .mount(server)
        .await;
}

// ─── Fakes ───────────────────────────────────────────────────

/// In-memory secret store that records every lookup.
#[allow(dead_code)]
#[derive(Default)]
pub struct InMemorySecretStore {
    values: Mutex<HashMap<String, String>>,
    unavailable: HashSet<String>,
    fail_add_version: bool,
    pub lookups: Mutex<Vec<String>>,
    pub added: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl InMemorySecretStore {
    pub fn new<'a>(values: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Make lookups of `name` fail as if access were denied.
    pub fn with_unavailable(mut self, name: &str) -> Self {
        self.unavailable.insert(name.to_string());
        self
    }

    /// Make every `add_version` call fail.
    pub fn with_failing_add_version(mut self) -> Self {
        self.fail_add_version = true;
        self
    }

    pub fn value(&self, name: &str) -> Option<String> {
        self.values.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn access_latest(
        &self,
        _project_id: &str,
        secret_name: &str,
    ) -> Result<String, AppError> {
        self.lookups.lock().unwrap().push(secret_name.to_string());

        if self.unavailable.contains(secret_name) {
            return Err(AppError::SecretUnavailable {
                name: secret_name.to_string(),
                reason: "permission denied".to_string(),
            });
        }

        self.value(secret_name).ok_or_else(|| AppError::SecretUnavailable {
            name: secret_name.to_string(),
            reason: "not found".to_string(),
        })
    }

    async fn add_version(
        &self,
        _project_id: &str,
        secret_name: &str,
        value: &str,
    ) -> Result<(), AppError> {
        if self.fail_add_version {
            return Err(AppError::SecretUnavailable {
                name: secret_name.to_string(),
                reason: "permission denied on addVersion".to_string(),
            });
        }

        self.added
            .lock()
            .unwrap()
            .push((secret_name.to_string(), value.to_string()));
        self.values
            .lock()
            .unwrap()
            .insert(secret_name.to_string(), value.to_string());
        Ok(())
    }
}

/// One recorded load call.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct RecordedLoad {
    pub activities: Vec<Activity>,
    pub destination: TableRef,
    pub ndjson_lines: usize,
}

/// Warehouse fake that behaves like a truncate-and-write table.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingWarehouse {
    pub loads: Mutex<Vec<RecordedLoad>>,
    pub table: Mutex<Vec<Activity>>,
    pub fail_with: Option<String>,
}

#[allow(dead_code)]
impl RecordingWarehouse {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().unwrap().len()
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn load_truncate(
        &self,
        activities: &[Activity],
        destination: &TableRef,
    ) -> Result<LoadJob, AppError> {
        if let Some(message) = &self.fail_with {
            return Err(AppError::LoadFailed(message.clone()));
        }

        let ndjson = to_ndjson(activities).unwrap();
        let ndjson_lines = ndjson.iter().filter(|b| **b == b'\n').count();

        let mut loads = self.loads.lock().unwrap();
        loads.push(RecordedLoad {
            activities: activities.to_vec(),
            destination: destination.clone(),
            ndjson_lines,
        });
        *self.table.lock().unwrap() = activities.to_vec();

        Ok(LoadJob {
            job_id: format!("job_{}", loads.len()),
            location: None,
            completed: true,
        })
    }
}

// ─── App wiring ──────────────────────────────────────────────

#[allow(dead_code)]
pub fn sync_service(
    config: &Config,
    secrets: Arc<InMemorySecretStore>,
    warehouse: Arc<RecordingWarehouse>,
) -> SyncService {
    let strava = StravaClient::from_config(config).expect("Strava client should build");
    SyncService::new(config.clone(), secrets, strava, warehouse)
}

/// Create a test app; OIDC is enforced when `require_oidc` is set.
#[allow(dead_code)]
pub fn create_test_app(
    config: Config,
    secrets: Arc<InMemorySecretStore>,
    warehouse: Arc<RecordingWarehouse>,
    require_oidc: bool,
) -> (axum::Router, Arc<AppState>) {
    let verifier = require_oidc.then(|| {
        let public_pem = include_bytes!("../fixtures/oidc_test_key.pub.pem");
        let key = DecodingKey::from_rsa_pem(public_pem).expect("valid test public key");
        Arc::new(
            GoogleOidcVerifier::new_with_static_key(
                TEST_SERVICE_URL,
                TEST_INVOKER_EMAIL,
                TEST_KID,
                key,
            )
            .expect("static verifier"),
        )
    });

    let service = sync_service(&config, secrets, warehouse);
    let state = Arc::new(AppState::new(config, service, verifier));
    (create_router(state.clone()), state)
}

/// Sign an ID token with the test key; `overrides` replace default claims.
#[allow(dead_code)]
pub fn create_test_oidc_jwt(overrides: Value) -> String {
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": "https://accounts.google.com",
        "aud": TEST_SERVICE_URL,
        "sub": "1234567890",
        "email": TEST_INVOKER_EMAIL,
        "email_verified": true,
        "iat": now,
        "exp": now + 3600,
    });
    if let (Some(base), Some(extra)) = (claims.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());

    let private_pem = include_bytes!("../fixtures/oidc_test_key.pem");
    let key = EncodingKey::from_rsa_pem(private_pem).expect("valid test private key");
    encode(&header, &claims, &key).expect("token should encode")
}
