// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Secret store access for the Strava OAuth credentials.
//!
//! Production reads the latest version of each secret from Google Secret
//! Manager. Local development can read the same names from environment
//! variables instead.

use crate::config::Config;
use crate::error::AppError;
use crate::models::{CredentialKind, Secret, StravaCredentials};
use async_trait::async_trait;
use google_cloud_secretmanager_v1::client::SecretManagerService;
use google_cloud_secretmanager_v1::model::SecretPayload;

/// A versioned secret store.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Return the payload of the latest version of `secret_name`.
    async fn access_latest(&self, project_id: &str, secret_name: &str)
        -> Result<String, AppError>;

    /// Add a new version holding `value` to an existing secret.
    async fn add_version(
        &self,
        project_id: &str,
        secret_name: &str,
        value: &str,
    ) -> Result<(), AppError>;
}

/// Load the three Strava credentials, one lookup each, in a fixed order.
///
/// Stops at the first secret that cannot be read.
pub async fn load_credentials(
    store: &dyn SecretStore,
    config: &Config,
) -> Result<StravaCredentials, AppError> {
    let names = &config.secret_names;
    let project = config.secret_project_id.as_str();

    let client_id = load_one(store, project, &names.client_id, CredentialKind::ClientId).await?;
    let client_secret =
        load_one(store, project, &names.client_secret, CredentialKind::ClientSecret).await?;
    let refresh_token =
        load_one(store, project, &names.refresh_token, CredentialKind::RefreshToken).await?;

    Ok(StravaCredentials {
        client_id,
        client_secret,
        refresh_token,
    })
}

async fn load_one(
    store: &dyn SecretStore,
    project_id: &str,
    secret_name: &str,
    kind: CredentialKind,
) -> Result<Secret, AppError> {
    let value = store.access_latest(project_id, secret_name).await?;
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::secret(secret_name, "secret payload is empty"));
    }

    tracing::info!(secret = secret_name, kind = kind.as_str(), "Retrieved secret");
    Ok(Secret::new(value))
}

// ─────────────────────────────────────────────────────────────────────────────
// Google Secret Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Secret store backed by Google Secret Manager.
#[derive(Clone)]
pub struct SecretManagerStore {
    client: SecretManagerService,
}

impl SecretManagerStore {
    /// Connect using Application Default Credentials.
    pub async fn new() -> Result<Self, AppError> {
        let client = SecretManagerService::builder().build().await.map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Secret Manager client error: {}", e))
        })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SecretStore for SecretManagerStore {
    async fn access_latest(&self, project_id: &str, secret_name: &str) -> Result<String, AppError> {
        let name = format!(
            "projects/{}/secrets/{}/versions/latest",
            project_id, secret_name
        );

        let response = self
            .client
            .access_secret_version()
            .set_name(name)
            .send()
            .await
            .map_err(|e| AppError::secret(secret_name, e))?;

        let payload = response
            .payload
            .ok_or_else(|| AppError::secret(secret_name, "response has no payload"))?;

        decode_payload(secret_name, &payload.data)
    }

    async fn add_version(
        &self,
        project_id: &str,
        secret_name: &str,
        value: &str,
    ) -> Result<(), AppError> {
        let parent = format!("projects/{}/secrets/{}", project_id, secret_name);

        let version = self
            .client
            .add_secret_version()
            .set_parent(parent)
            .set_payload(SecretPayload::new().set_data(value.to_string()))
            .send()
            .await
            .map_err(|e| AppError::secret(secret_name, e))?;

        tracing::info!(secret = secret_name, version = %version.name, "Added secret version");
        Ok(())
    }
}

fn decode_payload(secret_name: &str, data: &[u8]) -> Result<String, AppError> {
    String::from_utf8(data.to_vec())
        .map_err(|_| AppError::secret(secret_name, "payload is not valid UTF-8"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment variables (local development)
// ─────────────────────────────────────────────────────────────────────────────

/// Secret store reading `strava_clientid` from `STRAVA_CLIENTID`, etc.
///
/// Cloud Run secret bindings expose secrets the same way, so this also works
/// when secrets are mounted as env vars instead of read through the API.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn env_key(secret_name: &str) -> String {
        secret_name.to_ascii_uppercase().replace('-', "_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn access_latest(
        &self,
        _project_id: &str,
        secret_name: &str,
    ) -> Result<String, AppError> {
        let key = Self::env_key(secret_name);
        std::env::var(&key)
            .map_err(|_| AppError::secret(secret_name, format!("{} is not set", key)))
    }

    async fn add_version(
        &self,
        _project_id: &str,
        secret_name: &str,
        _value: &str,
    ) -> Result<(), AppError> {
        Err(AppError::secret(secret_name, "environment secrets are read-only"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_key_uppercases_and_replaces_dashes() {
        assert_eq!(EnvSecretStore::env_key("strava_clientid"), "STRAVA_CLIENTID");
        assert_eq!(EnvSecretStore::env_key("strava-refresh-token"), "STRAVA_REFRESH_TOKEN");
    }

    #[tokio::test]
    async fn env_store_reads_and_trims() {
        std::env::set_var("UNIT_TEST_STRAVA_SECRET", "  value\n");
        let config = Config {
            secret_names: crate::config::SecretNames {
                client_id: "unit_test_strava_secret".to_string(),
                client_secret: "unit_test_strava_secret".to_string(),
                refresh_token: "unit_test_strava_secret".to_string(),
            },
            ..Config::default()
        };

        let creds = load_credentials(&EnvSecretStore, &config).await.unwrap();
        assert_eq!(creds.refresh_token.expose(), "value");
    }

    #[test]
    fn non_utf8_payload_is_secret_unavailable() {
        let err = decode_payload("strava_clientsecret", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(
            err,
            AppError::SecretUnavailable { ref name, ref reason }
                if name == "strava_clientsecret" && reason.contains("UTF-8")
        ));
        assert_eq!(decode_payload("s", b"abc").unwrap(), "abc");
    }

    #[tokio::test]
    async fn whitespace_only_secret_is_rejected() {
        std::env::set_var("UNIT_TEST_BLANK_SECRET", " \n\t ");
        let config = Config {
            secret_names: crate::config::SecretNames {
                client_id: "unit_test_blank_secret".to_string(),
                client_secret: "unit_test_blank_secret".to_string(),
                refresh_token: "unit_test_blank_secret".to_string(),
            },
            ..Config::default()
        };

        let err = load_credentials(&EnvSecretStore, &config).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SecretUnavailable { ref name, ref reason }
                if name == "unit_test_blank_secret" && reason.contains("empty")
        ));
    }

    #[tokio::test]
    async fn env_store_missing_is_secret_unavailable() {
        let err = EnvSecretStore
            .access_latest("p", "definitely_not_set_secret")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::SecretUnavailable { ref name, .. } if name == "definitely_not_set_secret"
        ));
    }
}
