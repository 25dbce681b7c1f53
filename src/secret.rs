use crate::client::KeyVaultClient;
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::serde::ts_seconds_option;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::Deserialize;
use std::fmt;

/// Identifies a stored secret, optionally pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    name: String,
    version: Option<String>,
}

impl SecretReference {
    /// An empty version means the store's current version.
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version: version.filter(|v| !v.is_empty()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Deserialize, Debug, Getters)]
#[getset(get = "pub")]
pub struct KeyVaultSecret {
    value: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: Option<KeyVaultSecretAttributes>,
}

#[derive(Deserialize, Debug, Getters)]
#[getset(get = "pub")]
pub struct KeyVaultSecretAttributes {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default, with = "ts_seconds_option")]
    created: Option<DateTime<Utc>>,
    #[serde(default, with = "ts_seconds_option")]
    updated: Option<DateTime<Utc>>,
}

/// Source of secret values.
#[async_trait]
pub trait SecretStore {
    async fn fetch(&self, reference: &SecretReference) -> Result<String, FetchError>;
}

impl KeyVaultClient {
    /// Gets a secret from the Key Vault.
    /// Note that the latest version is fetched. For a specific version, use `get_secret_with_version`.
    pub async fn get_secret(&self, secret_name: &str) -> Result<KeyVaultSecret, FetchError> {
        self.get_secret_with_version(secret_name, "").await
    }

    /// Gets a secret from the Key Vault with a specific version.
    /// An empty `secret_version_name` resolves to the latest version.
    pub async fn get_secret_with_version(
        &self,
        secret_name: &str,
        secret_version_name: &str,
    ) -> Result<KeyVaultSecret, FetchError> {
        let uri = self.resource_url(secret_name, &["secrets", secret_name, secret_version_name])?;
        let resp_body = self.get_authed(secret_name, uri).await?;
        serde_json::from_str::<KeyVaultSecret>(&resp_body).map_err(|source| FetchError::Decode {
            name: secret_name.to_owned(),
            source,
        })
    }
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    async fn fetch(&self, reference: &SecretReference) -> Result<String, FetchError> {
        let secret = self
            .get_secret_with_version(reference.name(), reference.version().unwrap_or_default())
            .await?;
        Ok(secret.value)
    }
}
