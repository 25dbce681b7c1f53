//! Connection settings read once at startup from the environment.

use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use url::Url;

use crate::error::{ConfigError, Violation};
use crate::secret::SecretReference;

pub const VAULT_BASE_URL: &str = "VAULT_BASE_URL";
pub const USER_SECRET_NAME: &str = "USER_SECRET_NAME";
pub const USER_SECRET_VERSION: &str = "USER_SECRET_VERSION";
pub const PASSWORD_SECRET_NAME: &str = "PASSWORD_SECRET_NAME";
pub const PASSWORD_SECRET_VERSION: &str = "PASSWORD_SECRET_VERSION";
pub const AZ_TENANT_ID: &str = "AZ_TENANT_ID";
pub const AZ_CLIENT_ID: &str = "AZ_CLIENT_ID";
pub const AZ_CLIENT_SECRET: &str = "AZ_CLIENT_SECRET";
pub const AZ_AUTHORITY_HOST: &str = "AZ_AUTHORITY_HOST";
pub const KEYVAULT_AUDIENCE: &str = "KEYVAULT_AUDIENCE";
pub const TOKEN_CACHE_DIR: &str = "TOKEN_CACHE_DIR";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_AUDIENCE: &str = "https://vault.azure.net";
const DEFAULT_CACHE_DIR: &str = "cache";

/// Merges a dotenv-style file into the process environment.
///
/// A missing file is fine; a file that exists but cannot be read or parsed is not.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!("Loaded environment file. path={:?}", path);
            Ok(())
        }
        Err(e) if e.not_found() => {
            debug!("Environment file does not exist. path={:?}", path);
            Ok(())
        }
        Err(source) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[derive(Clone)]
pub struct Config {
    vault_base_url: Url,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    user_secret: SecretReference,
    password_secret_name: String,
    password_secret_version: Option<String>,
    token_endpoint: Url,
    audience: String,
    cache_dir: PathBuf,
}

impl Config {
    /// Reads the configuration through `lookup`, collecting every violation
    /// before failing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let mut violations = Vec::new();
        let mut require = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                violations.push(Violation::Missing { name: key });
            }
            value.unwrap_or_default()
        };

        let vault_base_url = require(VAULT_BASE_URL);
        let user_secret_name = require(USER_SECRET_NAME);
        let password_secret_name = require(PASSWORD_SECRET_NAME);
        let tenant_id = require(AZ_TENANT_ID);
        let client_id = require(AZ_CLIENT_ID);
        let client_secret = require(AZ_CLIENT_SECRET);

        let vault_base_url = parse_url(VAULT_BASE_URL, &vault_base_url, &mut violations);
        let authority = get(AZ_AUTHORITY_HOST).unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_owned());
        let token_endpoint = parse_url(
            AZ_AUTHORITY_HOST,
            &format!("{}/{}/oauth2/v2.0/token", authority.trim_end_matches('/'), tenant_id),
            &mut violations,
        );

        match (vault_base_url, token_endpoint) {
            (Some(vault_base_url), Some(token_endpoint)) if violations.is_empty() => Ok(Self {
                vault_base_url,
                tenant_id,
                client_id,
                client_secret,
                user_secret: SecretReference::new(user_secret_name, get(USER_SECRET_VERSION)),
                password_secret_name,
                password_secret_version: get(PASSWORD_SECRET_VERSION),
                token_endpoint,
                audience: get(KEYVAULT_AUDIENCE).unwrap_or_else(|| DEFAULT_AUDIENCE.to_owned()),
                cache_dir: get(TOKEN_CACHE_DIR)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            }),
            _ => Err(ConfigError::Invalid(violations)),
        }
    }

    pub fn vault_base_url(&self) -> &Url {
        &self.vault_base_url
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Location of the cached token for this client.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.token.json", self.client_id))
    }

    /// Secrets to fetch, in display order.
    ///
    /// The password secret is fetched at its current version first, then at
    /// the pinned version if one is configured.
    pub fn secret_references(&self) -> Vec<SecretReference> {
        let mut references = vec![
            self.user_secret.clone(),
            SecretReference::new(self.password_secret_name.clone(), None),
        ];
        if let Some(version) = &self.password_secret_version {
            references.push(SecretReference::new(
                self.password_secret_name.clone(),
                Some(version.clone()),
            ));
        }
        references
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("vault_base_url", &self.vault_base_url.as_str())
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_secret", &self.user_secret)
            .field("password_secret_name", &self.password_secret_name)
            .field("password_secret_version", &self.password_secret_version)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("audience", &self.audience)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

// Empty values were already reported as missing.
fn parse_url(name: &'static str, value: &str, violations: &mut Vec<Violation>) -> Option<Url> {
    if value.is_empty() {
        return None;
    }
    let reason = match Url::parse(value) {
        Ok(url) if !url.cannot_be_a_base() => return Some(url),
        Ok(_) => "cannot be used as a base URL".to_owned(),
        Err(e) => e.to_string(),
    };
    violations.push(Violation::Malformed { name, reason });
    None
}
