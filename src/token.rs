//! Service principal tokens and the on-disk cache that keeps them between runs.
//!
//! [`TokenCache::acquire`] returns a [`BearerCredential`] built from the cached
//! token when it is still valid for the requesting client, and otherwise asks
//! the [`TokenProvider`] for a fresh one and writes it back. Problems with the
//! cache file itself never fail an acquisition; they only cost a token request.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// Lifetime assumed when the identity provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Storage for serialized cache records.
pub trait TokenStore {
    /// Returns an error of kind `NotFound` when nothing is stored at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Stores cache records as files readable only by their owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTokenStore;

impl TokenStore for FileTokenStore {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = Path::new(&tmp_path);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let result = options
            .open(tmp_path)
            .and_then(|file| write_restricted(file, contents))
            .and_then(|()| fs::rename(tmp_path, path));
        if result.is_err() {
            let _ = fs::remove_file(tmp_path);
        }
        result
    }
}

fn write_restricted(mut file: fs::File, contents: &[u8]) -> io::Result<()> {
    #[cfg(unix)]
    {
        // mode() only applies when the file is created
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

/// Parameters of a client credentials grant.
#[derive(Clone, Copy)]
pub struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub token_endpoint: &'a Url,
    pub audience: &'a str,
}

impl fmt::Debug for TokenRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("audience", &self.audience)
            .finish()
    }
}

/// A token as returned by the identity provider.
#[derive(Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Option<Duration>,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

#[async_trait]
pub trait TokenProvider {
    async fn request_token(&self, request: &TokenRequest<'_>) -> Result<IssuedToken, AuthError>;
}

/// Requests tokens with the OAuth2 client credentials grant, sending the
/// client secret in the request body and asking for `{audience}/.default`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OAuthTokenProvider;

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn request_token(&self, request: &TokenRequest<'_>) -> Result<IssuedToken, AuthError> {
        let endpoint = request.token_endpoint.clone();
        let client = BasicClient::new(
            ClientId::new(request.client_id.to_owned()),
            Some(ClientSecret::new(request.client_secret.to_owned())),
            AuthUrl::from_url(endpoint.clone()),
            Some(TokenUrl::from_url(endpoint.clone())),
        )
        .set_auth_type(AuthType::RequestBody);

        let scope = format!("{}/.default", request.audience.trim_end_matches('/'));
        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(scope))
            .request_async(async_http_client)
            .await
            .with_context(|| format!("Failed to authenticate client {}", request.client_id))
            .map_err(|source| AuthError::TokenRequest {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(IssuedToken {
            access_token: token.access_token().secret().to_owned(),
            expires_in: token.expires_in(),
            refresh_token: token.refresh_token().map(|t| t.secret().to_owned()),
        })
    }
}

/// Persisted form of a token.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedToken {
    client_id: String,
    access_token: String,
    #[serde(with = "ts_seconds")]
    expires_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl CachedToken {
    fn issued(client_id: &str, token: IssuedToken, now: DateTime<Utc>) -> Self {
        let default_lifetime = chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME.as_secs() as i64);
        let expires_on = token
            .expires_in
            .and_then(|lifetime| chrono::Duration::from_std(lifetime).ok())
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| {
                if token.expires_in.is_some() {
                    warn!("Token lifetime {:?} is out of range, assuming {:?}", token.expires_in, DEFAULT_TOKEN_LIFETIME);
                }
                now + default_lifetime
            });
        Self {
            client_id: client_id.to_owned(),
            access_token: token.access_token,
            expires_on,
            refresh_token: token.refresh_token,
        }
    }

    fn is_valid_for(&self, client_id: &str, now: DateTime<Utc>) -> bool {
        self.client_id == client_id && now < self.expires_on
    }
}

/// An access token ready to be presented in an `Authorization` header.
#[derive(Clone)]
pub struct BearerCredential {
    token: String,
}

impl BearerCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Attaches the credential to an outgoing request.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerCredential(<redacted>)")
    }
}

/// Hands out bearer credentials, reusing the cached token while it is valid.
#[derive(Debug)]
pub struct TokenCache<K, S, P> {
    clock: K,
    store: S,
    provider: P,
}

impl TokenCache<SystemClock, FileTokenStore, OAuthTokenProvider> {
    /// Cache backed by the system clock, the filesystem and the real identity provider.
    pub fn system() -> Self {
        Self::new(SystemClock, FileTokenStore, OAuthTokenProvider)
    }
}

impl<K, S, P> TokenCache<K, S, P>
where
    K: Clock,
    S: TokenStore,
    P: TokenProvider + Sync,
{
    pub fn new(clock: K, store: S, provider: P) -> Self {
        Self {
            clock,
            store,
            provider,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn acquire(
        &self,
        request: &TokenRequest<'_>,
        cache_path: &Path,
    ) -> Result<BearerCredential, AuthError> {
        let start = Instant::now();

        if let Some(cached) = self.load(cache_path) {
            if cached.is_valid_for(request.client_id, self.clock.now()) {
                debug!("Token from cache took {:?}", start.elapsed());
                return Ok(BearerCredential::new(cached.access_token));
            }
            info!("Cached token is expired or belongs to another client. path={:?}", cache_path);
        }

        let issued = self.provider.request_token(request).await?;
        let token = CachedToken::issued(request.client_id, issued, self.clock.now());
        self.save(cache_path, &token);
        debug!("Token from identity provider took {:?}", start.elapsed());

        Ok(BearerCredential::new(token.access_token))
    }

    fn load(&self, cache_path: &Path) -> Option<CachedToken> {
        let bytes = match self.store.read(cache_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Cache path does not exist. path={:?}", cache_path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read token cache, ignoring it. path={:?} error={}", cache_path, e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Failed to parse token cache, ignoring it. path={:?} error={}", cache_path, e);
                None
            }
        }
    }

    fn save(&self, cache_path: &Path, token: &CachedToken) {
        let result = serde_json::to_vec_pretty(token)
            .map_err(io::Error::from)
            .and_then(|contents| self.store.write(cache_path, &contents));
        match result {
            Ok(()) => info!("Saved token to cache. path={:?}", cache_path),
            Err(e) => warn!("Failed to save token to cache. path={:?} error={}", cache_path, e),
        }
    }
}
