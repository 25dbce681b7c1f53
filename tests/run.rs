//! End-to-end runs against a mocked Key Vault with a real on-disk token cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use keyvault_fetch::{
    execute, AppError, AuthError, FileTokenStore, IssuedToken, KeyVaultClient, SystemClock,
    TokenCache, TokenProvider, TokenRequest,
};
use mockito::Matcher;

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenProvider for CountingProvider {
    async fn request_token(&self, _request: &TokenRequest<'_>) -> Result<IssuedToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(IssuedToken {
            access_token: "fresh-token".to_owned(),
            expires_in: Some(std::time::Duration::from_secs(3600)),
            refresh_token: None,
        })
    }
}

fn environment(vault_url: &str, cache_dir: &Path) -> HashMap<String, String> {
    [
        ("VAULT_BASE_URL", vault_url),
        ("USER_SECRET_NAME", "Username"),
        ("USER_SECRET_VERSION", "u1"),
        ("PASSWORD_SECRET_NAME", "Password"),
        ("PASSWORD_SECRET_VERSION", "v1"),
        ("AZ_TENANT_ID", "tenant"),
        ("AZ_CLIENT_ID", "client"),
        ("AZ_CLIENT_SECRET", "secret"),
        ("TOKEN_CACHE_DIR", cache_dir.to_str().unwrap()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

fn cache() -> TokenCache<SystemClock, FileTokenStore, CountingProvider> {
    TokenCache::new(SystemClock, FileTokenStore, CountingProvider::default())
}

fn connect(config: &keyvault_fetch::Config, credential: keyvault_fetch::BearerCredential) -> KeyVaultClient {
    KeyVaultClient::new(reqwest::Client::new(), config.vault_base_url().clone(), credential)
}

fn api_version() -> Matcher {
    Matcher::UrlEncoded("api-version".into(), "7.0".into())
}

#[tokio::test]
async fn cached_token_is_used_and_failed_lookup_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let expires_on = (Utc::now() + Duration::minutes(30)).timestamp();
    std::fs::write(
        dir.path().join("client.token.json"),
        format!(
            r#"{{"client_id":"client","access_token":"cached-token","expires_on":{}}}"#,
            expires_on
        ),
    )
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/secrets/Username/u1")
        .match_query(api_version())
        .match_header("authorization", "Bearer cached-token")
        .with_body(r#"{"value":"admin"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/secrets/Password")
        .match_query(api_version())
        .match_header("authorization", "Bearer cached-token")
        .with_body(r#"{"value":"current-password"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/secrets/Password/v1")
        .match_query(api_version())
        .with_status(404)
        .with_body(r#"{"error":{"code":"SecretNotFound","message":"not found"}}"#)
        .create_async()
        .await;

    let env = environment(&server.url(), dir.path());
    let cache = cache();
    let mut out = Vec::new();
    let report = execute(|key| env.get(key).cloned(), &cache, connect, &mut out)
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(cache.provider().calls.load(Ordering::SeqCst), 0);
    let out = String::from_utf8(out).unwrap();
    assert_eq!(out, "Username@u1 = admin\nPassword = current-password\n");
}

#[tokio::test]
async fn missing_cache_authenticates_once_and_writes_cache_file() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", Matcher::Regex(r"^/secrets/".into()))
        .match_query(api_version())
        .match_header("authorization", "Bearer fresh-token")
        .with_body(r#"{"value":"x"}"#)
        .expect(3)
        .create_async()
        .await;

    let env = environment(&server.url(), &cache_dir);
    let cache = cache();
    let mut out = Vec::new();
    let report = execute(|key| env.get(key).cloned(), &cache, connect, &mut out)
        .await
        .unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(cache.provider().calls.load(Ordering::SeqCst), 1);

    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(cache_dir.join("client.token.json")).unwrap()).unwrap();
    assert_eq!(written["access_token"], "fresh-token");
    assert!(written["expires_on"].as_i64().unwrap() > Utc::now().timestamp());
}

#[tokio::test]
async fn empty_environment_fails_before_any_network_call() {
    let cache = cache();
    let mut out = Vec::new();
    let err = execute(|_| None, &cache, connect, &mut out).await.unwrap_err();

    let message = err.to_string();
    for name in [
        "VAULT_BASE_URL",
        "USER_SECRET_NAME",
        "PASSWORD_SECRET_NAME",
        "AZ_TENANT_ID",
        "AZ_CLIENT_ID",
        "AZ_CLIENT_SECRET",
    ] {
        assert!(message.contains(name), "{} not in {}", name, message);
    }
    assert!(matches!(err, AppError::Config(_)));
    assert_eq!(cache.provider().calls.load(Ordering::SeqCst), 0);
    assert!(out.is_empty());
}
