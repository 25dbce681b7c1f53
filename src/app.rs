//! Ties configuration, token acquisition and secret lookups together.

use std::io::Write;

use log::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::secret::SecretStore;
use crate::token::{BearerCredential, Clock, TokenCache, TokenProvider, TokenRequest, TokenStore};

/// Outcome of a run in which authentication succeeded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub failed: usize,
}

/// Reads the configuration through `lookup` and then does [`run`].
///
/// Nothing touches the network or the token cache unless the configuration
/// is complete.
pub async fn execute<L, K, S, P, C, F, W>(
    lookup: L,
    cache: &TokenCache<K, S, P>,
    connect: F,
    out: &mut W,
) -> Result<RunReport, AppError>
where
    L: Fn(&str) -> Option<String>,
    K: Clock,
    S: TokenStore,
    P: TokenProvider + Sync,
    C: SecretStore,
    F: FnOnce(&Config, BearerCredential) -> C,
    W: Write,
{
    let config = Config::from_lookup(lookup)?;
    debug!("Loaded configuration. {:?}", config);
    run(&config, cache, connect, out).await
}

/// Acquires a credential, connects a secret store with it and prints every
/// configured secret to `out`.
///
/// Individual lookup failures are logged and skipped; only an authentication
/// failure (or a broken `out`) fails the run.
pub async fn run<K, S, P, C, F, W>(
    config: &Config,
    cache: &TokenCache<K, S, P>,
    connect: F,
    out: &mut W,
) -> Result<RunReport, AppError>
where
    K: Clock,
    S: TokenStore,
    P: TokenProvider + Sync,
    C: SecretStore,
    F: FnOnce(&Config, BearerCredential) -> C,
    W: Write,
{
    let request = TokenRequest {
        client_id: config.client_id(),
        client_secret: config.client_secret(),
        token_endpoint: config.token_endpoint(),
        audience: config.audience(),
    };
    let credential = cache.acquire(&request, &config.cache_path()).await?;
    info!("Connecting to Key Vault. url={}", config.vault_base_url());
    let store = connect(config, credential);

    let mut report = RunReport::default();
    for reference in config.secret_references() {
        match store.fetch(&reference).await {
            Ok(value) => {
                writeln!(out, "{} = {}", reference, value)?;
                report.fetched += 1;
            }
            Err(e) => {
                warn!("Failed to get secret {}: {}", reference, e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
