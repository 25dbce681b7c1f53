//! Fetches Azure Key Vault secrets as a service principal, keeping the access
//! token in a local file cache between runs.

pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod secret;
pub mod token;

pub use app::{execute, run, RunReport};
pub use client::KeyVaultClient;
pub use config::Config;
pub use error::{AppError, AuthError, ConfigError, FetchError, Violation};
pub use secret::{KeyVaultSecret, SecretReference, SecretStore};
pub use token::{
    BearerCredential, Clock, FileTokenStore, IssuedToken, OAuthTokenProvider, SystemClock,
    TokenCache, TokenProvider, TokenRequest, TokenStore,
};
