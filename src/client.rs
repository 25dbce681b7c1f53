use crate::error::FetchError;
use crate::token::BearerCredential;
use log::debug;
use reqwest::Url;
use serde::Deserialize;

pub(crate) const API_VERSION: &str = "7.0";

/// Client for Key Vault secret lookups, authorized with a bearer credential.
///
/// # Examples
///
/// ```no_run
/// use keyvault_fetch::KeyVaultClient;
/// # async fn demo(credential: keyvault_fetch::BearerCredential) -> Result<(), Box<dyn std::error::Error>> {
/// let base_url = "https://test-keyvault.vault.azure.net".parse()?;
/// let client = KeyVaultClient::new(reqwest::Client::new(), base_url, credential);
/// let secret = client.get_secret("secret_name").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KeyVaultClient {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) credential: BearerCredential,
}

#[derive(Deserialize, Debug)]
struct KeyVaultErrorResponse {
    error: KeyVaultErrorBody,
}

#[derive(Deserialize, Debug)]
struct KeyVaultErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl KeyVaultClient {
    /// Creates a new `KeyVaultClient` for the vault at `base_url`,
    /// e.g. `https://{vault-name}.vault.azure.net`.
    pub fn new(http: reqwest::Client, base_url: Url, credential: BearerCredential) -> Self {
        Self {
            http,
            base_url,
            credential,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `segments` under the vault base URL, skipping empty ones, with
    /// the API version query appended.
    pub(crate) fn resource_url(&self, name: &str, segments: &[&str]) -> Result<Url, FetchError> {
        let mut uri = self.base_url.clone();
        uri.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl {
                name: name.to_owned(),
                reason: format!("{} cannot be a base URL", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments.iter().filter(|s| !s.is_empty()));
        uri.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(uri)
    }

    pub(crate) async fn get_authed(&self, name: &str, uri: Url) -> Result<String, FetchError> {
        debug!("GET {}", uri.path());
        let resp = self
            .credential
            .authorize(self.http.get(uri))
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                name: name.to_owned(),
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| FetchError::Transport {
            name: name.to_owned(),
            source,
        })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<KeyVaultErrorResponse>(&body) {
                Ok(KeyVaultErrorResponse {
                    error: KeyVaultErrorBody {
                        code: Some(code),
                        message,
                    },
                }) => format!("{} ({})", message, code),
                Ok(response) => response.error.message,
                Err(_) => body,
            };
            return Err(FetchError::Status {
                name: name.to_owned(),
                status,
                message,
            });
        }
        Ok(body)
    }
}
