use std::fmt;
use std::sync::Arc;

use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::caching::{CacheContents, CacheError};
use crate::config::Config;

use super::{ApiEnvelope, CredentialProvider, USER_AGENT};

/// HTTP client for the upstream dashboard API.
///
/// Attaches the caller's bearer credential to every request and performs no
/// retries of its own. The configured connect and request timeouts are the
/// only bounds on call duration.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Self {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap();

        ApiClient {
            client,
            base_url: config.api_url.clone(),
            credentials,
        }
    }

    /// POSTs a JSON body to `path` and decodes the standard envelope.
    ///
    /// Fails with [`CacheError::NotAuthenticated`] before any network
    /// activity when no credential is available.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> CacheContents<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let Some(credentials) = self.credentials.credentials() else {
            return Err(CacheError::NotAuthenticated);
        };

        let url = self
            .base_url
            .join(path)
            .map_err(|e| CacheError::Network(e.to_string()))?;
        tracing::debug!(url = %url, "sending history request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&credentials.token)
            .header(header::USER_AGENT, USER_AGENT)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CacheError::NotAuthenticated);
        }
        if !status.is_success() {
            return Err(CacheError::Network(format!("unexpected status: {status}")));
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        envelope.into_contents()
    }
}
