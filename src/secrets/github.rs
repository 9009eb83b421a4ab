//! GitHub Actions repository secrets.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{seal, SealedSecret, SecretStore};
use crate::error::RotateError;

const GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct RepoPublicKey {
    key_id: String,
    key: String,
}

/// Publishes sealed secrets to a repository through the GitHub REST API.
pub struct GithubSecretStore {
    client: Client,
    api_base: String,
    token: Option<SecretString>,
    repository: Option<String>,
}

impl GithubSecretStore {
    /// `repository` is `owner/name`. Either value may be absent, in which case
    /// every rotation reports [`RotateError::NotConfigured`].
    pub fn new(token: Option<SecretString>, repository: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("clawmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_base: GITHUB_API_BASE.to_string(),
            token,
            repository: repository.map(|r| r.trim().trim_matches('/').to_string()),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn destination(&self) -> Option<(&SecretString, &str)> {
        let token = self.token.as_ref()?;
        let repository = self.repository.as_deref().filter(|r| !r.is_empty())?;
        Some((token, repository))
    }

    fn authorized(&self, request: RequestBuilder, token: &SecretString) -> RequestBuilder {
        request
            .header("authorization", format!("token {}", token.expose_secret()))
            .header("accept", "application/vnd.github.v3+json")
    }

    async fn fetch_public_key(
        &self,
        token: &SecretString,
        repository: &str,
    ) -> Result<RepoPublicKey, RotateError> {
        let url = format!(
            "{}/repos/{repository}/actions/secrets/public-key",
            self.api_base
        );
        let response = self
            .authorized(self.client.get(&url), token)
            .send()
            .await
            .map_err(|e| RotateError::PublicKey(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RotateError::PublicKey(format!("HTTP {status}")));
        }
        response
            .json::<RepoPublicKey>()
            .await
            .map_err(|e| RotateError::PublicKey(e.to_string()))
    }

    async fn publish(
        &self,
        token: &SecretString,
        repository: &str,
        name: &str,
        sealed: SealedSecret,
    ) -> Result<(), RotateError> {
        let url = format!("{}/repos/{repository}/actions/secrets/{name}", self.api_base);
        let response = self
            .authorized(self.client.put(&url), token)
            .json(&serde_json::json!({
                "encrypted_value": sealed.encrypted_value(),
                "key_id": sealed.key_id(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RotateError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for GithubSecretStore {
    async fn rotate(&self, name: &str, plaintext: &SecretString) -> Result<(), RotateError> {
        let Some((token, repository)) = self.destination() else {
            return Err(RotateError::NotConfigured);
        };

        let key = self.fetch_public_key(token, repository).await?;
        let sealed = seal(&key.key, &key.key_id, plaintext.expose_secret().as_bytes())?;
        tracing::debug!(secret = name, key_id = sealed.key_id(), "Publishing sealed secret");
        self.publish(token, repository, name, sealed).await
    }
}
