//! Token endpoint client used for OAuth refresh

use super::types::{Credential, TokenGrant};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Source of fresh OAuth access tokens
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the current credential for a new grant
    async fn refresh(&self, current: &Credential) -> Result<TokenGrant>;
}

/// OAuth2 token endpoint over HTTP
///
/// Uses the refresh token grant when the credential carries a refresh token,
/// otherwise falls back to client credentials.
#[derive(Debug, Clone)]
pub struct OAuthTokenEndpoint {
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    scopes: Vec<String>,
    http_client: Client,
}

impl OAuthTokenEndpoint {
    /// Create a token endpoint client
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            scopes: Vec::new(),
            http_client: Client::new(),
        }
    }

    /// Set the client secret
    #[must_use]
    pub fn client_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret;
        self
    }

    /// Set requested scopes
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Use a custom HTTP client
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    fn form(&self, current: &Credential) -> Vec<(&'static str, String)> {
        let mut form = match &current.refresh_token {
            Some(refresh_token) => vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.clone()),
            ],
            None => vec![("grant_type", "client_credentials".to_string())],
        };
        form.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        form
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenEndpoint {
    async fn refresh(&self, current: &Credential) -> Result<TokenGrant> {
        let form = self.form(current);
        debug!(token_url = %self.token_url, grant_type = %form[0].1, "Requesting OAuth token");

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::token_refresh(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::token_refresh(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::token_refresh(format!("Invalid token response: {e}")))?;
        Ok(token_response.into())
    }
}

/// OAuth2 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in.map(Duration::from_secs),
        }
    }
}
