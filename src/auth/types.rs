//! Auth configuration and credential types

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Location for API key placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Place in HTTP header
    #[default]
    Header,
    /// Place in query parameter
    Query,
}

/// Kind of credential carried by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ApiKey,
    Basic,
    Bearer,
    #[serde(rename = "oauth")]
    OAuth,
}

/// Authentication configuration as written in connector YAML
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// API Key authentication (header or query)
    ApiKey {
        /// Where to place the API key
        #[serde(default)]
        location: Location,
        /// Header or query parameter name
        #[serde(default = "default_api_key_name")]
        name: String,
        /// Prefix to add before the value (e.g., "Token ")
        #[serde(default)]
        prefix: Option<String>,
        /// The API key value
        value: String,
    },

    /// HTTP Basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },

    /// Static bearer token
    Bearer {
        /// The bearer token
        token: String,
    },

    /// OAuth2 access token with refresh
    #[serde(rename = "oauth")]
    OAuth {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        #[serde(default)]
        client_secret: Option<String>,
        /// Requested scopes
        #[serde(default)]
        scopes: Vec<String>,
        /// Initial access token, if one was issued out of band
        #[serde(default)]
        access_token: Option<String>,
        /// Refresh token; without one the client credentials grant is used
        #[serde(default)]
        refresh_token: Option<String>,
        /// Refresh this long before the token expires
        #[serde(default = "default_safety_margin_seconds")]
        safety_margin_seconds: u64,
    },
}

fn default_api_key_name() -> String {
    "Authorization".to_string()
}

fn default_safety_margin_seconds() -> u64 {
    30
}

impl AuthConfig {
    /// Kind of credential this config produces
    pub fn credential_kind(&self) -> Option<CredentialKind> {
        match self {
            AuthConfig::None => None,
            AuthConfig::ApiKey { .. } => Some(CredentialKind::ApiKey),
            AuthConfig::Basic { .. } => Some(CredentialKind::Basic),
            AuthConfig::Bearer { .. } => Some(CredentialKind::Bearer),
            AuthConfig::OAuth { .. } => Some(CredentialKind::OAuth),
        }
    }
}

/// A secret used to authorize requests
///
/// Shared with the pipeline by clone; only the auth provider replaces it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Credential kind
    pub kind: CredentialKind,
    /// Key, token or encoded basic pair
    pub value: String,
    /// OAuth refresh token
    pub refresh_token: Option<String>,
    /// OAuth access token expiry
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create an API key credential
    pub fn api_key(value: impl Into<String>) -> Self {
        Self::new(CredentialKind::ApiKey, value)
    }

    /// Create a bearer credential
    pub fn bearer(value: impl Into<String>) -> Self {
        Self::new(CredentialKind::Bearer, value)
    }

    /// Create a basic credential holding the base64 encoded `user:password` pair
    pub fn basic(username: &str, password: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Self::new(CredentialKind::Basic, encoded)
    }

    /// Create an OAuth credential
    pub fn oauth(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            kind: CredentialKind::OAuth,
            value: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    fn new(kind: CredentialKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Whether the credential must be refreshed before use
    ///
    /// True once `now >= expires_at - margin`, or when no access token has
    /// been obtained yet.
    pub fn needs_refresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        if self.value.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => chrono::Duration::from_std(margin)
                .ok()
                .and_then(|margin| expires_at.checked_sub_signed(margin))
                .map_or(true, |refresh_at| now >= refresh_at),
            None => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a token endpoint call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// New access token
    pub access_token: String,
    /// Rotated refresh token, if the server issued one
    pub refresh_token: Option<String>,
    /// Lifetime of the access token
    pub expires_in: Option<Duration>,
}

impl TokenGrant {
    /// Turn the grant into a credential, keeping `previous_refresh` when the
    /// server did not rotate it
    ///
    /// A lifetime too large to represent is treated as no expiry.
    pub fn into_credential(self, previous_refresh: Option<String>, now: DateTime<Utc>) -> Credential {
        let expires_at = self
            .expires_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d));
        Credential::oauth(
            self.access_token,
            self.refresh_token.or(previous_refresh),
            expires_at,
        )
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_credential_not_expired() {
        let now = Utc::now();
        let cred = Credential::oauth("t", None, Some(now + chrono::Duration::seconds(3600)));
        assert!(!cred.needs_refresh(Duration::from_secs(30), now));
    }

    #[test]
    fn test_grant_with_unrepresentable_lifetime_never_expires() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "t".into(),
            refresh_token: None,
            expires_in: Some(Duration::from_secs(1_000_000_000_000_000)),
        };
        let cred = grant.into_credential(Some("r".into()), now);
        assert_eq!(cred.expires_at, None);
        assert_eq!(cred.refresh_token.as_deref(), Some("r"));
        assert!(!cred.needs_refresh(Duration::from_secs(30), now));
    }

    #[test]
    fn test_credential_within_safety_margin() {
        let now = Utc::now();
        let cred = Credential::oauth("t", None, Some(now + chrono::Duration::seconds(20)));
        assert!(cred.needs_refresh(Duration::from_secs(30), now));
        assert!(!cred.needs_refresh(Duration::from_secs(10), now));
    }

    #[test]
    fn test_credential_expired() {
        let now = Utc::now();
        let cred = Credential::oauth("t", None, Some(now - chrono::Duration::seconds(1)));
        assert!(cred.needs_refresh(Duration::ZERO, now));
    }

    #[test]
    fn test_credential_no_expiration() {
        let cred = Credential::bearer("static");
        assert!(!cred.needs_refresh(Duration::from_secs(30), Utc::now()));
    }

    #[test]
    fn test_empty_oauth_credential_needs_refresh() {
        let cred = Credential::oauth("", Some("rt".into()), None);
        assert!(cred.needs_refresh(Duration::ZERO, Utc::now()));
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let cred = Credential::api_key("super-secret");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("ApiKey"));
    }

    #[test]
    fn test_grant_keeps_previous_refresh_token() {
        let now = Utc::now();
        let grant = TokenGrant {
            access_token: "new".into(),
            refresh_token: None,
            expires_in: Some(Duration::from_secs(60)),
        };
        let cred = grant.into_credential(Some("old-rt".into()), now);
        assert_eq!(cred.refresh_token.as_deref(), Some("old-rt"));
        assert_eq!(cred.expires_at, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert!(matches!(config, AuthConfig::None));
        assert_eq!(config.credential_kind(), None);
    }

    #[test]
    fn test_auth_config_yaml() {
        let config: AuthConfig = serde_yaml::from_str(
            "type: oauth\ntoken_url: https://auth.example.com/token\nclient_id: abc\nrefresh_token: rt\n",
        )
        .unwrap();
        assert_eq!(config.credential_kind(), Some(CredentialKind::OAuth));
        match config {
            AuthConfig::OAuth {
                safety_margin_seconds,
                scopes,
                ..
            } => {
                assert_eq!(safety_margin_seconds, 30);
                assert!(scopes.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
