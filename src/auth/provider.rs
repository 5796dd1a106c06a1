//! Auth provider implementation
//!
//! Applies credentials to outgoing requests and keeps OAuth access tokens
//! fresh. OAuth refreshes are single-flight: concurrent callers that find the
//! token stale all await the same shared refresh future, and the mutex around
//! provider state is never held while that future runs.

use super::refresh::{OAuthTokenEndpoint, TokenRefresher};
use super::types::{AuthConfig, Credential, CredentialKind, Location};
use crate::error::{Error, Result};
use crate::http::ApiRequest;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type RefreshFlight = Shared<BoxFuture<'static, std::result::Result<Credential, String>>>;

/// Credential injector for one tenant
#[derive(Debug)]
pub enum AuthProvider {
    /// Requests are sent unauthenticated
    None,
    /// Static API key in a header or query parameter
    ApiKey {
        credential: Credential,
        location: Location,
        name: String,
        prefix: Option<String>,
    },
    /// HTTP Basic authentication
    Basic { credential: Credential },
    /// Static bearer token
    Bearer { credential: Credential },
    /// OAuth access token with refresh
    OAuth(OAuthProvider),
}

impl AuthProvider {
    /// Build a provider from connector configuration
    pub fn from_config(config: &AuthConfig, http_client: &Client) -> Result<Self> {
        let provider = match config {
            AuthConfig::None => AuthProvider::None,
            AuthConfig::ApiKey {
                location,
                name,
                prefix,
                value,
            } => {
                if value.is_empty() {
                    return Err(Error::invalid_value("auth.value", "API key must not be empty"));
                }
                AuthProvider::ApiKey {
                    credential: Credential::api_key(value.clone()),
                    location: *location,
                    name: name.clone(),
                    prefix: prefix.clone(),
                }
            }
            AuthConfig::Basic { username, password } => AuthProvider::Basic {
                credential: Credential::basic(username, password),
            },
            AuthConfig::Bearer { token } => {
                if token.is_empty() {
                    return Err(Error::invalid_value("auth.token", "Bearer token must not be empty"));
                }
                AuthProvider::Bearer {
                    credential: Credential::bearer(token.clone()),
                }
            }
            AuthConfig::OAuth {
                token_url,
                client_id,
                client_secret,
                scopes,
                access_token,
                refresh_token,
                safety_margin_seconds,
            } => {
                url::Url::parse(token_url)?;
                let endpoint = OAuthTokenEndpoint::new(token_url.clone(), client_id.clone())
                    .client_secret(client_secret.clone())
                    .scopes(scopes.clone())
                    .with_client(http_client.clone());
                let initial = Credential::oauth(
                    access_token.clone().unwrap_or_default(),
                    refresh_token.clone(),
                    None,
                );
                AuthProvider::OAuth(OAuthProvider::new(
                    Arc::new(endpoint),
                    initial,
                    Duration::from_secs(*safety_margin_seconds),
                ))
            }
        };
        Ok(provider)
    }

    /// Kind of credential this provider injects
    pub fn kind(&self) -> Option<CredentialKind> {
        match self {
            AuthProvider::None => None,
            AuthProvider::ApiKey { .. } => Some(CredentialKind::ApiKey),
            AuthProvider::Basic { .. } => Some(CredentialKind::Basic),
            AuthProvider::Bearer { .. } => Some(CredentialKind::Bearer),
            AuthProvider::OAuth(_) => Some(CredentialKind::OAuth),
        }
    }

    /// Return a usable credential, refreshing OAuth tokens that are due
    pub async fn ensure_valid(&self) -> Result<Option<Credential>> {
        match self {
            AuthProvider::None => Ok(None),
            AuthProvider::ApiKey { credential, .. }
            | AuthProvider::Basic { credential }
            | AuthProvider::Bearer { credential } => Ok(Some(credential.clone())),
            AuthProvider::OAuth(oauth) => oauth.ensure_valid().await.map(Some),
        }
    }

    /// Add the credential to a request
    pub fn decorate(&self, request: ApiRequest, credential: &Credential) -> ApiRequest {
        match self {
            AuthProvider::None => request,
            AuthProvider::ApiKey {
                location,
                name,
                prefix,
                ..
            } => {
                let value = format!("{}{}", prefix.as_deref().unwrap_or(""), credential.value);
                match location {
                    Location::Header => request.header(name.clone(), value),
                    Location::Query => request.query(name.clone(), value),
                }
            }
            AuthProvider::Basic { .. } => {
                request.header("Authorization", format!("Basic {}", credential.value))
            }
            AuthProvider::Bearer { .. } | AuthProvider::OAuth(_) => {
                request.header("Authorization", format!("Bearer {}", credential.value))
            }
        }
    }

    /// Ensure a valid credential and apply it to the request
    pub async fn authorize(&self, request: ApiRequest) -> Result<ApiRequest> {
        match self.ensure_valid().await? {
            Some(credential) => Ok(self.decorate(request, &credential)),
            None => Ok(request),
        }
    }

    /// Force the next OAuth request to refresh; no-op for static credentials
    pub fn invalidate(&self) {
        if let AuthProvider::OAuth(oauth) = self {
            oauth.invalidate();
        }
    }
}

struct OAuthState {
    credential: Credential,
    in_flight: Option<RefreshFlight>,
}

/// OAuth credential holder with single-flight refresh
pub struct OAuthProvider {
    refresher: Arc<dyn TokenRefresher>,
    safety_margin: Duration,
    state: Mutex<OAuthState>,
    refresh_count: Arc<AtomicU64>,
}

impl std::fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OAuthProvider")
            .field("credential", &state.credential)
            .field("refresh_in_flight", &state.in_flight.is_some())
            .field("safety_margin", &self.safety_margin)
            .finish_non_exhaustive()
    }
}

impl OAuthProvider {
    /// Create a provider around a token source and an initial credential
    pub fn new(refresher: Arc<dyn TokenRefresher>, initial: Credential, safety_margin: Duration) -> Self {
        Self {
            refresher,
            safety_margin,
            state: Mutex::new(OAuthState {
                credential: initial,
                in_flight: None,
            }),
            refresh_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current credential without refreshing
    pub fn current(&self) -> Credential {
        self.state.lock().credential.clone()
    }

    /// Number of refresh calls issued to the token source
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Mark the current access token as expired
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.credential.expires_at = Some(Utc::now());
        debug!("OAuth credential invalidated");
    }

    /// Return a fresh credential, joining or starting a refresh when due
    pub async fn ensure_valid(&self) -> Result<Credential> {
        let flight = {
            let mut state = self.state.lock();
            if !state.credential.needs_refresh(self.safety_margin, Utc::now()) {
                return Ok(state.credential.clone());
            }
            match &state.in_flight {
                Some(flight) => flight.clone(),
                None => {
                    let flight = self.start_refresh(state.credential.clone());
                    state.in_flight = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            state.in_flight = None;
            if let Ok(credential) = &result {
                state.credential = credential.clone();
            }
        }
        drop(state);

        result.map_err(Error::token_refresh)
    }

    fn start_refresh(&self, current: Credential) -> RefreshFlight {
        let refresher = Arc::clone(&self.refresher);
        let refresh_count = Arc::clone(&self.refresh_count);

        async move {
            refresh_count.fetch_add(1, Ordering::SeqCst);
            info!("Refreshing OAuth access token");
            match refresher.refresh(&current).await {
                Ok(grant) => Ok(grant.into_credential(current.refresh_token.clone(), Utc::now())),
                Err(e) => {
                    warn!(error = %e, "OAuth token refresh failed");
                    Err(match e {
                        Error::TokenRefresh { message } => message,
                        other => other.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}
