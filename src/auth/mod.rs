//! Authentication module
//!
//! Supports: API Key, Basic, Bearer, OAuth2 with refresh
//!
//! An `AuthProvider` is built per tenant from `AuthConfig` and decorates
//! outgoing requests. OAuth providers refresh expired tokens with at most one
//! refresh in flight per credential.

mod provider;
mod refresh;
mod types;

pub use provider::{AuthProvider, OAuthProvider};
pub use refresh::{OAuthTokenEndpoint, TokenRefresher};
pub use types::{AuthConfig, Credential, CredentialKind, Location, TokenGrant};
