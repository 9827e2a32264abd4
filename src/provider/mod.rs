//! OAuth 2.0 identity provider interface.
//!
//! The application only needs five things from the e-commerce platform, and
//! [`OAuthProvider`] exposes exactly those. [`HttpProvider`] talks to the real
//! endpoints; tests substitute their own implementations.

mod http;

pub use http::HttpProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token pair returned by the provider's token endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds as reported. Missing values decode as 0 and are
    /// handled by the expiry policy.
    #[serde(default)]
    pub expires_in: i64,
}

/// Resource owner (merchant user) as reported by the provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile: Option<String>,
    pub role: Option<String>,
    pub provider_created_at: Option<DateTime<Utc>>,
    pub merchant_id: Option<i64>,

    /// Full `data` object from the user-info response
    pub raw: serde_json::Value,
}

/// Errors talking to the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider rejected the grant or credential (4xx from the token or
    /// user-info endpoint). The user has to authorize again.
    IdentityProvider { status: u16, message: String },
    /// A resource call returned a non-success status unrelated to identity
    Resource { status: u16, message: String },
    /// Network failure, timeout, 5xx or unreadable response
    Transport(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::IdentityProvider { status, message } => {
                write!(f, "Identity provider rejected the request ({}): {}", status, message)
            }
            ProviderError::Resource { status, message } => {
                write!(f, "Provider resource request failed ({}): {}", status, message)
            }
            ProviderError::Transport(msg) => write!(f, "Provider transport error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Operations the application performs against the identity provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorization page URL carrying the given CSRF state.
    fn authorization_url(&self, state: &str) -> String;

    /// `authorization_code` grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    /// `refresh_token` grant.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Owner of the given access token.
    async fn resource_owner(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;

    /// Authenticated call to the provider's resource API.
    async fn fetch_resource(
        &self,
        method: reqwest::Method,
        url: &str,
        access_token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError>;
}
