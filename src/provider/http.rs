//! reqwest-backed provider client.

use super::{OAuthProvider, ProviderError, ProviderProfile, TokenGrant};
use crate::config::ProviderConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// User-info response envelope: `{"data": {...}}`
#[derive(Deserialize)]
struct UserInfoResponse {
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct UserInfo {
    id: i64,
    name: String,
    email: String,
    #[serde(default)]
    mobile: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    merchant: Option<MerchantInfo>,
}

#[derive(Deserialize)]
struct MerchantInfo {
    id: i64,
}

/// Parses the provider's `created_at`, either `YYYY-MM-DD HH:MM:SS` (UTC) or
/// RFC 3339. Anything else is dropped.
fn parse_provider_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)))
        .map_err(|e| tracing::debug!(value = %value, error = %e, "Unparseable provider timestamp"))
        .ok()
}

/// OAuth provider reached over HTTPS.
pub struct HttpProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl HttpProvider {
    /// Creates a client with the configured per-request timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build provider HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    async fn token_request(&self, form: HashMap<&str, &str>) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to send token request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(classify_failure(status, body, true));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse token response: {}", e)))
    }
}

/// 5xx is transport trouble; 4xx means the provider refused us.
fn classify_failure(status: reqwest::StatusCode, body: String, identity: bool) -> ProviderError {
    if status.is_server_error() {
        return ProviderError::Transport(format!("Provider returned {}: {}", status, body));
    }

    let auth_failure = status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN;

    if identity || auth_failure {
        ProviderError::IdentityProvider {
            status: status.as_u16(),
            message: body,
        }
    } else {
        ProviderError::Resource {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl OAuthProvider for HttpProvider {
    fn authorization_url(&self, state: &str) -> String {
        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.config.redirect_uri.as_str());
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        tracing::debug!("Exchanging authorization code for token at {}", self.config.token_url);

        let grant = self.token_request(form).await?;

        tracing::debug!(
            "Token exchange successful, has_refresh_token={}, expires_in={}",
            grant.refresh_token.is_some(),
            grant.expires_in
        );

        Ok(grant)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        if refresh_token.is_empty() {
            return Err(ProviderError::IdentityProvider {
                status: 400,
                message: "No refresh token available".to_string(),
            });
        }

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.config.client_id.as_str());
        form.insert("client_secret", self.config.client_secret.as_str());

        tracing::debug!("Refreshing access token at {}", self.config.token_url);

        self.token_request(form).await
    }

    async fn resource_owner(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .http_client
            .get(&self.config.user_info_url)
            .header("Accept", "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to send user info request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(classify_failure(status, body, true));
        }

        let envelope: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to parse user info response: {}", e)))?;

        let info: UserInfo = serde_json::from_value(envelope.data.clone())
            .map_err(|e| ProviderError::Transport(format!("Unexpected user info payload: {}", e)))?;

        Ok(ProviderProfile {
            id: info.id,
            name: info.name,
            email: info.email,
            mobile: info.mobile,
            role: info.role,
            provider_created_at: info.created_at.as_deref().and_then(parse_provider_timestamp),
            merchant_id: info.merchant.map(|m| m.id),
            raw: envelope.data,
        })
    }

    async fn fetch_resource(
        &self,
        method: reqwest::Method,
        url: &str,
        access_token: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut request = self
            .http_client
            .request(method, url)
            .header("Accept", "application/json")
            .bearer_auth(access_token);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to send resource request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(classify_failure(status, body, false));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("Failed to read resource response: {}", e)))?;

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transport(format!("Failed to parse resource response: {}", e)))
    }
}
