//! Token lifecycle: binding a user to a live credential, refreshing it, and
//! making outbound provider calls with it.
//!
//! # Session states
//!
//! ```text
//!  Unbound ──for_user──▶ Bound ──(expires_at <= now)──▶ Refreshing
//!                          ▲                               │
//!                          └──────── upsert ok ────────────┤
//!                                                          ▼
//!                                           ReauthorizationRequired
//! ```
//!
//! Refreshes are serialized per user. A session that finds the stored record
//! rewritten since it was bound adopts the stored pair instead of spending the
//! refresh token again, whether or not the provider rotated it.

use crate::credentials::{NewUser, TokenCipher, TokenRecord, TokenStore, User};
use crate::provider::{OAuthProvider, ProviderError, ProviderProfile, TokenGrant};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};


/// Lifecycle errors surfaced to callers.
#[derive(Debug)]
pub enum LifecycleError {
    /// The user has no stored token record
    NoToken,
    /// The provider refused the grant; the user must go through the
    /// authorization flow again. Never retried.
    ReauthorizationRequired(String),
    /// Network, timeout or provider 5xx. The caller may retry the whole
    /// `for_user` → call sequence.
    ProviderTransport(String),
    /// Resource call failed for reasons unrelated to identity
    Resource { status: u16, message: String },
    /// Token store failure
    Storage(anyhow::Error),
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::NoToken => write!(f, "No token stored for user"),
            LifecycleError::ReauthorizationRequired(msg) => {
                write!(f, "Refresh token is invalid or expired. Please login again: {}", msg)
            }
            LifecycleError::ProviderTransport(msg) => write!(f, "Provider unavailable: {}", msg),
            LifecycleError::Resource { status, message } => {
                write!(f, "Provider request failed ({}): {}", status, message)
            }
            LifecycleError::Storage(e) => write!(f, "Token storage error: {}", e),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<ProviderError> for LifecycleError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::IdentityProvider { message, .. } => {
                LifecycleError::ReauthorizationRequired(message)
            }
            ProviderError::Resource { status, message } => {
                LifecycleError::Resource { status, message }
            }
            ProviderError::Transport(msg) => LifecycleError::ProviderTransport(msg),
        }
    }
}

impl From<anyhow::Error> for LifecycleError {
    fn from(e: anyhow::Error) -> Self {
        LifecycleError::Storage(e)
    }
}

/// Decrypted credential held in memory for the duration of a request.
#[derive(Clone, PartialEq)]
pub struct LiveCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for LiveCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCredential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl LiveCredential {
    fn from_record(cipher: &TokenCipher, record: &TokenRecord) -> Self {
        Self {
            access_token: cipher.decrypt(&record.access_token),
            refresh_token: cipher.decrypt(&record.refresh_token),
            // Unknown expiry is treated as already expired
            expires_at: record
                .effective_expires_at()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// True once `expires_at` is at or before `now`.
    pub fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Result of a completed authorization-code flow.
#[derive(Debug)]
pub struct Authorization {
    pub user: User,
    pub record: TokenRecord,
    pub grant: TokenGrant,
}

/// Binds users to live credentials and keeps their stored tokens fresh.
pub struct TokenManager {
    store: Arc<TokenStore>,
    cipher: Arc<TokenCipher>,
    provider: Arc<dyn OAuthProvider>,
    /// One async lock per user id, held for the duration of a refresh
    refresh_locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenManager {
    pub fn new(
        store: Arc<TokenStore>,
        cipher: Arc<TokenCipher>,
        provider: Arc<dyn OAuthProvider>,
    ) -> Self {
        Self {
            store,
            cipher,
            provider,
            refresh_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn cipher(&self) -> &Arc<TokenCipher> {
        &self.cipher
    }

    pub fn provider(&self) -> &Arc<dyn OAuthProvider> {
        &self.provider
    }

    /// Loads the user's stored tokens and decrypts them into a bound session.
    pub fn for_user(&self, user: &User) -> Result<BoundSession<'_>, LifecycleError> {
        let record = self.store.find(user.id)?.ok_or(LifecycleError::NoToken)?;

        Ok(BoundSession {
            manager: self,
            user: user.clone(),
            merchant_id: record.merchant_id,
            record_version: record.updated_at,
            credential: LiveCredential::from_record(&self.cipher, &record),
        })
    }

    /// Finishes the authorization-code flow: exchanges the code, looks up the
    /// resource owner, then creates or updates the user and their tokens.
    pub async fn complete_authorization(&self, code: &str) -> Result<Authorization, LifecycleError> {
        let grant = self.provider.exchange_code(code).await?;
        let profile = self.provider.resource_owner(&grant.access_token).await?;

        let user = self.store.upsert_user(&new_user_from_profile(&profile))?;
        let record = self.store.upsert(
            user.id,
            &grant.access_token,
            grant.refresh_token.as_deref().unwrap_or_default(),
            grant.expires_in,
            profile.merchant_id,
        )?;

        info!(
            user_id = user.id,
            merchant_id = ?profile.merchant_id,
            has_refresh_token = grant.refresh_token.is_some(),
            "Authorization completed"
        );

        Ok(Authorization {
            user,
            record,
            grant,
        })
    }

    fn refresh_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the user's lock entry once nobody else holds or waits on it.
    fn release_refresh_lock(&self, user_id: i64) {
        self.refresh_locks
            .remove_if(&user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn new_user_from_profile(profile: &ProviderProfile) -> NewUser {
    NewUser {
        provider_user_id: Some(profile.id),
        email: profile.email.clone(),
        name: profile.name.clone(),
        mobile: profile.mobile.clone(),
        role: profile.role.clone(),
        provider_created_at: profile.provider_created_at,
    }
}

/// A user bound to a decrypted credential.
///
/// Every state change writes only the bound user's record.
pub struct BoundSession<'a> {
    manager: &'a TokenManager,
    user: User,
    merchant_id: Option<i64>,
    /// `updated_at` of the record this session last read or wrote
    record_version: DateTime<Utc>,
    credential: LiveCredential,
}

impl<'a> BoundSession<'a> {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn credential(&self) -> &LiveCredential {
        &self.credential
    }

    /// Calls the provider's resource API, refreshing first if the access
    /// token has expired.
    pub async fn outbound_request(
        &mut self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, LifecycleError> {
        self.ensure_fresh().await?;

        debug!(user_id = self.user.id, method = %method, url = %url, "Outbound provider request");

        Ok(self
            .manager
            .provider
            .fetch_resource(method, url, &self.credential.access_token, body)
            .await?)
    }

    /// Resource owner for the bound credential.
    pub async fn resource_owner(&mut self) -> Result<ProviderProfile, LifecycleError> {
        self.ensure_fresh().await?;

        Ok(self
            .manager
            .provider
            .resource_owner(&self.credential.access_token)
            .await?)
    }

    async fn ensure_fresh(&mut self) -> Result<(), LifecycleError> {
        if self.credential.is_expiring(Utc::now()) {
            debug!(user_id = self.user.id, "Access token expired, refreshing before request");
            self.refresh().await?;
        }
        Ok(())
    }

    /// Exchanges the refresh token for a new pair and persists it.
    ///
    /// Returns the stored record afterwards. The previous record is left
    /// untouched when the provider refuses.
    pub async fn refresh(&mut self) -> Result<TokenRecord, LifecycleError> {
        let manager = self.manager;
        let user_id = self.user.id;

        let lock = manager.refresh_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked().await
        };

        drop(lock);
        manager.release_refresh_lock(user_id);

        result
    }

    async fn refresh_locked(&mut self) -> Result<TokenRecord, LifecycleError> {
        let manager = self.manager;
        let user_id = self.user.id;

        // Someone may have refreshed while we waited for the lock
        let stored = manager.store.find(user_id)?.ok_or_else(|| {
            LifecycleError::ReauthorizationRequired("Token record no longer exists".to_string())
        })?;
        let stored_credential = LiveCredential::from_record(&manager.cipher, &stored);

        if stored.updated_at != self.record_version
            || stored_credential.refresh_token != self.credential.refresh_token
        {
            self.merchant_id = stored.merchant_id;
            self.record_version = stored.updated_at;
            let adopted_is_live = !stored_credential.is_expiring(Utc::now());
            self.credential = stored_credential;

            if adopted_is_live {
                debug!(user_id, "Adopted token pair refreshed by a concurrent request");
                return Ok(stored);
            }
        }

        info!(user_id, "Refreshing OAuth token");

        let grant = manager
            .provider
            .refresh_token(&self.credential.refresh_token)
            .await
            .map_err(|e| {
                match &e {
                    ProviderError::Transport(_) => {
                        warn!(user_id, error = %e, "Token refresh failed, provider unreachable")
                    }
                    _ => error!(user_id, error = %e, "Token refresh rejected by provider"),
                }
                LifecycleError::from(e)
            })?;

        // Keep the existing refresh token if the provider did not rotate it
        let refresh_token = grant
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.credential.refresh_token.clone());

        let record = manager.store.upsert(
            user_id,
            &grant.access_token,
            &refresh_token,
            grant.expires_in,
            self.merchant_id,
        )?;

        self.credential = LiveCredential::from_record(&manager.cipher, &record);
        self.record_version = record.updated_at;

        info!(
            user_id,
            expires_at = %self.credential.expires_at,
            "OAuth token refreshed successfully"
        );

        Ok(record)
    }
}
