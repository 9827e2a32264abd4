//! Inbound bearer authentication.
//!
//! Clients may present the access token sealed (as returned by the callback
//! and refresh endpoints) or in plaintext, and historical rows may hold either
//! form. A credential is therefore looked up three ways before it is rejected:
//!
//! 1. verbatim
//! 2. sealed with the token cipher (plaintext client, sealed storage)
//! 3. opened with the token cipher (sealed client, plaintext storage)

use super::error::ApiError;
use crate::auth::{credential_preview, extract_bearer_token, TokenError};
use crate::config::AuthConfig;
use crate::credentials::{TokenRecord, User};
use crate::lifecycle::TokenManager;
use anyhow::Result;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[cfg(test)]
mod tests;

/// Identity bound to a request after successful authentication.
///
/// Handlers receive it through `Extension<AuthenticatedUser>`.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user: User,
    pub record: TokenRecord,
}

/// Authentication errors
#[derive(Debug, PartialEq)]
pub enum AuthError {
    /// Missing or malformed Authorization header
    MissingToken(TokenError),
    /// No token record matches the credential
    InvalidToken,
    /// Record found but its owner is gone
    UserNotFound,
    /// Record past expiry on a route other than the refresh route
    Expired,
    /// Token store failure
    Storage(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken(_) => write!(f, "Unauthorized - No token provided"),
            AuthError::InvalidToken => write!(f, "Unauthorized - Invalid token"),
            AuthError::UserNotFound => write!(f, "Unauthorized - User not found"),
            AuthError::Expired => write!(f, "Token has expired"),
            AuthError::Storage(msg) => write!(f, "Token lookup failed: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LookupStrategy {
    Verbatim,
    Encrypted,
    Decrypted,
}

impl LookupStrategy {
    const ORDER: [LookupStrategy; 3] = [
        LookupStrategy::Verbatim,
        LookupStrategy::Encrypted,
        LookupStrategy::Decrypted,
    ];

    fn name(self) -> &'static str {
        match self {
            LookupStrategy::Verbatim => "verbatim",
            LookupStrategy::Encrypted => "encrypted",
            LookupStrategy::Decrypted => "decrypted",
        }
    }
}

/// Resolves bearer credentials to users.
pub struct Authenticator {
    manager: Arc<TokenManager>,
    refresh_path: String,
    reauthorize_path: String,
}

impl Authenticator {
    pub fn new(manager: Arc<TokenManager>, config: &AuthConfig) -> Self {
        Self {
            manager,
            refresh_path: config.refresh_path.clone(),
            reauthorize_path: config.reauthorize_path.clone(),
        }
    }

    /// Finds the token record for a credential, trying each lookup strategy
    /// in order. Strategies that would repeat an earlier lookup are skipped.
    pub fn resolve_credential(&self, credential: &str) -> Result<Option<TokenRecord>> {
        let store = self.manager.store();
        let cipher = self.manager.cipher();
        let mut tried: Vec<String> = Vec::with_capacity(LookupStrategy::ORDER.len());

        for strategy in LookupStrategy::ORDER {
            let candidate = match strategy {
                LookupStrategy::Verbatim => credential.to_string(),
                LookupStrategy::Encrypted => cipher.encrypt(credential),
                LookupStrategy::Decrypted => cipher.decrypt(credential),
            };

            if tried.contains(&candidate) {
                continue;
            }

            if let Some(record) = store.find_by_access_token(&candidate)? {
                debug!(
                    strategy = strategy.name(),
                    user_id = record.user_id,
                    "Token resolved"
                );
                return Ok(Some(record));
            }

            debug!(
                strategy = strategy.name(),
                token = %credential_preview(credential),
                "Token not found"
            );
            tried.push(candidate);
        }

        Ok(None)
    }

    /// Authenticates a request from its headers and path.
    ///
    /// # Flow
    /// 1. Extract bearer token from Authorization header
    /// 2. Resolve it to a token record (three lookup strategies)
    /// 3. Load the owning user
    /// 4. Reject expired records unless `path` is the refresh route
    pub fn authorize(&self, headers: &HeaderMap, path: &str) -> Result<AuthenticatedUser, AuthError> {
        let credential = extract_bearer_token(headers).map_err(AuthError::MissingToken)?;

        let record = self
            .resolve_credential(&credential)
            .map_err(|e| AuthError::Storage(e.to_string()))?
            .ok_or_else(|| {
                warn!(
                    token = %credential_preview(&credential),
                    "Token not found by any method"
                );
                AuthError::InvalidToken
            })?;

        let user = self
            .manager
            .store()
            .find_user(record.user_id)
            .map_err(|e| AuthError::Storage(e.to_string()))?
            .ok_or(AuthError::UserNotFound)?;

        if record.has_expired(Utc::now()) && path != self.refresh_path {
            debug!(user_id = user.id, path = %path, "Rejecting expired token");
            return Err(AuthError::Expired);
        }

        Ok(AuthenticatedUser { user, record })
    }

    fn to_api_error(&self, err: AuthError) -> ApiError {
        match err {
            AuthError::Expired => ApiError::reauthorize(err.to_string(), &self.reauthorize_path),
            AuthError::Storage(msg) => {
                error!(error = %msg, "Token lookup failed");
                ApiError::ServerError("Token lookup failed".to_string())
            }
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

/// Axum middleware: authenticates the request and stores the
/// [`AuthenticatedUser`] in its extensions.
pub async fn authenticate(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match authenticator.authorize(request.headers(), &path) {
        Ok(authenticated) => {
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Err(e) => authenticator.to_api_error(e).into_response(),
    }
}
