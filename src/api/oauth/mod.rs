//! OAuth 2.0 routes for the merchant app.
//!
//! Authorization code flow:
//! 1. GET /api/oauth/redirect → authorization URL with a CSRF state
//! 2. Merchant approves the app on the provider's site
//! 3. Provider redirects to GET /api/oauth/callback
//! 4. Code is exchanged, the merchant user and sealed tokens are stored
//!
//! Authenticated routes (`/api/oauth/refresh-token`, `/api/oauth/owner`) sit
//! behind [`authenticate`].

mod state_manager;

pub use state_manager::{run_state_cleanup, StateManager};

use super::auth_middleware::{authenticate, AuthenticatedUser, Authenticator};
use super::error::{ApiError, ApiResponse};
use crate::config::AuthConfig;
use crate::credentials::{TokenRecord, User};
use crate::lifecycle::{LifecycleError, TokenManager};
use axum::{
    extract::{Query, State},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for the OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub token_manager: Arc<TokenManager>,
    pub authenticator: Arc<Authenticator>,
    pub state_manager: StateManager,
    pub auth: AuthConfig,
    /// Provider pushes tokens to the app instead of redirecting the merchant
    pub easy_mode: bool,
}

impl OAuthAppState {
    pub fn new(token_manager: Arc<TokenManager>, auth: AuthConfig, easy_mode: bool) -> Self {
        Self {
            authenticator: Arc::new(Authenticator::new(token_manager.clone(), &auth)),
            state_manager: StateManager::new(auth.state_expiry_seconds),
            token_manager,
            auth,
            easy_mode,
        }
    }
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct RedirectResponse {
    url: String,
}

/// Tokens as handed to the client: always the sealed form.
#[derive(Serialize)]
pub struct IssuedTokens {
    access_token: String,
    expires_in: i64,
    refresh_token: String,
}

impl From<&TokenRecord> for IssuedTokens {
    fn from(record: &TokenRecord) -> Self {
        Self {
            access_token: record.access_token.clone(),
            expires_in: record.expires_in,
            refresh_token: record.refresh_token.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct AuthorizedUser {
    user: User,
    tokens: IssuedTokens,
}

#[derive(Serialize)]
pub struct OwnerResponse {
    owner: serde_json::Value,
    user: User,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    let authenticator = state.authenticator.clone();
    let refresh_path = state.auth.refresh_path.clone();

    let protected = Router::new()
        .route(&refresh_path, get(oauth_refresh))
        .route("/api/oauth/owner", get(oauth_owner))
        .route_layer(middleware::from_fn_with_state(authenticator, authenticate));

    Router::new()
        .route("/api/oauth/redirect", get(oauth_redirect))
        .route("/api/oauth/callback", get(oauth_callback))
        .merge(protected)
        .with_state(Arc::new(state))
}

/// GET /api/oauth/redirect
///
/// Returns the provider authorization URL carrying a fresh single-use state.
async fn oauth_redirect(State(state): State<Arc<OAuthAppState>>) -> Json<RedirectResponse> {
    let csrf_state = state.state_manager.issue();
    let url = state.token_manager.provider().authorization_url(&csrf_state);

    debug!("Issued authorization URL");

    Json(RedirectResponse { url })
}

/// GET /api/oauth/callback
///
/// # Security
/// - Validates and consumes the CSRF state parameter
/// - Refused entirely in easy mode
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, ApiError> {
    if state.easy_mode {
        warn!("Callback received while in easy authorization mode");
        return Err(ApiError::unauthorized("The Authorization mode is not supported"));
    }

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(ApiError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = callback
        .code
        .ok_or_else(|| ApiError::BadRequest("Missing 'code' parameter".to_string()))?;
    let csrf_state = callback
        .state
        .ok_or_else(|| ApiError::BadRequest("Missing 'state' parameter".to_string()))?;

    state.state_manager.consume(&csrf_state).ok_or_else(|| {
        warn!(state = %csrf_state, "Invalid or expired OAuth state");
        ApiError::unauthorized("Invalid or expired OAuth state (possible CSRF attack)")
    })?;

    let authorization = state
        .token_manager
        .complete_authorization(&code)
        .await
        .map_err(|e| {
            error!(error = %e, "Authorization code exchange failed");
            match e {
                LifecycleError::ReauthorizationRequired(message) => ApiError::unauthorized(message),
                LifecycleError::Resource { message, .. } => ApiError::unauthorized(message),
                other => lifecycle_api_error(other, &state.auth),
            }
        })?;

    info!(user_id = authorization.user.id, "OAuth flow completed successfully");

    Ok(ApiResponse::success(AuthorizedUser {
        tokens: IssuedTokens::from(&authorization.record),
        user: authorization.user,
    })
    .into_response())
}

/// GET /api/oauth/refresh-token
///
/// Forces a refresh for the authenticated user. Reachable with an expired
/// access token. Responds with the sealed pair directly under `data`.
async fn oauth_refresh(
    State(state): State<Arc<OAuthAppState>>,
    Extension(authenticated): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let mut session = state
        .token_manager
        .for_user(&authenticated.user)
        .map_err(|e| lifecycle_api_error(e, &state.auth))?;

    let record = session
        .refresh()
        .await
        .map_err(|e| lifecycle_api_error(e, &state.auth))?;

    debug!(user_id = authenticated.user.id, "Issued refreshed tokens");

    Ok(ApiResponse::success(IssuedTokens::from(&record)).into_response())
}

/// GET /api/oauth/owner
///
/// Resource owner as reported by the provider, alongside the local user.
async fn oauth_owner(
    State(state): State<Arc<OAuthAppState>>,
    Extension(authenticated): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let mut session = state
        .token_manager
        .for_user(&authenticated.user)
        .map_err(|e| lifecycle_api_error(e, &state.auth))?;

    let profile = session
        .resource_owner()
        .await
        .map_err(|e| lifecycle_api_error(e, &state.auth))?;

    Ok(ApiResponse::success(OwnerResponse {
        owner: profile.raw,
        user: authenticated.user,
    })
    .into_response())
}

fn lifecycle_api_error(err: LifecycleError, auth: &AuthConfig) -> ApiError {
    match err {
        LifecycleError::NoToken | LifecycleError::ReauthorizationRequired(_) => {
            ApiError::reauthorize(err.to_string(), &auth.reauthorize_path)
        }
        LifecycleError::ProviderTransport(_) | LifecycleError::Resource { .. } => {
            ApiError::BadGateway(err.to_string())
        }
        LifecycleError::Storage(e) => {
            error!(error = %e, "Token storage failure");
            ApiError::ServerError("Token storage failure".to_string())
        }
    }
}
