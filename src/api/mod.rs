// HTTP API: OAuth routes, bearer authentication and health

pub mod auth_middleware;
pub mod error;
pub mod oauth;

pub use auth_middleware::{authenticate, AuthenticatedUser, Authenticator};
pub use error::{ApiError, ApiResponse};
pub use oauth::{create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};

use axum::{response::Json, routing::get, Router};

/// GET /health
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
