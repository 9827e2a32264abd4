use anyhow::{Context, Result};
use std::sync::Arc;
use storeauth::api::{create_health_router, create_oauth_router, run_state_cleanup, OAuthAppState};
use storeauth::config;
use storeauth::credentials::{TokenCipher, TokenStore};
use storeauth::lifecycle::TokenManager;
use storeauth::provider::HttpProvider;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const STATE_CLEANUP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storeauth=info".into()),
        )
        .init();

    if std::env::args().nth(1).as_deref() == Some("generate-key") {
        println!("{}", TokenCipher::generate_key());
        return Ok(());
    }

    info!("StoreAuth starting...");

    let config = config::load_from_env()?;

    let cipher = Arc::new(
        TokenCipher::new(config.encryption_key()?).context("Invalid token encryption key")?,
    );
    let store = Arc::new(TokenStore::open(&config.storage.database_path, cipher.clone())?);
    info!(path = %config.storage.database_path, "Token store opened");

    let easy_mode = config.provider.is_easy_mode();
    let provider = Arc::new(HttpProvider::new(config.provider.clone())?);
    let token_manager = Arc::new(TokenManager::new(store, cipher, provider));

    let oauth_state = OAuthAppState::new(token_manager, config.auth.clone(), easy_mode);
    tokio::spawn(run_state_cleanup(
        oauth_state.state_manager.clone(),
        STATE_CLEANUP_INTERVAL_SECS,
    ));

    let app = create_oauth_router(oauth_state)
        .merge(create_health_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address))?;
    info!(address = %config.server.bind_address, easy_mode, "HTTP server listening");

    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
