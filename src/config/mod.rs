use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Default location of the optional TOML config file.
pub const DEFAULT_CONFIG_PATH: &str = "storeauth.toml";

/// Complete storeauth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreAuthConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Token storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Base64-encoded 32-byte key. Normally supplied via STOREAUTH_ENCRYPTION_KEY.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_database_path() -> String {
    "storeauth.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            encryption_key: None,
        }
    }
}

/// OAuth provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_user_info_url")]
    pub user_info_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Per-request timeout for every provider call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// "online" (authorization code flow) or "custom" (easy mode, tokens are
    /// pushed by the provider and the callback is disabled)
    #[serde(default = "default_authorization_mode")]
    pub authorization_mode: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:8000/api/oauth/callback".to_string()
}

fn default_authorize_url() -> String {
    "https://accounts.salla.sa/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://accounts.salla.sa/oauth2/token".to_string()
}

fn default_user_info_url() -> String {
    "https://accounts.salla.sa/oauth2/user/info".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["offline_access".to_string()]
}

fn default_request_timeout() -> u64 {
    30
}

fn default_authorization_mode() -> String {
    "online".to_string()
}

impl ProviderConfig {
    /// Easy mode: the provider delivers tokens itself, no code exchange.
    pub fn is_easy_mode(&self) -> bool {
        self.authorization_mode == "custom"
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            user_info_url: default_user_info_url(),
            scopes: default_scopes(),
            request_timeout_seconds: default_request_timeout(),
            authorization_mode: default_authorization_mode(),
        }
    }
}

/// Inbound authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Route exempt from the expiry check
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Where clients are sent to authorize again
    #[serde(default = "default_reauthorize_path")]
    pub reauthorize_path: String,
    /// Lifetime of OAuth CSRF state values
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
}

fn default_refresh_path() -> String {
    "/api/oauth/refresh-token".to_string()
}

fn default_reauthorize_path() -> String {
    "/api/oauth/redirect".to_string()
}

fn default_state_expiry() -> i64 {
    600
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: default_refresh_path(),
            reauthorize_path: default_reauthorize_path(),
            state_expiry_seconds: default_state_expiry(),
        }
    }
}

impl Default for StoreAuthConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            provider: ProviderConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl StoreAuthConfig {
    /// Overlay STOREAUTH_* environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STOREAUTH_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(v) = lookup("STOREAUTH_DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("STOREAUTH_ENCRYPTION_KEY") {
            self.storage.encryption_key = Some(v);
        }
        if let Some(v) = lookup("STOREAUTH_CLIENT_ID") {
            self.provider.client_id = v;
        }
        if let Some(v) = lookup("STOREAUTH_CLIENT_SECRET") {
            self.provider.client_secret = v;
        }
        if let Some(v) = lookup("STOREAUTH_REDIRECT_URI") {
            self.provider.redirect_uri = v;
        }
        if let Some(v) = lookup("STOREAUTH_AUTHORIZE_URL") {
            self.provider.authorize_url = v;
        }
        if let Some(v) = lookup("STOREAUTH_TOKEN_URL") {
            self.provider.token_url = v;
        }
        if let Some(v) = lookup("STOREAUTH_USER_INFO_URL") {
            self.provider.user_info_url = v;
        }
        if let Some(v) = lookup("STOREAUTH_AUTHORIZATION_MODE") {
            self.provider.authorization_mode = v;
        }
        if let Some(v) = lookup("STOREAUTH_PROVIDER_TIMEOUT_SECONDS") {
            if let Ok(n) = v.parse::<u64>() {
                self.provider.request_timeout_seconds = n;
            }
        }
    }

    /// The encryption key, which has no usable default.
    pub fn encryption_key(&self) -> Result<&str> {
        self.storage
            .encryption_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!("No encryption key configured. Set STOREAUTH_ENCRYPTION_KEY (see `storeauth generate-key`).")
            })
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<StoreAuthConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: StoreAuthConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

/// Load the config file if it exists, fall back to defaults, then apply the
/// environment.
pub fn load_from_env() -> Result<StoreAuthConfig> {
    let path = std::env::var("STOREAUTH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = if std::path::Path::new(&path).exists() {
        load_config(&path)?
    } else {
        tracing::debug!(path = %path, "No config file found, using defaults");
        StoreAuthConfig::default()
    };

    config.apply_env_overrides();
    Ok(config)
}
