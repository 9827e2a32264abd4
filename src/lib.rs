// HTTP API and inbound authentication
pub mod api;

// Bearer header parsing
pub mod auth;

// Configuration loading
pub mod config;

// Token cipher, expiry policy and token store
pub mod credentials;

// Token lifecycle: binding, refresh and outbound calls
pub mod lifecycle;

// OAuth provider client
pub mod provider;
