//! Encrypted token storage for merchant OAuth sessions.
//!
//! Each user owns at most one [`TokenRecord`] holding the provider's access and
//! refresh tokens. Tokens are sealed by [`TokenCipher`] whenever they cross the
//! storage boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - upsert-by-user, lookups               │
//! │  - expiry policy on write                │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (raw ciphertext)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-GCM, deterministic nonce      │
//! │  - idempotent, never fails outward       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - users / oauth_tokens                  │
//! │  - cascade delete with the user          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Records returned by the store carry the *stored* (sealed) token strings.
//! Decryption is the caller's job, see `lifecycle::TokenManager`.
//!
//! # Usage
//!
//! ```no_run
//! use storeauth::credentials::{NewUser, TokenCipher, TokenStore};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("STOREAUTH_ENCRYPTION_KEY")?;
//! let cipher = Arc::new(TokenCipher::new(&key)?);
//! let store = TokenStore::open("storeauth.db", cipher.clone())?;
//!
//! let user = store.upsert_user(&NewUser {
//!     provider_user_id: Some(181690847),
//!     email: "owner@example.com".to_string(),
//!     name: "Store Owner".to_string(),
//!     mobile: None,
//!     role: None,
//!     provider_created_at: None,
//! })?;
//!
//! store.upsert(user.id, "access", "refresh", 1_209_600, Some(633170215))?;
//!
//! if let Some(record) = store.find(user.id)? {
//!     println!("plain access token: {}", cipher.decrypt(&record.access_token));
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod expiry;
mod storage;

pub use encryption::{is_encrypted, validate_key, TokenCipher, CIPHERTEXT_MARKER, MIN_CIPHERTEXT_LEN};
pub use expiry::{safe_expires_at, MAX_TOKEN_LIFETIME_SECS};
pub use storage::TokenStore;

/// Persisted OAuth tokens for one user.
///
/// `access_token` and `refresh_token` hold the stored representation, which is
/// ciphertext for everything written by this crate. Legacy rows may still hold
/// plaintext.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub id: i64,

    /// Owning user (immutable)
    pub user_id: i64,

    #[serde(skip_serializing)]
    pub access_token: String,

    #[serde(skip_serializing)]
    pub refresh_token: String,

    /// Provider merchant account, informational only
    pub merchant_id: Option<i64>,

    /// Provider-reported lifetime at issuance, kept for older rows
    pub expires_in: i64,

    /// Authoritative expiry
    pub expires_at: Option<DateTime<Utc>>,

    /// Issuance time of the current token pair
    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Merchant user known to the application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub provider_user_id: Option<i64>,
    pub email: String,
    pub name: String,
    pub mobile: Option<String>,
    pub role: Option<String>,
    /// Account creation time as reported by the provider
    pub provider_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields used to create or update a [`User`] (matched by email).
#[derive(Clone, Debug)]
pub struct NewUser {
    pub provider_user_id: Option<i64>,
    pub email: String,
    pub name: String,
    pub mobile: Option<String>,
    pub role: Option<String>,
    pub provider_created_at: Option<DateTime<Utc>>,
}
