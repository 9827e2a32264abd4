//! SQLite persistence for users and their OAuth token records.

use super::{expiry, NewUser, TokenCipher, TokenRecord, User};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const TOKEN_COLUMNS: &str = "id, user_id, merchant_id, access_token, refresh_token, \
                             expires_in, expires_at, created_at, updated_at";

const USER_COLUMNS: &str =
    "id, provider_user_id, email, name, mobile, role, created_at, updated_at, provider_created_at";

/// Token record store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE users (
///     id INTEGER PRIMARY KEY,
///     provider_user_id INTEGER UNIQUE,
///     email TEXT NOT NULL UNIQUE,
///     name TEXT NOT NULL,
///     mobile TEXT,
///     role TEXT,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     provider_created_at TEXT      -- RFC 3339, as reported by the provider
/// );
///
/// CREATE TABLE oauth_tokens (
///     id INTEGER PRIMARY KEY,
///     user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
///     merchant_id INTEGER,
///     access_token TEXT NOT NULL,   -- sealed
///     refresh_token TEXT NOT NULL,  -- sealed
///     expires_in INTEGER NOT NULL,  -- provider value as reported
///     expires_at TEXT,              -- RFC 3339, authoritative
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// `UNIQUE(user_id)` backs the one-record-per-user rule; writes go through
/// `ON CONFLICT(user_id) DO UPDATE` so a second authorization replaces the row.
pub struct TokenStore {
    conn: Mutex<Connection>,
    cipher: Arc<TokenCipher>,
}

impl TokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`":memory:"` for tests)
    /// * `cipher` - Cipher applied to both tokens on every write
    pub fn open<P: AsRef<Path>>(db_path: P, cipher: Arc<TokenCipher>) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                provider_user_id INTEGER UNIQUE,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                mobile TEXT,
                role TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                provider_created_at TEXT
            );

            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                merchant_id INTEGER,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_in INTEGER NOT NULL,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_oauth_tokens_access_token
                ON oauth_tokens(access_token);
            "#,
        )
        .context("Failed to create schema")?;

        // Databases created before the column existed
        if conn.prepare("SELECT provider_created_at FROM users LIMIT 0").is_err() {
            conn.execute("ALTER TABLE users ADD COLUMN provider_created_at TEXT", [])
                .context("Failed to add users.provider_created_at")?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Token store connection lock poisoned"))
    }

    /// Creates a user, or updates the existing user with the same email.
    pub fn upsert_user(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO users (
                provider_user_id, email, name, mobile, role,
                provider_created_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(email) DO UPDATE SET
                provider_user_id = excluded.provider_user_id,
                name = excluded.name,
                mobile = excluded.mobile,
                role = excluded.role,
                provider_created_at = excluded.provider_created_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user.provider_user_id,
                user.email,
                user.name,
                user.mobile,
                user.role,
                user.provider_created_at.map(|dt| dt.to_rfc3339()),
                now,
                now,
            ],
        )
        .context("Failed to store user")?;

        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![user.email],
            user_from_row,
        )
        .context("Failed to read back stored user")
    }

    /// Looks up a user by id.
    pub fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    /// Looks up a user by email.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    /// Deletes a user. Their token record goes with them.
    ///
    /// # Returns
    /// * `Ok(true)` - User deleted
    /// * `Ok(false)` - No such user
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .context("Failed to delete user")?;

        Ok(rows_affected > 0)
    }

    /// Stores a fresh token pair for a user, replacing any existing record.
    ///
    /// Both tokens are sealed before they are written and `expires_at` is
    /// derived from `expires_in` through the expiry policy. The raw
    /// `expires_in` is kept as reported.
    pub fn upsert(
        &self,
        user_id: i64,
        access_token: &str,
        refresh_token: &str,
        expires_in: i64,
        merchant_id: Option<i64>,
    ) -> Result<TokenRecord> {
        let sealed_access = self.cipher.encrypt(access_token);
        let sealed_refresh = self.cipher.encrypt(refresh_token);

        let now = Utc::now();
        let expires_at = expiry::safe_expires_at(expires_in, now);
        let now_str = now.to_rfc3339();

        debug!(
            user_id,
            expires_in,
            expires_at = %expires_at,
            "Storing token record"
        );

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO oauth_tokens (
                user_id, merchant_id,
                access_token, refresh_token,
                expires_in, expires_at,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                merchant_id = excluded.merchant_id,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_in = excluded.expires_in,
                expires_at = excluded.expires_at,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                merchant_id,
                sealed_access,
                sealed_refresh,
                expires_in,
                expires_at.to_rfc3339(),
                now_str,
                now_str,
            ],
        )
        .context("Failed to store token record")?;

        conn.query_row(
            &format!("SELECT {} FROM oauth_tokens WHERE user_id = ?1", TOKEN_COLUMNS),
            params![user_id],
            token_from_row,
        )
        .context("Failed to read back stored token record")
    }

    /// Returns the token record owned by `user_id`, if any.
    pub fn find(&self, user_id: i64) -> Result<Option<TokenRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {} FROM oauth_tokens WHERE user_id = ?1", TOKEN_COLUMNS),
                params![user_id],
                token_from_row,
            )
            .optional()
            .context("Failed to query token record")
    }

    /// Returns the record whose stored access token equals `access_token`
    /// byte for byte. No encryption or decryption is applied here.
    pub fn find_by_access_token(&self, access_token: &str) -> Result<Option<TokenRecord>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {} FROM oauth_tokens WHERE access_token = ?1",
                    TOKEN_COLUMNS
                ),
                params![access_token],
                token_from_row,
            )
            .optional()
            .context("Failed to query token record by access token")
    }

    /// Deletes the token record for a user.
    ///
    /// # Returns
    /// * `Ok(true)` - Record deleted
    /// * `Ok(false)` - No record found
    pub fn delete(&self, user_id: i64) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute("DELETE FROM oauth_tokens WHERE user_id = ?1", params![user_id])
            .context("Failed to delete token record")?;

        Ok(rows_affected > 0)
    }

    #[cfg(test)]
    pub(crate) fn set_expires_at(&self, user_id: i64, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        self.conn()?.execute(
            "UPDATE oauth_tokens SET expires_at = ?2 WHERE user_id = ?1",
            params![user_id, expires_at.map(|dt| dt.to_rfc3339())],
        )?;
        Ok(())
    }

    /// Writes token columns verbatim, bypassing the cipher (legacy rows).
    #[cfg(test)]
    pub(crate) fn write_raw_tokens(&self, user_id: i64, access_token: &str, refresh_token: &str) -> Result<()> {
        self.conn()?.execute(
            "UPDATE oauth_tokens SET access_token = ?2, refresh_token = ?3 WHERE user_id = ?1",
            params![user_id, access_token, refresh_token],
        )?;
        Ok(())
    }
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<TokenRecord> {
    let expires_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(TokenRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        merchant_id: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        expires_in: row.get(5)?,
        expires_at: expires_at
            .map(|s| parse_timestamp(6, &s))
            .transpose()?,
        created_at: parse_timestamp(7, &created_at)?,
        updated_at: parse_timestamp(8, &updated_at)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let provider_created_at: Option<String> = row.get(8)?;

    Ok(User {
        id: row.get(0)?,
        provider_user_id: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        mobile: row.get(4)?,
        role: row.get(5)?,
        provider_created_at: provider_created_at
            .map(|s| parse_timestamp(8, &s))
            .transpose()?,
        created_at: parse_timestamp(6, &created_at)?,
        updated_at: parse_timestamp(7, &updated_at)?,
    })
}
