//! Expiry policy for provider-issued tokens.

use super::TokenRecord;
use chrono::{DateTime, Duration, Utc};

/// Longest lifetime a stored token may be granted (one year, in seconds).
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 31_536_000;

/// Lifetime used when the provider reports more than a year, which usually
/// means it sent an absolute timestamp instead of a duration.
pub const OVERSIZED_FALLBACK_SECS: i64 = 86_400;

/// Lifetime used when the provider reports a non-positive value.
pub const INVALID_FALLBACK_SECS: i64 = 3_600;

/// Converts a provider `expires_in` into an absolute expiry.
///
/// The result always lies within `[now, now + 1 year]`.
pub fn safe_expires_at(expires_in: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = if expires_in > MAX_TOKEN_LIFETIME_SECS {
        tracing::warn!(
            expires_in,
            "Token expiration too large, using 1 day default"
        );
        OVERSIZED_FALLBACK_SECS
    } else if expires_in <= 0 {
        tracing::warn!(expires_in, "Invalid expires_in value, defaulting to 1 hour");
        INVALID_FALLBACK_SECS
    } else {
        expires_in.min(MAX_TOKEN_LIFETIME_SECS)
    };

    now + Duration::seconds(seconds)
}

impl TokenRecord {
    /// Effective expiry of the record.
    ///
    /// `expires_at` wins when present. Records written before it existed fall
    /// back to `created_at + expires_in`. `None` means the expiry is unknown.
    pub fn effective_expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(expires_at) = self.expires_at {
            return Some(expires_at);
        }

        if self.expires_in > 0 {
            return self
                .created_at
                .checked_add_signed(Duration::seconds(self.expires_in));
        }

        None
    }

    /// Whether the record is past its expiry at `now`. Unknown expiry counts
    /// as expired.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        match self.effective_expires_at() {
            Some(expires_at) => now > expires_at,
            None => true,
        }
    }
}
