//! AES-256-GCM cipher for OAuth tokens at rest.
//!
//! A sealed token is a base64-encoded JSON envelope:
//!
//! ```text
//! base64({"v":1,"iv":"<nonce>","value":"<ciphertext>","tag":"<gcm tag>"})
//! ```
//!
//! Because the JSON always opens with `{"`, every sealed token starts with
//! `eyJ`. That prefix plus a minimum length is the only thing used to tell
//! ciphertext from plaintext, so values written before encryption existed keep
//! working without a migration.
//!
//! The nonce is derived from the plaintext with HMAC-SHA256, which makes
//! encryption deterministic: the same token always seals to the same string,
//! and a plaintext bearer token can be matched against the stored column by
//! encrypting it first.

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, warn};

/// Prefix every sealed token starts with (base64 of `{"`).
pub const CIPHERTEXT_MARKER: &str = "eyJ";

/// Sealed tokens are always strictly longer than this.
pub const MIN_CIPHERTEXT_LEN: usize = 100;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

const ENVELOPE_VERSION: u8 = 1;

/// Domain separation label for the nonce derivation key.
const NONCE_KEY_LABEL: &[u8] = b"storeauth-token-nonce";

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u8,
    iv: String,
    value: String,
    tag: String,
}

/// Validates that the master key is exactly 32 bytes when base64 decoded.
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Structural check for sealed tokens: longer than [`MIN_CIPHERTEXT_LEN`] and
/// starting with [`CIPHERTEXT_MARKER`].
///
/// Provider-issued tokens are shorter and use a different alphabet prefix, so
/// they never match.
pub fn is_encrypted(value: &str) -> bool {
    value.len() > MIN_CIPHERTEXT_LEN && value.starts_with(CIPHERTEXT_MARKER)
}

/// Idempotent token cipher.
///
/// `encrypt` and `decrypt` never fail from the caller's point of view: on any
/// cryptographic error they log and hand back the input unchanged. Callers
/// must treat the output of `decrypt` as best effort.
pub struct TokenCipher {
    cipher: Aes256Gcm,
    nonce_key: Vec<u8>,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("cipher", &"<redacted>")
            .finish()
    }
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn new(key_base64: &str) -> Result<Self> {
        let key_bytes = validate_key(key_base64).context("Invalid encryption key")?;
        Self::from_key_bytes(&key_bytes)
    }

    /// Builds a cipher from raw key bytes (must be 32 bytes).
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to derive nonce key: {}", e))?;
        mac.update(NONCE_KEY_LABEL);
        let nonce_key = mac.finalize().into_bytes().to_vec();

        Ok(Self { cipher, nonce_key })
    }

    /// Generates a new random master key, base64-encoded.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Seals a token.
    ///
    /// Empty input and input that already looks sealed are returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> String {
        if plaintext.is_empty() || is_encrypted(plaintext) {
            return plaintext.to_string();
        }

        match self.seal(plaintext) {
            Ok(sealed) if is_encrypted(&sealed) => sealed,
            Ok(_) => {
                error!("Sealed token is not recognisable as ciphertext, storing original value");
                plaintext.to_string()
            }
            Err(e) => {
                error!(error = %e, "Token encryption failed, storing original value");
                plaintext.to_string()
            }
        }
    }

    /// Opens a sealed token.
    ///
    /// Values that do not look sealed are returned unchanged, as is any value
    /// that fails to open (wrong key, corrupted envelope).
    pub fn decrypt(&self, value: &str) -> String {
        if !is_encrypted(value) {
            return value.to_string();
        }

        match self.open(value) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(error = %e, "Token decryption failed, using value as-is");
                value.to_string()
            }
        }
    }

    fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = self.synthetic_nonce(plaintext)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, b"", &mut buffer)
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            iv: BASE64.encode(nonce_bytes),
            value: BASE64.encode(&buffer),
            tag: BASE64.encode(tag),
        };
        let json = serde_json::to_vec(&envelope).context("Failed to serialize envelope")?;

        Ok(BASE64.encode(json))
    }

    fn open(&self, value: &str) -> Result<String> {
        let json = BASE64.decode(value).context("Failed to decode envelope")?;
        let envelope: Envelope =
            serde_json::from_slice(&json).context("Failed to parse envelope")?;

        if envelope.v != ENVELOPE_VERSION {
            return Err(anyhow!("Unsupported envelope version {}", envelope.v));
        }

        let nonce_bytes = BASE64.decode(&envelope.iv).context("Failed to decode nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let tag_bytes = BASE64.decode(&envelope.tag).context("Failed to decode tag")?;
        if tag_bytes.len() != TAG_SIZE {
            return Err(anyhow!(
                "Invalid tag size: expected {}, got {}",
                TAG_SIZE,
                tag_bytes.len()
            ));
        }

        let mut buffer = BASE64
            .decode(&envelope.value)
            .context("Failed to decode ciphertext")?;

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce_bytes),
                b"",
                &mut buffer,
                Tag::from_slice(&tag_bytes),
            )
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(buffer).context("Decrypted data is not valid UTF-8")
    }

    fn synthetic_nonce(&self, plaintext: &str) -> Result<[u8; NONCE_SIZE]> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.nonce_key)
            .map_err(|e| anyhow!("Failed to create nonce MAC: {}", e))?;
        mac.update(plaintext.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&digest[..NONCE_SIZE]);
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::from_key_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert!(validate_key(&short_key).is_err());

        // Too long
        let long_key = BASE64.encode([0u8; 64]);
        assert!(validate_key(&long_key).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_generated_key_is_valid() {
        let key = TokenCipher::generate_key();
        assert!(TokenCipher::new(&key).is_ok());
        assert_ne!(key, TokenCipher::generate_key());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "ory_at_4f9a1c2e7b3d8e6f0a1b2c3d4e5f6a7b8c9d0e1f.AbCdEf";

        let sealed = cipher.encrypt(plaintext);
        assert_ne!(sealed, plaintext);
        assert!(is_encrypted(&sealed));
        assert_eq!(cipher.decrypt(&sealed), plaintext);
    }

    #[test]
    fn test_single_character_token_is_detected() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("x");

        assert!(sealed.len() > MIN_CIPHERTEXT_LEN);
        assert!(sealed.starts_with(CIPHERTEXT_MARKER));
        assert_eq!(cipher.decrypt(&sealed), "x");
    }

    #[test]
    fn test_encrypt_is_idempotent() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("refresh-token-67890");

        assert_eq!(cipher.encrypt(&sealed), sealed);
        assert_eq!(cipher.encrypt(&cipher.encrypt(&sealed)), sealed);
    }

    #[test]
    fn test_encrypt_is_deterministic() {
        let cipher = test_cipher();
        assert_eq!(cipher.encrypt("same-token"), cipher.encrypt("same-token"));
        assert_ne!(cipher.encrypt("token-a"), cipher.encrypt("token-b"));
    }

    #[test]
    fn test_empty_passthrough() {
        let cipher = test_cipher();
        assert_eq!(cipher.encrypt(""), "");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn test_plaintext_is_not_detected() {
        assert!(!is_encrypted("access-token-12345"));
        assert!(!is_encrypted("eyJshort"));
        // Long, but wrong prefix
        assert!(!is_encrypted(&"a".repeat(200)));
        // Exactly at the threshold is not enough
        let at_threshold = format!("{}{}", CIPHERTEXT_MARKER, "A".repeat(MIN_CIPHERTEXT_LEN - 3));
        assert_eq!(at_threshold.len(), MIN_CIPHERTEXT_LEN);
        assert!(!is_encrypted(&at_threshold));
    }

    #[test]
    fn test_decrypt_plaintext_passthrough() {
        let cipher = test_cipher();
        assert_eq!(cipher.decrypt("legacy-plain-token"), "legacy-plain-token");
    }

    #[test]
    fn test_wrong_key_returns_input() {
        let cipher1 = test_cipher();
        let cipher2 = TokenCipher::from_key_bytes(&[1u8; 32]).unwrap();

        let sealed = cipher1.encrypt("secret");
        assert_eq!(cipher2.decrypt(&sealed), sealed);
    }

    #[test]
    fn test_tampered_envelope_returns_input() {
        let cipher = test_cipher();
        let sealed = cipher.encrypt("secret-token-value");

        let json = BASE64.decode(&sealed).unwrap();
        let mut envelope: Envelope = serde_json::from_slice(&json).unwrap();
        envelope.tag = BASE64.encode([0u8; TAG_SIZE]);
        let tampered = BASE64.encode(serde_json::to_vec(&envelope).unwrap());

        assert!(is_encrypted(&tampered));
        assert_eq!(cipher.decrypt(&tampered), tampered);
    }

    #[test]
    fn test_marker_lookalike_is_left_alone() {
        let cipher = test_cipher();
        let lookalike = format!("{}{}", CIPHERTEXT_MARKER, "A".repeat(150));

        // Treated as already sealed on the way in, and unreadable on the way out.
        assert_eq!(cipher.encrypt(&lookalike), lookalike);
        assert_eq!(cipher.decrypt(&lookalike), lookalike);
    }
}
