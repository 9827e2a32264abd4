use super::*;
use crate::config::ProviderConfig;
use crate::credentials::{NewUser, TokenCipher, TokenStore};
use crate::provider::HttpProvider;
use axum::http::{header::AUTHORIZATION, HeaderValue};
use chrono::Duration;

struct Fixture {
    authenticator: Authenticator,
    manager: Arc<TokenManager>,
    user: User,
}

fn fixture() -> Fixture {
    let cipher = Arc::new(TokenCipher::from_key_bytes(&[3u8; 32]).unwrap());
    let store = Arc::new(TokenStore::open(":memory:", cipher.clone()).unwrap());
    let provider = Arc::new(HttpProvider::new(ProviderConfig::default()).unwrap());
    let manager = Arc::new(TokenManager::new(store, cipher, provider));

    let user = manager
        .store()
        .upsert_user(&NewUser {
            provider_user_id: Some(42),
            email: "merchant@example.com".to_string(),
            name: "Merchant".to_string(),
            mobile: None,
            role: None,
            provider_created_at: None,
        })
        .unwrap();

    Fixture {
        authenticator: Authenticator::new(manager.clone(), &AuthConfig::default()),
        manager,
        user,
    }
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

#[test]
fn test_plaintext_credential_matches_sealed_row() {
    let f = fixture();
    f.manager
        .store()
        .upsert(f.user.id, "plain-access", "plain-refresh", 3600, None)
        .unwrap();

    let authenticated = f
        .authenticator
        .authorize(&bearer("plain-access"), "/api/oauth/owner")
        .unwrap();

    assert_eq!(authenticated.user.id, f.user.id);
}

#[test]
fn test_sealed_credential_matches_sealed_row() {
    let f = fixture();
    let record = f
        .manager
        .store()
        .upsert(f.user.id, "plain-access", "plain-refresh", 3600, None)
        .unwrap();

    let authenticated = f
        .authenticator
        .authorize(&bearer(&record.access_token), "/api/oauth/owner")
        .unwrap();

    assert_eq!(authenticated.record.user_id, f.user.id);
}

#[test]
fn test_sealed_credential_matches_legacy_plaintext_row() {
    let f = fixture();
    f.manager
        .store()
        .upsert(f.user.id, "x", "y", 3600, None)
        .unwrap();
    f.manager
        .store()
        .write_raw_tokens(f.user.id, "legacy-access", "legacy-refresh")
        .unwrap();

    let sealed = f.manager.cipher().encrypt("legacy-access");
    let authenticated = f
        .authenticator
        .authorize(&bearer(&sealed), "/api/oauth/owner")
        .unwrap();

    assert_eq!(authenticated.user.id, f.user.id);
}

#[test]
fn test_missing_header_rejected() {
    let f = fixture();

    let err = f
        .authenticator
        .authorize(&HeaderMap::new(), "/api/oauth/owner")
        .unwrap_err();

    assert_eq!(err, AuthError::MissingToken(TokenError::Missing));
    assert_eq!(err.to_string(), "Unauthorized - No token provided");
}

#[test]
fn test_unknown_credential_rejected() {
    let f = fixture();
    f.manager
        .store()
        .upsert(f.user.id, "plain-access", "plain-refresh", 3600, None)
        .unwrap();

    let err = f
        .authenticator
        .authorize(&bearer("someone-else"), "/api/oauth/owner")
        .unwrap_err();

    assert_eq!(err, AuthError::InvalidToken);
    assert_eq!(err.to_string(), "Unauthorized - Invalid token");
}

#[test]
fn test_expired_token_rejected_outside_refresh_route() {
    let f = fixture();
    f.manager
        .store()
        .upsert(f.user.id, "plain-access", "plain-refresh", 3600, None)
        .unwrap();
    f.manager
        .store()
        .set_expires_at(f.user.id, Some(Utc::now() - Duration::minutes(1)))
        .unwrap();

    let err = f
        .authenticator
        .authorize(&bearer("plain-access"), "/api/oauth/owner")
        .unwrap_err();
    assert_eq!(err, AuthError::Expired);

    let allowed = f
        .authenticator
        .authorize(&bearer("plain-access"), "/api/oauth/refresh-token");
    assert!(allowed.is_ok());
}

#[test]
fn test_expired_maps_to_reauthorize_redirect() {
    let f = fixture();

    let api_error = f.authenticator.to_api_error(AuthError::Expired);

    assert_eq!(
        api_error,
        ApiError::reauthorize("Token has expired", "/api/oauth/redirect")
    );
}

#[test]
fn test_resolve_skips_duplicate_candidates() {
    let f = fixture();

    // Sealed input: encrypting is a no-op, so only two distinct lookups run
    let sealed = f.manager.cipher().encrypt("nobody");
    assert!(f.authenticator.resolve_credential(&sealed).unwrap().is_none());
}
