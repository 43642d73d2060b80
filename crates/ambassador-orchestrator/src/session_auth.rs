// ambassador-orchestrator/src/session_auth.rs
// ============================================================================
// Module: Session Token Authentication
// Description: Issues and verifies bearer tokens for `GET /v1/tools` and
//              `POST /v1/tools/invoke` (spec.md §4.3, §6).
// Purpose: Session tokens authenticate a narrower surface than a client's
//          preshared key and carry their own expiry, so they get their own
//          format and verification path instead of stretching AuthNProvider.
// Dependencies: ambassador-core, ambassador-store-sqlite, argon2, rand
// ============================================================================

//! ## Overview
//! A session token has the form `<session_id>.<secret>`. [`SessionId`]
//! values are ULIDs and never contain a `.`, so the split is unambiguous.
//! The secret is never stored; only its Argon2id hash is, mixed with a
//! per-session nonce so two sessions hashing the same secret never produce
//! the same stored hash. Verification mirrors
//! `ambassador_providers::authn::PresharedKeyAuthN`'s split-prefix pattern,
//! adapted to a single secret field instead of two.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use ambassador_core::Session;
use ambassador_core::SessionId;
use ambassador_core::SessionStatus;
use ambassador_core::Timestamp;
use ambassador_store_sqlite::Store;
use ambassador_store_sqlite::StoreError;
use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordHasher;
use argon2::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failure modes verifying a presented session token.
///
/// Every variant collapses to the same public rejection; the distinction
/// exists only so callers can log an internal cause without ever returning
/// it to the caller (I-6).
#[derive(Debug, Error)]
pub enum SessionAuthError {
    /// The token did not parse into a session id and a secret.
    #[error("malformed session token")]
    Malformed,
    /// No session exists with the parsed id.
    #[error("unknown session")]
    UnknownSession,
    /// The secret did not match the session's stored hash.
    #[error("secret mismatch")]
    SecretMismatch,
    /// The session exists but is not in a state that accepts requests.
    #[error("session not active")]
    NotActive,
    /// The session's hard expiry has passed.
    #[error("session expired")]
    Expired,
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for SessionAuthError {
    fn from(error: StoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Token Format
// ============================================================================

/// Length, in bytes, of the random secret portion of a session token.
const SECRET_LEN: usize = 32;

fn hash_input(nonce: &str, secret: &str) -> String {
    format!("{nonce}{secret}")
}

/// Generates a fresh session token and its stored hash/nonce pair.
///
/// The returned token is shown to the caller exactly once; only `token_hash`
/// and `token_nonce` are persisted (on [`Session`] or via
/// [`Store::replace_session_token`]).
///
/// # Errors
///
/// Returns an [`argon2::password_hash::Error`] only on an allocator or RNG
/// failure inside Argon2id itself.
pub fn generate_session_token(session_id: &SessionId) -> Result<(String, String, String), argon2::password_hash::Error> {
    let secret: String = rand::thread_rng().sample_iter(&Alphanumeric).take(SECRET_LEN).map(char::from).collect();
    let nonce: String = rand::thread_rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect();

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(hash_input(&nonce, &secret).as_bytes(), &salt)?.to_string();

    let token = format!("{}.{}", session_id.as_str(), secret);
    Ok((token, hash, nonce))
}

/// Splits a presented token into its session id and secret.
fn split_token(raw: &str) -> Option<(&str, &str)> {
    raw.split_once('.')
}

/// Verifies a presented session token against the store, returning the
/// live [`Session`] on success.
///
/// Every rejection reason — malformed token, unknown session, wrong secret,
/// non-active status, expiry — is distinguishable only in the returned
/// error's log-facing detail, never in behavior observable by the caller.
///
/// # Errors
///
/// Returns [`SessionAuthError`] for every rejection reason above, and
/// [`SessionAuthError::Store`] when the store itself fails.
pub async fn verify_session_token(store: &Arc<Store>, raw_token: &str) -> Result<Session, SessionAuthError> {
    let (session_id_str, secret) = split_token(raw_token).ok_or(SessionAuthError::Malformed)?;
    let session_id = SessionId::new(session_id_str);

    let session = store.get_session(session_id).await?.ok_or(SessionAuthError::UnknownSession)?;

    let parsed_hash = PasswordHash::new(&session.token_hash).map_err(|_| SessionAuthError::SecretMismatch)?;
    let candidate = hash_input(&session.token_nonce, secret);
    if Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash).is_err() {
        return Err(SessionAuthError::SecretMismatch);
    }

    if matches!(session.status, SessionStatus::Expired) {
        return Err(SessionAuthError::NotActive);
    }
    if session.expires_at.is_before(Timestamp::now()) {
        return Err(SessionAuthError::Expired);
    }

    Ok(session)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::ClientId;
    use ambassador_core::ToolProfileId;
    use ambassador_core::UserId;
    use std::time::Duration;

    async fn make_session(store: &Store) -> (Session, String) {
        let session_id = SessionId::generate();
        let (token, hash, nonce) = generate_session_token(&session_id).expect("generates");
        let now = Timestamp::now();
        let session = Session {
            id: session_id,
            user_id: UserId::generate(),
            client_id: ClientId::generate(),
            token_hash: hash,
            token_nonce: nonce,
            status: SessionStatus::Active,
            profile_id: None::<ToolProfileId>,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::from_secs(86_400),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session.clone()).await.expect("inserts");
        (session, token)
    }

    #[tokio::test]
    async fn verifies_a_freshly_generated_token() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let (session, token) = make_session(&store).await;

        let verified = verify_session_token(&store, &token).await.expect("verifies");
        assert_eq!(verified.id, session.id);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let (session, _token) = make_session(&store).await;

        let forged = format!("{}.wrongsecret", session.id.as_str());
        let result = verify_session_token(&store, &forged).await;
        assert!(matches!(result, Err(SessionAuthError::SecretMismatch)));
    }

    #[tokio::test]
    async fn rejects_malformed_token_without_separator() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let result = verify_session_token(&store, "no-separator-here").await;
        assert!(matches!(result, Err(SessionAuthError::Malformed)));
    }

    #[tokio::test]
    async fn rejects_unknown_session() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let forged = format!("{}.somesecret", SessionId::generate().as_str());
        let result = verify_session_token(&store, &forged).await;
        assert!(matches!(result, Err(SessionAuthError::UnknownSession)));
    }

    #[tokio::test]
    async fn rejects_expired_session() {
        let store = Arc::new(Store::open_in_memory().expect("opens"));
        let session_id = SessionId::generate();
        let (token, hash, nonce) = generate_session_token(&session_id).expect("generates");
        let now = Timestamp::now();
        let session = Session {
            id: session_id,
            user_id: UserId::generate(),
            client_id: ClientId::generate(),
            token_hash: hash,
            token_nonce: nonce,
            status: SessionStatus::Active,
            profile_id: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now - Duration::from_secs(1),
            idle_timeout_seconds: 300,
            spindown_delay_seconds: 60,
        };
        store.create_session(session).await.expect("inserts");

        let result = verify_session_token(&store, &token).await;
        assert!(matches!(result, Err(SessionAuthError::Expired)));
    }
}
