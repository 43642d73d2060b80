// ambassador-providers/src/authn.rs
// ============================================================================
// Module: Preshared-Key AuthN Provider
// Description: Reference authentication provider verifying preshared keys.
// Purpose: Resolve a presented key to a client identity without leaking
//          which part of the check failed.
// Dependencies: ambassador-core, argon2, subtle
// ============================================================================

//! ## Overview
//! Preshared keys are split into a non-secret prefix (used for an indexed
//! lookup) and a secret remainder (verified with Argon2id, spec.md §4.6).
//! Every failure mode — unknown prefix, wrong remainder, suspended client,
//! expired client, lookup error — collapses to the same
//! [`ambassador_core::AuthNError::Rejected`], so a caller learns nothing
//! about why a key was refused (I-6).

// ============================================================================
// SECTION: Imports
// ============================================================================

use argon2::Argon2;
use argon2::PasswordHash;
use argon2::PasswordHasher;
use argon2::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use ambassador_core::AuthNError;
use ambassador_core::AuthNProvider;
use ambassador_core::AuthNSuccess;
use ambassador_core::Client;
use ambassador_core::ClientStatus;
use ambassador_core::PresentedCredential;
use ambassador_core::Timestamp;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// SECTION: Client Lookup
// ============================================================================

/// Errors looking up a client by key prefix.
#[derive(Debug, Error)]
pub enum ClientLookupError {
    /// The underlying store could not complete the lookup.
    #[error("client lookup failed: {0}")]
    Store(String),
}

/// Resolves a client by the non-secret prefix of its preshared key.
///
/// Implemented by the persistence layer; kept as a narrow trait here so
/// this crate never depends on a concrete storage engine.
#[async_trait]
pub trait ClientLookup: Send + Sync {
    /// Returns the client whose key prefix matches `prefix`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientLookupError`] when the store itself fails; an
    /// absent client is `Ok(None)`, not an error.
    async fn find_by_key_prefix(&self, prefix: &str) -> Result<Option<Client>, ClientLookupError>;
}

// ============================================================================
// SECTION: Preshared Key Format
// ============================================================================

/// Length, in bytes, of the non-secret key prefix.
pub const KEY_PREFIX_LEN: usize = 8;

/// Splits a raw preshared key into its prefix and secret remainder.
///
/// Returns `None` when the key is shorter than [`KEY_PREFIX_LEN`].
#[must_use]
pub fn split_key(raw_key: &str) -> Option<(&str, &str)> {
    if raw_key.len() <= KEY_PREFIX_LEN {
        return None;
    }
    raw_key.split_at_checked(KEY_PREFIX_LEN)
}

/// Hashes a secret remainder with Argon2id for storage.
///
/// # Errors
///
/// Returns a [`ClientLookupError`]-free `Result` only in the sense that
/// hashing itself can fail only on an allocator or RNG failure, which
/// surfaces as [`argon2::password_hash::Error`].
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Preshared-key [`AuthNProvider`] backed by a [`ClientLookup`].
pub struct PresharedKeyAuthN<L: ClientLookup> {
    lookup: L,
}

impl<L: ClientLookup> PresharedKeyAuthN<L> {
    /// Wraps a client lookup implementation.
    #[must_use]
    pub const fn new(lookup: L) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<L: ClientLookup> AuthNProvider for PresharedKeyAuthN<L> {
    async fn verify(&self, credential: &PresentedCredential) -> Result<AuthNSuccess, AuthNError> {
        let Some((prefix, secret)) = split_key(&credential.raw_key) else {
            return Err(AuthNError::Rejected);
        };

        let client = self
            .lookup
            .find_by_key_prefix(prefix)
            .await
            .map_err(|error| AuthNError::Provider(error.to_string()))?
            .ok_or(AuthNError::Rejected)?;

        if !verify_secret(secret, &client.secret_hash) {
            return Err(AuthNError::Rejected);
        }

        if client.status != ClientStatus::Active {
            return Err(AuthNError::Rejected);
        }
        if !client.is_usable(Timestamp::now()) {
            return Err(AuthNError::Rejected);
        }

        Ok(AuthNSuccess {
            client_id: client.id,
            user_id: client.user_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::ClientId;
    use ambassador_core::UserId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeLookup {
        clients: Mutex<HashMap<String, Client>>,
    }

    #[async_trait]
    impl ClientLookup for FakeLookup {
        async fn find_by_key_prefix(&self, prefix: &str) -> Result<Option<Client>, ClientLookupError> {
            Ok(self.clients.lock().expect("lock").get(prefix).cloned())
        }
    }

    fn make_client(secret: &str, status: ClientStatus) -> (String, Client) {
        let prefix = "abcd1234";
        let hash = hash_secret(secret).expect("hash secret");
        let client = Client {
            id: ClientId::generate(),
            user_id: UserId::generate(),
            key_prefix: prefix.to_string(),
            secret_hash: hash,
            profile_id: None,
            status,
            expires_at: None,
            metadata: serde_json::Value::Null,
            created_at: Timestamp::now(),
        };
        (prefix.to_string(), client)
    }

    #[tokio::test]
    async fn verifies_correct_key_for_active_client() {
        let (prefix, client) = make_client("topsecret", ClientStatus::Active);
        let mut map = HashMap::new();
        map.insert(prefix.clone(), client.clone());
        let provider = PresharedKeyAuthN::new(FakeLookup { clients: Mutex::new(map) });

        let raw_key = format!("{prefix}topsecret");
        let result = provider.verify(&PresentedCredential { raw_key }).await.expect("verifies");
        assert_eq!(result.client_id, client.id);
        assert_eq!(result.user_id, client.user_id);
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let (prefix, client) = make_client("topsecret", ClientStatus::Active);
        let mut map = HashMap::new();
        map.insert(prefix.clone(), client);
        let provider = PresharedKeyAuthN::new(FakeLookup { clients: Mutex::new(map) });

        let raw_key = format!("{prefix}wrongsecret");
        let result = provider.verify(&PresentedCredential { raw_key }).await;
        assert!(matches!(result, Err(AuthNError::Rejected)));
    }

    #[tokio::test]
    async fn rejects_unknown_prefix() {
        let provider = PresharedKeyAuthN::new(FakeLookup { clients: Mutex::new(HashMap::new()) });
        let result = provider
            .verify(&PresentedCredential { raw_key: "unknown1topsecret".to_string() })
            .await;
        assert!(matches!(result, Err(AuthNError::Rejected)));
    }

    #[tokio::test]
    async fn rejects_suspended_client_even_with_correct_secret() {
        let (prefix, client) = make_client("topsecret", ClientStatus::Suspended);
        let mut map = HashMap::new();
        map.insert(prefix.clone(), client);
        let provider = PresharedKeyAuthN::new(FakeLookup { clients: Mutex::new(map) });

        let raw_key = format!("{prefix}topsecret");
        let result = provider.verify(&PresentedCredential { raw_key }).await;
        assert!(matches!(result, Err(AuthNError::Rejected)));
    }

    #[test]
    fn split_key_requires_more_than_prefix_length() {
        assert!(split_key("short").is_none());
        assert_eq!(split_key("abcd1234secret"), Some(("abcd1234", "secret")));
    }
}
