// ambassador-oauth/src/manager.rs
// ============================================================================
// Module: OAuth Token Manager
// Description: Drives the authorization-code + PKCE flow end to end and
//              persists the resulting token set as an envelope-encrypted
//              credential (spec.md §4.10).
// Purpose: Give the pipeline a single entry point for connecting, using,
//          and disconnecting a downstream tool server's own OAuth2 login,
//          without ever storing a client secret or a plaintext token.
// Dependencies: ambassador_core, ambassador_store_sqlite, ambassador_vault,
//               reqwest, serde, serde_json
// ============================================================================

//! ## Overview
//! [`OAuthTokenManager`] wraps a [`Store`] and a [`MasterKey`] and exposes
//! the four operations spec.md §4.10 names. A pending flow lives only as an
//! [`OAuthStateRow`]: state, PKCE verifier, and the originating
//! `(user, catalog_entry)` pair, time-boxed to
//! [`crate::pkce::DEFAULT_STATE_TTL_SECONDS`] and consumed exactly once on
//! exchange. The resulting token set is never returned to a caller outside
//! this crate in plaintext form once persisted; callers that need the
//! access token for an outbound call get it back directly from
//! [`OAuthTokenManager::exchange_code_for_tokens`] or
//! [`OAuthTokenManager::refresh_access_token`], but every subsequent lookup
//! goes back through the vault.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use ambassador_core::CatalogEntryId;
use ambassador_core::CredentialId;
use ambassador_core::CredentialType;
use ambassador_core::OAuthStateRow;
use ambassador_core::OAuthStatus;
use ambassador_core::Timestamp;
use ambassador_core::UserCredential;
use ambassador_core::UserId;
use ambassador_store_sqlite::Store;
use ambassador_store_sqlite::StoreError;
use ambassador_vault::MasterKey;
use ambassador_vault::VaultError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::config::CredentialEnvError;
use crate::config::OAuthConfig;
use crate::config::RESERVED_OAUTH_PARAM_KEYS;
use crate::pkce::DEFAULT_STATE_TTL_SECONDS;
use crate::pkce::generate_pkce_pair;
use crate::pkce::generate_state;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors from an OAuth token-lifecycle operation.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// A caller-supplied extra parameter collided with a reserved key.
    #[error("extra parameter '{0}' is reserved by the authorization flow")]
    ReservedParameter(String),
    /// The required client id/secret environment variable was not set.
    #[error(transparent)]
    Credential(#[from] CredentialEnvError),
    /// The `state` value did not match a pending flow, or it already expired.
    #[error("OAuth state is unknown or has expired")]
    UnknownOrExpiredState,
    /// The downstream token endpoint rejected the exchange or refresh.
    #[error("downstream token endpoint returned an error: {0}")]
    TokenEndpoint(String),
    /// The token response body could not be parsed.
    #[error("token response was not well-formed: {0}")]
    MalformedTokenResponse(String),
    /// The user has no vault salt provisioned, so nothing can be encrypted.
    #[error("user has no vault salt provisioned")]
    NoVaultSalt,
    /// No credential is on file for this (user, catalog entry) pair.
    #[error("no credential is on file for this catalog entry")]
    NoCredential,
    /// Underlying credential vault failure.
    #[error(transparent)]
    Vault(#[from] VaultError),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The outbound HTTP call to the downstream provider failed.
    #[error("request to downstream OAuth endpoint failed: {0}")]
    Request(String),
}

// ============================================================================
// SECTION: Token Set
// ============================================================================

/// A decoded OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds, when the provider reported one.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Wire shape of a token endpoint's response, before it is re-packaged as
/// a public [`TokenSet`].
#[derive(Debug, Deserialize)]
struct TokenResponse {
    /// Bearer access token.
    access_token: String,
    /// Refresh token, when the provider issued one.
    #[serde(default)]
    refresh_token: Option<String>,
    /// Access token lifetime in seconds, when the provider reported one.
    #[serde(default)]
    expires_in: Option<u64>,
}

// ============================================================================
// SECTION: Token Manager
// ============================================================================

/// Drives the authorization-code + PKCE flow and persists its result.
pub struct OAuthTokenManager {
    store: Arc<Store>,
    master_key: Arc<MasterKey>,
    http: reqwest::Client,
}

impl OAuthTokenManager {
    /// Builds a manager over `store`, encrypting credentials under
    /// `master_key`.
    #[must_use]
    pub fn new(store: Arc<Store>, master_key: Arc<MasterKey>) -> Self {
        Self { store, master_key, http: reqwest::Client::new() }
    }

    /// Mints a fresh authorization URL for `user_id` to connect
    /// `catalog_entry_id`, persisting the pending PKCE flow.
    ///
    /// `extra_params` are appended to the query string; any key also in
    /// [`RESERVED_OAUTH_PARAM_KEYS`] is rejected rather than silently
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::ReservedParameter`] on a reserved-key
    /// collision, or [`OAuthError::Store`] when persisting the flow fails.
    pub async fn generate_authorization_url(
        &self,
        user_id: UserId,
        catalog_entry_id: CatalogEntryId,
        config: &OAuthConfig,
        extra_params: &[(String, String)],
    ) -> Result<String, OAuthError> {
        for (key, _) in extra_params {
            if RESERVED_OAUTH_PARAM_KEYS.contains(&key.as_str()) {
                return Err(OAuthError::ReservedParameter(key.clone()));
            }
        }

        let (client_id, _client_secret) = config.resolve_credentials()?;
        let (verifier, challenge) = generate_pkce_pair();
        let state = generate_state();
        let now = Timestamp::now();

        self.store
            .create_oauth_state(OAuthStateRow {
                state: state.clone(),
                user_id,
                catalog_entry_id,
                code_verifier: verifier,
                redirect_uri: config.redirect_uri.clone(),
                created_at: now,
                expires_at: now + std::time::Duration::from_secs(DEFAULT_STATE_TTL_SECONDS),
            })
            .await?;

        let mut url = reqwest::Url::parse(&config.authorization_url).map_err(|error| OAuthError::Request(error.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &client_id);
            query.append_pair("redirect_uri", &config.redirect_uri);
            query.append_pair("state", &state);
            query.append_pair("code_challenge", &challenge);
            query.append_pair("code_challenge_method", "S256");
            if !config.scopes.is_empty() {
                query.append_pair("scope", &config.scopes.join(" "));
            }
            for (key, value) in extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    /// Completes a pending flow: consumes its state row, exchanges `code`
    /// for a token set, and persists it as an encrypted credential.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::UnknownOrExpiredState`] when `state` does not
    /// match a live pending flow, [`OAuthError::TokenEndpoint`] when the
    /// exchange itself is rejected, or [`OAuthError::NoVaultSalt`] when the
    /// owning user has none provisioned.
    pub async fn exchange_code_for_tokens(
        &self,
        state: String,
        code: &str,
        config: &OAuthConfig,
    ) -> Result<(UserId, CatalogEntryId, TokenSet), OAuthError> {
        let pending = self.store.consume_oauth_state(state).await?.ok_or(OAuthError::UnknownOrExpiredState)?;
        if !Timestamp::now().is_before(pending.expires_at) {
            return Err(OAuthError::UnknownOrExpiredState);
        }

        let (client_id, client_secret) = config.resolve_credentials()?;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", pending.redirect_uri.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];

        let token_set = self.post_token_request(&config.token_url, &form).await?;
        self.persist_token_set(pending.user_id.clone(), pending.catalog_entry_id.clone(), &token_set).await?;
        Ok((pending.user_id, pending.catalog_entry_id, token_set))
    }

    /// Exchanges a stored refresh token for a fresh access token, updating
    /// the persisted credential in place.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::TokenEndpoint`] when the provider rejects the
    /// refresh, or [`OAuthError::NoVaultSalt`]/[`OAuthError::Vault`] if the
    /// stored credential cannot be decrypted.
    pub async fn refresh_access_token(
        &self,
        user_id: UserId,
        catalog_entry_id: CatalogEntryId,
        config: &OAuthConfig,
    ) -> Result<TokenSet, OAuthError> {
        let current = self.decrypt_token_set(user_id.clone(), catalog_entry_id.clone()).await?;
        let Some(refresh_token) = current.refresh_token else {
            return Err(OAuthError::TokenEndpoint("no refresh token on file".to_string()));
        };
        let (client_id, client_secret) = config.resolve_credentials()?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
        ];
        let refreshed = self.post_token_request(&config.token_url, &form).await?;
        self.persist_token_set(user_id, catalog_entry_id, &refreshed).await?;
        Ok(refreshed)
    }

    /// Best-effort revocation at the downstream provider. Never fails the
    /// caller: a provider that rejects or does not support revocation
    /// still has its local credential deleted.
    pub async fn revoke_tokens(&self, user_id: UserId, catalog_entry_id: CatalogEntryId, config: &OAuthConfig) {
        if let Some(revocation_url) = &config.revocation_url {
            if let Ok(current) = self.decrypt_token_set(user_id.clone(), catalog_entry_id.clone()).await {
                if let Ok((client_id, client_secret)) = config.resolve_credentials() {
                    let form = [
                        ("token", current.access_token.as_str()),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                    ];
                    let _ignored = self.http.post(revocation_url).form(&form).send().await;
                }
            }
        }

        if let Ok(Some(credential)) = self.store.get_user_credential(user_id, catalog_entry_id).await {
            let _ignored = self.store.delete_user_credential(credential.id).await;
        }
    }

    /// Deletes every expired pending flow.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthError::Store`] when the underlying sweep fails.
    pub async fn cleanup_expired_states(&self) -> Result<u64, OAuthError> {
        Ok(self.store.cleanup_expired_oauth_states(Timestamp::now()).await?)
    }

    /// Posts a form-encoded grant request and decodes the resulting token set.
    async fn post_token_request(&self, token_url: &str, form: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let response = self.http.post(token_url).form(form).send().await.map_err(|error| OAuthError::Request(error.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::TokenEndpoint(format!("{status}: {body}")));
        }
        let parsed: TokenResponse = response.json().await.map_err(|error| OAuthError::MalformedTokenResponse(error.to_string()))?;
        Ok(TokenSet { access_token: parsed.access_token, refresh_token: parsed.refresh_token, expires_in: parsed.expires_in })
    }

    /// Envelope-encrypts `tokens` under the owning user's vault salt and
    /// upserts the resulting credential row.
    async fn persist_token_set(&self, user_id: UserId, catalog_entry_id: CatalogEntryId, tokens: &TokenSet) -> Result<(), OAuthError> {
        let user = self.store.get_user(user_id.clone()).await?;
        let vault_salt = user.and_then(|u| u.vault_salt).ok_or(OAuthError::NoVaultSalt)?;

        let plaintext = serde_json::to_vec(tokens).map_err(|error| OAuthError::MalformedTokenResponse(error.to_string()))?;
        let (ciphertext, iv) = ambassador_vault::encrypt(&self.master_key, &vault_salt, &plaintext);

        let existing = self.store.get_user_credential(user_id.clone(), catalog_entry_id.clone()).await?;
        let id = existing.map_or_else(CredentialId::generate, |credential| credential.id);
        let expires_at = tokens.expires_in.map(|seconds| Timestamp::now() + std::time::Duration::from_secs(seconds));

        self.store
            .upsert_user_credential(UserCredential {
                id,
                user_id,
                catalog_entry_id,
                ciphertext,
                iv,
                credential_type: CredentialType::OAuth2,
                expires_at,
                oauth_status: Some(OAuthStatus::Success),
            })
            .await?;
        Ok(())
    }

    /// Loads and decrypts the persisted token set for a (user, catalog
    /// entry) pair.
    async fn decrypt_token_set(&self, user_id: UserId, catalog_entry_id: CatalogEntryId) -> Result<TokenSet, OAuthError> {
        let user = self.store.get_user(user_id.clone()).await?;
        let vault_salt = user.and_then(|u| u.vault_salt).ok_or(OAuthError::NoVaultSalt)?;
        let credential = self.store.get_user_credential(user_id, catalog_entry_id).await?.ok_or(OAuthError::NoCredential)?;
        let plaintext = ambassador_vault::decrypt(&self.master_key, &vault_salt, &credential.ciphertext, &credential.iv)?;
        serde_json::from_slice(plaintext.as_slice()).map_err(|error| OAuthError::MalformedTokenResponse(error.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;
    use ambassador_core::UserStatus;
    use serde_json::json;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    const CLIENT_ID_ENV: &str = "AMBASSADOR_TEST_OAUTH_CLIENT_ID";
    const CLIENT_SECRET_ENV: &str = "AMBASSADOR_TEST_OAUTH_CLIENT_SECRET";

    fn config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            authorization_url: "https://provider.example/authorize".to_string(),
            token_url,
            revocation_url: None,
            redirect_uri: "https://ambassador.example/oauth/callback".to_string(),
            scopes: vec!["repo".to_string(), "read:user".to_string()],
            client_id_env: CLIENT_ID_ENV.to_string(),
            client_secret_env: CLIENT_SECRET_ENV.to_string(),
        }
    }

    /// Guards the process-global env vars the tests in this module set, so
    /// parallel test execution can't interleave a set with another test's
    /// read. `cargo test` runs this module's tests on one thread pool but
    /// env vars are still process-wide, hence the explicit mutex.
    fn env_lock() -> &'static std::sync::Mutex<()> {
        static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
    }

    async fn manager_with_user() -> (OAuthTokenManager, UserId, [u8; 32]) {
        let store = Arc::new(Store::open_in_memory().expect("opens in-memory store"));
        let master_key = Arc::new(MasterKey::from_bytes([7u8; 32]));
        let user_id = UserId::generate();
        let now = Timestamp::now();
        store
            .create_user(ambassador_core::User {
                id: user_id.clone(),
                username: "octavia".to_string(),
                is_admin: false,
                status: UserStatus::Active,
                vault_salt: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("creates user");
        let vault_salt = ambassador_vault::generate_vault_salt();
        store.set_vault_salt(user_id.clone(), vault_salt).await.expect("sets vault salt");
        (OAuthTokenManager::new(store, master_key), user_id, vault_salt)
    }

    #[tokio::test]
    #[allow(unsafe_code, reason = "test-only env var mutation, guarded by env_lock")]
    async fn generate_authorization_url_rejects_reserved_extra_params() {
        let (manager, user_id, _salt) = manager_with_user().await;
        let _guard = env_lock().lock().expect("lock not poisoned");
        // SAFETY (not actually unsafe): env var access is serialized by `env_lock`.
        unsafe {
            std::env::set_var(CLIENT_ID_ENV, "client-123");
            std::env::set_var(CLIENT_SECRET_ENV, "shh");
        }
        let config = config("https://provider.example/token".to_string());

        let error = manager
            .generate_authorization_url(user_id, CatalogEntryId::generate(), &config, &[("state".to_string(), "attacker-controlled".to_string())])
            .await
            .expect_err("reserved key rejected");

        assert!(matches!(error, OAuthError::ReservedParameter(key) if key == "state"));
    }

    #[tokio::test]
    #[allow(unsafe_code, reason = "test-only env var mutation, guarded by env_lock")]
    async fn generate_authorization_url_persists_pending_state_and_builds_url() {
        let (manager, user_id, _salt) = manager_with_user().await;
        let _guard = env_lock().lock().expect("lock not poisoned");
        // SAFETY (not actually unsafe): env var access is serialized by `env_lock`.
        unsafe {
            std::env::set_var(CLIENT_ID_ENV, "client-123");
            std::env::set_var(CLIENT_SECRET_ENV, "shh");
        }
        let config = config("https://provider.example/token".to_string());

        let url = manager
            .generate_authorization_url(user_id, CatalogEntryId::generate(), &config, &[("prompt".to_string(), "consent".to_string())])
            .await
            .expect("builds url");

        assert!(url.starts_with("https://provider.example/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("scope=repo+read%3Auser"));
        assert!(url.contains("prompt=consent"));
    }

    #[tokio::test]
    async fn exchange_code_for_tokens_rejects_unknown_state() {
        let (manager, _user_id, _salt) = manager_with_user().await;
        let config = config("https://provider.example/token".to_string());

        let error = manager.exchange_code_for_tokens("never-issued".to_string(), "some-code", &config).await.expect_err("unknown state rejected");

        assert!(matches!(error, OAuthError::UnknownOrExpiredState));
    }

    #[tokio::test]
    #[allow(unsafe_code, reason = "test-only env var mutation, guarded by env_lock")]
    async fn exchange_code_for_tokens_persists_an_encrypted_credential() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
            })))
            .mount(&mock_server)
            .await;

        let (manager, user_id, _salt) = manager_with_user().await;
        let _guard = env_lock().lock().expect("lock not poisoned");
        // SAFETY (not actually unsafe): env var access is serialized by `env_lock`.
        unsafe {
            std::env::set_var(CLIENT_ID_ENV, "client-123");
            std::env::set_var(CLIENT_SECRET_ENV, "shh");
        }
        let config = config(format!("{}/token", mock_server.uri()));
        let catalog_entry_id = CatalogEntryId::generate();
        let url = manager.generate_authorization_url(user_id.clone(), catalog_entry_id.clone(), &config, &[]).await.expect("builds url");
        let state = reqwest::Url::parse(&url)
            .expect("valid url")
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("state present");

        let (returned_user, returned_entry, tokens) =
            manager.exchange_code_for_tokens(state, "auth-code", &config).await.expect("exchanges code");

        assert_eq!(returned_user, user_id);
        assert_eq!(returned_entry, catalog_entry_id);
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));

        let decrypted = manager.decrypt_token_set(returned_user, returned_entry).await.expect("round-trips through the vault");
        assert_eq!(decrypted.access_token, "at-1");
    }

    #[tokio::test]
    #[allow(unsafe_code, reason = "test-only env var mutation, guarded by env_lock")]
    async fn refresh_access_token_updates_the_persisted_credential() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-refreshed",
                "refresh_token": "rt-refreshed",
            })))
            .mount(&mock_server)
            .await;

        let (manager, user_id, _salt) = manager_with_user().await;
        let _guard = env_lock().lock().expect("lock not poisoned");
        // SAFETY (not actually unsafe): env var access is serialized by `env_lock`.
        unsafe {
            std::env::set_var(CLIENT_ID_ENV, "client-123");
            std::env::set_var(CLIENT_SECRET_ENV, "shh");
        }
        let config = config(format!("{}/token", mock_server.uri()));
        let catalog_entry_id = CatalogEntryId::generate();

        let seed = TokenSet { access_token: "at-old".to_string(), refresh_token: Some("rt-old".to_string()), expires_in: None };
        manager.persist_token_set(user_id.clone(), catalog_entry_id.clone(), &seed).await.expect("seeds a credential");

        let refreshed = manager.refresh_access_token(user_id.clone(), catalog_entry_id.clone(), &config).await.expect("refreshes");
        assert_eq!(refreshed.access_token, "at-refreshed");

        let decrypted = manager.decrypt_token_set(user_id, catalog_entry_id).await.expect("decrypts refreshed credential");
        assert_eq!(decrypted.access_token, "at-refreshed");
    }

    #[tokio::test]
    async fn refresh_access_token_fails_without_a_refresh_token_on_file() {
        let (manager, user_id, _salt) = manager_with_user().await;
        let config = config("https://provider.example/token".to_string());
        let catalog_entry_id = CatalogEntryId::generate();
        let seed = TokenSet { access_token: "at-old".to_string(), refresh_token: None, expires_in: None };
        manager.persist_token_set(user_id.clone(), catalog_entry_id.clone(), &seed).await.expect("seeds a credential");

        let error = manager.refresh_access_token(user_id, catalog_entry_id, &config).await.expect_err("no refresh token");

        assert!(matches!(error, OAuthError::TokenEndpoint(_)));
    }

    #[tokio::test]
    #[allow(unsafe_code, reason = "test-only env var mutation, guarded by env_lock")]
    async fn revoke_tokens_deletes_the_local_credential_even_if_the_endpoint_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/revoke")).respond_with(ResponseTemplate::new(500)).mount(&mock_server).await;

        let (manager, user_id, _salt) = manager_with_user().await;
        let _guard = env_lock().lock().expect("lock not poisoned");
        // SAFETY (not actually unsafe): env var access is serialized by `env_lock`.
        unsafe {
            std::env::set_var(CLIENT_ID_ENV, "client-123");
            std::env::set_var(CLIENT_SECRET_ENV, "shh");
        }
        let mut config = config("https://provider.example/token".to_string());
        config.revocation_url = Some(format!("{}/revoke", mock_server.uri()));
        let catalog_entry_id = CatalogEntryId::generate();
        let seed = TokenSet { access_token: "at-old".to_string(), refresh_token: None, expires_in: None };
        manager.persist_token_set(user_id.clone(), catalog_entry_id.clone(), &seed).await.expect("seeds a credential");

        manager.revoke_tokens(user_id.clone(), catalog_entry_id.clone(), &config).await;

        let error = manager.decrypt_token_set(user_id, catalog_entry_id).await.expect_err("credential is gone");
        assert!(matches!(error, OAuthError::NoCredential));
    }

    #[tokio::test]
    async fn revoke_tokens_is_a_no_op_when_nothing_is_on_file() {
        let (manager, user_id, _salt) = manager_with_user().await;
        let config = config("https://provider.example/token".to_string());
        manager.revoke_tokens(user_id, CatalogEntryId::generate(), &config).await;
    }

    #[tokio::test]
    async fn cleanup_expired_states_sweeps_out_of_date_flows() {
        let (manager, user_id, _salt) = manager_with_user().await;
        let catalog_entry_id = CatalogEntryId::generate();
        let now = Timestamp::now();
        manager
            .store
            .create_oauth_state(OAuthStateRow {
                state: "stale-state".to_string(),
                user_id,
                catalog_entry_id,
                code_verifier: "verifier".to_string(),
                redirect_uri: "https://ambassador.example/oauth/callback".to_string(),
                created_at: now,
                expires_at: now - std::time::Duration::from_secs(1),
            })
            .await
            .expect("persists a pending flow");

        let removed = manager.cleanup_expired_states().await.expect("sweeps");
        assert_eq!(removed, 1);
    }
}
