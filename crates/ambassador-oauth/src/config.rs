// ambassador-oauth/src/config.rs
// ============================================================================
// Module: OAuth Configuration
// Description: Per-catalog-entry OAuth2 endpoint and credential-resolution
//              configuration (spec.md §4.10).
// Purpose: Describe where a downstream tool server's OAuth2 endpoints live
//          and which environment variables hold its client credentials,
//          without ever storing the credentials themselves.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`OAuthConfig`] is deserialized from a [`ambassador_core::CatalogEntry`]'s
//! `oauth_config` field. `client_id_env`/`client_secret_env` name
//! environment variables resolved at call time (never persisted); every
//! other field describes the flow's static shape.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;

// ============================================================================
// SECTION: Reserved Parameters
// ============================================================================

/// Query parameter keys the Ambassador always sets itself; a caller-supplied
/// `extra_params` entry using one of these is rejected rather than silently
/// overwritten (spec.md §4.10).
pub const RESERVED_OAUTH_PARAM_KEYS: &[&str] =
    &["response_type", "client_id", "redirect_uri", "state", "code_challenge", "code_challenge_method", "scope"];

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Per-catalog-entry OAuth2 configuration, deserialized from
/// [`ambassador_core::CatalogEntry::oauth_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Authorization endpoint the user's browser is redirected to.
    pub authorization_url: String,
    /// Token endpoint used for code exchange and refresh.
    pub token_url: String,
    /// Revocation endpoint, when the provider supports one.
    #[serde(default)]
    pub revocation_url: Option<String>,
    /// Redirect URI registered with the downstream provider.
    pub redirect_uri: String,
    /// Requested scopes, space-joined when composing the authorization URL.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Name of the environment variable holding the OAuth client id.
    pub client_id_env: String,
    /// Name of the environment variable holding the OAuth client secret.
    pub client_secret_env: String,
}

/// Errors resolving OAuth client credentials from the environment.
#[derive(Debug, thiserror::Error)]
pub enum CredentialEnvError {
    /// The named environment variable was not set.
    #[error("environment variable '{0}' is not set")]
    Missing(String),
}

impl OAuthConfig {
    /// Resolves `(client_id, client_secret)` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialEnvError::Missing`] naming whichever variable is
    /// unset.
    pub fn resolve_credentials(&self) -> Result<(String, String), CredentialEnvError> {
        let client_id = std::env::var(&self.client_id_env).map_err(|_| CredentialEnvError::Missing(self.client_id_env.clone()))?;
        let client_secret = std::env::var(&self.client_secret_env).map_err(|_| CredentialEnvError::Missing(self.client_secret_env.clone()))?;
        Ok((client_id, client_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_cover_every_parameter_the_authorization_url_sets() {
        assert!(RESERVED_OAUTH_PARAM_KEYS.contains(&"client_id"));
        assert!(RESERVED_OAUTH_PARAM_KEYS.contains(&"code_challenge_method"));
    }
}
