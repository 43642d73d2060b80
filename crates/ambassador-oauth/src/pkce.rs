// ambassador-oauth/src/pkce.rs
// ============================================================================
// Module: PKCE and CSRF State Generation
// Description: Hand-rolled PKCE code_verifier/code_challenge and OAuth
//              state generation (spec.md §4.10).
// Purpose: Produce the two random values an authorization-code + PKCE flow
//          needs without depending on a dedicated OAuth2 client crate for
//          primitives this workspace already has: random bytes, SHA-256,
//          and base64url.
// Dependencies: base64, rand, sha2
// ============================================================================

//! ## Overview
//! `code_verifier` is 64 random bytes, base64url-encoded (no padding);
//! `code_challenge` is the base64url (no padding) SHA-256 digest of the
//! verifier's ASCII bytes, matching RFC 7636's `S256` method exactly. OAuth
//! `state` is a separate 32-byte random value, encoded the same way, used
//! only to correlate the callback with the persisted flow — it carries no
//! cryptographic relationship to the verifier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Digest;
use sha2::Sha256;

/// Default lifetime of a pending authorization-code flow, in seconds
/// (spec.md §4.10: 10 minutes).
pub const DEFAULT_STATE_TTL_SECONDS: u64 = 600;

/// Byte length of the random PKCE code verifier before encoding.
const VERIFIER_BYTES: usize = 64;
/// Byte length of the random CSRF state value before encoding.
const STATE_BYTES: usize = 32;

fn random_base64url(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a fresh PKCE code verifier and its `S256` challenge.
#[must_use]
pub fn generate_pkce_pair() -> (String, String) {
    let verifier = random_base64url(VERIFIER_BYTES);
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}

/// Generates a fresh, unguessable OAuth `state` value.
#[must_use]
pub fn generate_state() -> String {
    random_base64url(STATE_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_the_sha256_of_the_verifier() {
        let (verifier, challenge) = generate_pkce_pair();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, expected);
    }

    #[test]
    fn successive_calls_produce_distinct_values() {
        let (verifier_one, _) = generate_pkce_pair();
        let (verifier_two, _) = generate_pkce_pair();
        assert_ne!(verifier_one, verifier_two);
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn encoded_values_contain_no_padding_or_reserved_url_characters() {
        let (verifier, challenge) = generate_pkce_pair();
        for value in [&verifier, &challenge, &generate_state()] {
            assert!(!value.contains('='));
            assert!(!value.contains('+'));
            assert!(!value.contains('/'));
        }
    }
}
