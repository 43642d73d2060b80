// ambassador-vault/src/lib.rs
// ============================================================================
// Module: Ambassador Credential Vault
// Description: Envelope encryption for per-user MCP credentials.
// Purpose: Encrypt and decrypt per-user secrets under a per-user key derived
//          from a process-wide master key, so compromise of the store alone
//          never discloses plaintext credentials.
// Dependencies: ambassador-core, aes-gcm, hkdf, rand, sha2, zeroize
// ============================================================================

//! ## Overview
//! The vault never sees a credential without a caller-supplied `vault_salt`:
//! given `(master_key, vault_salt)` it derives a 32-byte per-user key with
//! HKDF-SHA256, then uses that key as an AES-256-GCM AEAD key with a random
//! 12-byte IV per encryption (spec.md §4.2). Derived keys are wrapped in
//! [`Zeroizing`] so they are wiped from memory the moment they go out of
//! scope; master-key material lives in a [`MasterKey`] that zeroizes on drop.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod master_key;

pub use master_key::MASTER_KEY_FILE_NAME;
pub use master_key::MasterKey;
pub use master_key::MasterKeyError;

// ============================================================================
// SECTION: Imports
// ============================================================================

use aes_gcm::Aes256Gcm;
use aes_gcm::Key;
use aes_gcm::Nonce;
use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use ambassador_core::ErrorKind;
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length, in bytes, of a vault salt.
pub const VAULT_SALT_LEN: usize = 32;
/// Length, in bytes, of an AEAD IV.
pub const VAULT_IV_LEN: usize = 12;
/// HKDF context label binding derived keys to this vault's purpose.
const HKDF_INFO: &[u8] = b"ambassador-vault/per-user-key/v1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Vault operation errors.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The ciphertext did not decrypt under the given key and IV.
    ///
    /// Returned for a wrong vault salt, a wrong IV, or any tampering with
    /// the ciphertext bytes (I-7): AEAD tag verification does not
    /// distinguish these cases, and neither does the vault.
    #[error("vault decryption failed")]
    DecryptionFailed,
    /// A supplied IV was not exactly [`VAULT_IV_LEN`] bytes.
    #[error("vault IV must be exactly {VAULT_IV_LEN} bytes")]
    InvalidIvLength,
}

impl VaultError {
    /// Maps this error onto the shared pipeline error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DecryptionFailed | Self::InvalidIvLength => ErrorKind::DecryptionFailed,
        }
    }
}

// ============================================================================
// SECTION: Per-User Key Derivation
// ============================================================================

/// Derives the per-user AEAD key for `vault_salt` under `master_key`.
///
/// The result is wrapped in [`Zeroizing`] so it is wiped from memory as
/// soon as the caller drops it.
fn derive_user_key(master_key: &MasterKey, vault_salt: &[u8; VAULT_SALT_LEN]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(vault_salt), master_key.as_bytes());
    let mut derived = Zeroizing::new([0u8; 32]);
    // HKDF-Expand only fails when the requested output exceeds 255 * hash
    // length; 32 bytes from SHA-256 output never hits that ceiling.
    #[allow(clippy::expect_used, reason = "fixed 32-byte output cannot exceed HKDF's length ceiling")]
    hkdf.expand(HKDF_INFO, derived.as_mut_slice())
        .expect("32-byte HKDF-SHA256 expansion is always within bounds");
    derived
}

// ============================================================================
// SECTION: Vault Operations
// ============================================================================

/// Envelope-encrypts `plaintext` under the per-user key for `vault_salt`.
///
/// Returns the ciphertext (including the 16-byte AEAD tag) and the random
/// IV used, which the caller must persist alongside the ciphertext.
#[must_use]
pub fn encrypt(
    master_key: &MasterKey,
    vault_salt: &[u8; VAULT_SALT_LEN],
    plaintext: &[u8],
) -> (Vec<u8>, [u8; VAULT_IV_LEN]) {
    let user_key = derive_user_key(master_key, vault_salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(user_key.as_slice()));

    let mut iv_bytes = [0u8; VAULT_IV_LEN];
    OsRng.fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    #[allow(clippy::expect_used, reason = "encryption with a freshly derived 32-byte key cannot fail")]
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption with a valid key never fails");

    (ciphertext, iv_bytes)
}

/// Decrypts `ciphertext` that was produced by [`encrypt`] under the same
/// `(master_key, vault_salt, iv)` triple.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] when the salt, IV, or
/// ciphertext does not match what was used to encrypt (I-7).
pub fn decrypt(
    master_key: &MasterKey,
    vault_salt: &[u8; VAULT_SALT_LEN],
    ciphertext: &[u8],
    iv: &[u8; VAULT_IV_LEN],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let user_key = derive_user_key(master_key, vault_salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(user_key.as_slice()));
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_tag_mismatch| VaultError::DecryptionFailed)
}

/// Re-wraps `ciphertext` under `new_master_key`, decrypting it first with
/// `old_master_key`.
///
/// Used when rotating the master key: every stored credential must be
/// re-encrypted before the old key is discarded.
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] when `ciphertext` does not
/// decrypt under `old_master_key`.
pub fn re_encrypt(
    old_master_key: &MasterKey,
    new_master_key: &MasterKey,
    vault_salt: &[u8; VAULT_SALT_LEN],
    ciphertext: &[u8],
    iv: &[u8; VAULT_IV_LEN],
) -> Result<(Vec<u8>, [u8; VAULT_IV_LEN]), VaultError> {
    let plaintext = decrypt(old_master_key, vault_salt, ciphertext, iv)?;
    Ok(encrypt(new_master_key, vault_salt, plaintext.as_slice()))
}

/// Generates a fresh random vault salt for a newly provisioned user.
#[must_use]
pub fn generate_vault_salt() -> [u8; VAULT_SALT_LEN] {
    let mut salt = [0u8; VAULT_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let master_key = test_master_key();
        let salt = generate_vault_salt();
        let plaintext = b"super secret api token";

        let (ciphertext, iv) = encrypt(&master_key, &salt, plaintext);
        let recovered = decrypt(&master_key, &salt, &ciphertext, &iv).expect("decrypts cleanly");
        assert_eq!(recovered.as_slice(), plaintext);
    }

    #[test]
    fn decryption_fails_under_wrong_salt() {
        let master_key = test_master_key();
        let salt = generate_vault_salt();
        let other_salt = generate_vault_salt();
        let (ciphertext, iv) = encrypt(&master_key, &salt, b"secret");
        assert!(decrypt(&master_key, &other_salt, &ciphertext, &iv).is_err());
    }

    #[test]
    fn decryption_fails_under_wrong_iv() {
        let master_key = test_master_key();
        let salt = generate_vault_salt();
        let (ciphertext, mut iv) = encrypt(&master_key, &salt, b"secret");
        iv[0] ^= 0xFF;
        assert!(decrypt(&master_key, &salt, &ciphertext, &iv).is_err());
    }

    #[test]
    fn decryption_fails_after_ciphertext_tampering() {
        let master_key = test_master_key();
        let salt = generate_vault_salt();
        let (mut ciphertext, iv) = encrypt(&master_key, &salt, b"secret");
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(decrypt(&master_key, &salt, &ciphertext, &iv).is_err());
    }

    #[test]
    fn re_encrypt_allows_master_key_rotation() {
        let old_key = test_master_key();
        let new_key = MasterKey::from_bytes([9u8; 32]);
        let salt = generate_vault_salt();
        let (ciphertext, iv) = encrypt(&old_key, &salt, b"rotate me");

        let (rewrapped, new_iv) = re_encrypt(&old_key, &new_key, &salt, &ciphertext, &iv).expect("rewraps");
        assert!(decrypt(&old_key, &salt, &rewrapped, &new_iv).is_err());
        let recovered = decrypt(&new_key, &salt, &rewrapped, &new_iv).expect("decrypts under new key");
        assert_eq!(recovered.as_slice(), b"rotate me");
    }

    #[test]
    fn distinct_encryptions_use_distinct_ivs() {
        let master_key = test_master_key();
        let salt = generate_vault_salt();
        let (_, iv_one) = encrypt(&master_key, &salt, b"same plaintext");
        let (_, iv_two) = encrypt(&master_key, &salt, b"same plaintext");
        assert_ne!(iv_one, iv_two);
    }
}
