// ambassador-vault/src/master_key.rs
// ============================================================================
// Module: Master Key Loading
// Description: Resolves the 32-byte vault master key at startup.
// Purpose: Load or provision the master key with a fixed, documented
//          priority order, never silently falling back to a weaker source.
// Dependencies: rand, zeroize
// ============================================================================

//! ## Overview
//! The master key is resolved in priority order (spec.md §4.2): an
//! environment variable holding 64 hex characters, then a file in the data
//! directory (mode 0600), and only if neither is present, a freshly
//! generated key persisted atomically (write to a temp file, then rename)
//! at mode 0600. The in-memory representation zeroizes on drop.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Filename of the persisted master key within the data directory.
pub const MASTER_KEY_FILE_NAME: &str = "credential_master_key";

/// Environment variable carrying the master key as 64 hex characters.
const MASTER_KEY_ENV_VAR: &str = "AMBASSADOR_MASTER_KEY";

/// File mode applied to the persisted master key file (owner read/write only).
const MASTER_KEY_FILE_MODE: u32 = 0o600;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors resolving or persisting the master key.
#[derive(Debug, Error)]
pub enum MasterKeyError {
    /// The environment variable was present but not valid 64-hex.
    #[error("{MASTER_KEY_ENV_VAR} must contain exactly 64 hex characters")]
    InvalidEnvEncoding,
    /// The key file existed but did not contain valid 64-hex content.
    #[error("master key file {0} does not contain 64 hex characters")]
    InvalidFileEncoding(PathBuf),
    /// An I/O error occurred reading, writing, or setting permissions on
    /// the master key file.
    #[error("master key file I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// SECTION: Master Key
// ============================================================================

/// A resolved 32-byte vault master key.
///
/// Zeroizes its backing bytes when dropped.
#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Wraps raw key bytes directly, bypassing environment/file resolution.
    ///
    /// Intended for tests and for callers that have already resolved a key
    /// through some other mechanism (e.g. a secrets manager).
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Resolves the master key using the priority order from spec.md §4.2:
    /// environment variable, then data-directory file, then autogenerate
    /// and persist.
    ///
    /// # Errors
    ///
    /// Returns [`MasterKeyError`] when the environment variable or key
    /// file is present but malformed, or when the file cannot be read,
    /// written, or have its permissions set.
    pub fn resolve(data_dir: &Path) -> Result<Self, MasterKeyError> {
        if let Ok(hex_value) = std::env::var(MASTER_KEY_ENV_VAR) {
            return decode_hex_32(&hex_value).ok_or(MasterKeyError::InvalidEnvEncoding).map(Self);
        }

        let key_path = data_dir.join(MASTER_KEY_FILE_NAME);
        if key_path.exists() {
            let contents = fs::read_to_string(&key_path)?;
            let bytes = decode_hex_32(contents.trim())
                .ok_or_else(|| MasterKeyError::InvalidFileEncoding(key_path.clone()))?;
            return Ok(Self(bytes));
        }

        let mut generated = [0u8; 32];
        OsRng.fill_bytes(&mut generated);
        persist_atomically(&key_path, &generated)?;
        Ok(Self(generated))
    }
}

// ============================================================================
// SECTION: Encoding Helpers
// ============================================================================

fn decode_hex_32(text: &str) -> Option<[u8; 32]> {
    if text.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (index, chunk) in text.as_bytes().chunks_exact(2).enumerate() {
        let high = (chunk[0] as char).to_digit(16)?;
        let low = (chunk[1] as char).to_digit(16)?;
        #[allow(clippy::cast_possible_truncation, reason = "high and low are each single hex nibbles, max value 15")]
        let byte = ((high << 4) | low) as u8;
        out[index] = byte;
    }
    Some(out)
}

fn encode_hex(bytes: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Writes `bytes` as hex to `path` via temp-file-then-rename, at mode 0600.
fn persist_atomically(path: &Path, bytes: &[u8; 32]) -> Result<(), io::Error> {
    let mut hex = encode_hex(bytes);
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let temp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|name| name.to_str()).unwrap_or(MASTER_KEY_FILE_NAME)
    ));

    fs::write(&temp_path, hex.as_bytes())?;
    fs::set_permissions(&temp_path, fs::Permissions::from_mode(MASTER_KEY_FILE_MODE))?;
    fs::rename(&temp_path, path)?;
    hex.zeroize();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "test assertions")]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_round_trips() {
        let key = MasterKey::from_bytes([1u8; 32]);
        assert_eq!(key.as_bytes(), &[1u8; 32]);
    }

    #[test]
    fn resolve_generates_and_persists_when_absent() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let key_path = temp_dir.path().join(MASTER_KEY_FILE_NAME);
        assert!(!key_path.exists());

        let first = MasterKey::resolve(temp_dir.path()).expect("resolves");
        assert!(key_path.exists());

        let permissions = fs::metadata(&key_path).expect("metadata").permissions();
        assert_eq!(permissions.mode() & 0o777, MASTER_KEY_FILE_MODE);

        let second = MasterKey::resolve(temp_dir.path()).expect("resolves again");
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn resolve_rejects_malformed_file_contents() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let key_path = temp_dir.path().join(MASTER_KEY_FILE_NAME);
        fs::write(&key_path, b"not-hex-at-all").expect("write malformed key");

        let result = MasterKey::resolve(temp_dir.path());
        assert!(matches!(result, Err(MasterKeyError::InvalidFileEncoding(_))));
    }

    #[test]
    fn decode_hex_32_rejects_wrong_length() {
        assert!(decode_hex_32("abcd").is_none());
    }

    #[test]
    fn encode_then_decode_hex_round_trips() {
        let bytes = [0xAB; 32];
        let decoded = decode_hex_32(&encode_hex(&bytes)).expect("decodes");
        assert_eq!(decoded, bytes);
    }
}
