//! Symmetric keys and PIN-based key derivation using PBKDF2-HMAC-SHA256.

use pbkdf2::pbkdf2_hmac;
use rand_core::CryptoRngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{CryptoError, PBKDF2_ITERATIONS, SALT_SIZE, SYMMETRIC_KEY_SIZE};

/// A 256-bit symmetric key.
///
/// Used both as the PIN-derived wrapping key and as a conversation session
/// key. Zeroized on drop so key material does not linger in memory.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Import key material of unknown length.
    ///
    /// Returns `None` unless the slice is exactly [`SYMMETRIC_KEY_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; SYMMETRIC_KEY_SIZE] = slice.try_into().ok()?;
        Some(Self { bytes })
    }

    /// Generate a fresh random key.
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Generate a random salt for PIN derivation.
pub fn generate_salt(rng: &mut impl CryptoRngCore) -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rng.fill_bytes(&mut salt);
    salt
}

/// Derive a wrapping key from a PIN and salt.
///
/// Deterministic: identical `(pin, salt)` always yields byte-identical keys.
/// Deliberately slow ([`PBKDF2_ITERATIONS`] rounds).
///
/// # Errors
///
/// - `KeyDerivation`: salt is not exactly [`SALT_SIZE`] bytes
pub fn derive_key(pin: &str, salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::KeyDerivation {
            reason: format!("salt must be {SALT_SIZE} bytes, got {}", salt.len()),
        });
    }

    let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(pin.as_bytes(), salt, PBKDF2_ITERATIONS, &mut bytes);

    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}
