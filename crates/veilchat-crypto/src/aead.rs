//! Authenticated symmetric encryption using `XChaCha20-Poly1305`
//!
//! Nonces are 24 random bytes drawn from the caller's RNG. The 192-bit nonce
//! space makes random nonces safe for the lifetime of a session key.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand_core::CryptoRngCore;

use crate::{CryptoError, NONCE_SIZE, SymmetricKey, TAG_SIZE};

/// Ciphertext together with the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey, rng: &mut impl CryptoRngCore) -> SealedPayload {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, key, nonce)
}

/// Encrypt `plaintext` under `key` with a caller-chosen nonce.
///
/// # Security
///
/// Reusing a nonce under the same key breaks confidentiality. Production code
/// goes through [`encrypt`]; this exists for known-answer tests and fuzzing.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &SymmetricKey,
    nonce: [u8; NONCE_SIZE],
) -> SealedPayload {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedPayload { nonce, ciphertext }
}

/// Decrypt and authenticate `ciphertext`.
///
/// The nonce is taken as a slice because it usually arrives base64-decoded
/// from the wire with no length guarantee.
///
/// # Errors
///
/// - `Decrypt`: nonce has the wrong length, or the tag does not verify
///   (tampered ciphertext, wrong key, wrong nonce)
pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Decrypt {
            reason: format!("nonce must be {NONCE_SIZE} bytes, got {}", nonce.len()),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Decrypt {
        reason: "authentication failed".to_string(),
    })
}
