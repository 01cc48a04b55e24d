//! Error types for cryptographic primitives.

use thiserror::Error;

/// Errors produced by the crypto primitives.
///
/// `Unwrap` and `Decrypt` are expected in normal operation: they signal a
/// session key wrapped under a stale keypair, or a message that cannot be read
/// with the key at hand. Callers apply fallback or mark the single message as
/// undecryptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation rejected its inputs (malformed salt length).
    #[error("key derivation failed: {reason}")]
    KeyDerivation {
        /// Description of the rejected input
        reason: String,
    },

    /// Asymmetric wrap of a symmetric key failed.
    #[error("key wrap failed: {reason}")]
    Wrap {
        /// Description of the failure
        reason: String,
    },

    /// Asymmetric unwrap failed (corrupt blob or wrong private key).
    #[error("key unwrap failed: {reason}")]
    Unwrap {
        /// Description of the failure
        reason: String,
    },

    /// Authenticated decryption failed (tamper, wrong key, or wrong nonce).
    #[error("decryption failed: {reason}")]
    Decrypt {
        /// Description of the failure
        reason: String,
    },

    /// A serialized key could not be imported.
    #[error("invalid key encoding: {reason}")]
    KeyEncoding {
        /// Description of the failure
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if the error is part of the expected per-message failure
    /// path rather than a programming or configuration error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unwrap { .. } | Self::Decrypt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_and_decrypt_are_recoverable() {
        assert!(CryptoError::Unwrap { reason: "stale key".into() }.is_recoverable());
        assert!(CryptoError::Decrypt { reason: "tag".into() }.is_recoverable());
    }

    #[test]
    fn derivation_and_encoding_are_not_recoverable() {
        assert!(!CryptoError::KeyDerivation { reason: "salt".into() }.is_recoverable());
        assert!(!CryptoError::KeyEncoding { reason: "der".into() }.is_recoverable());
        assert!(!CryptoError::Wrap { reason: "too long".into() }.is_recoverable());
    }
}
