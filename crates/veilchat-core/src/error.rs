//! Error types for collaborators and the key vault.

use std::time::Duration;

use thiserror::Error;
use veilchat_crypto::CryptoError;

/// Failures reported by the external collaborators (directory, history, bus).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Service unreachable or returned a server error
    #[error("service unavailable: {reason}")]
    Unavailable {
        /// Transport or server message
        reason: String,
    },

    /// No response within the caller's deadline
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Service refused the request
    #[error("request rejected: {reason}")]
    Rejected {
        /// Reason given by the service
        reason: String,
    },
}

impl ServiceError {
    /// Returns true if the request is safe and sensible to retry.
    ///
    /// All collaborator reads are idempotent, so only the cause matters.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors raised by the key vault.
///
/// Unlock failures never say which check failed: a wrong PIN and a tampered
/// envelope both surface as [`VaultError::InvalidPinOrCorruptKey`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The PIN did not open the stored envelope
    #[error("incorrect PIN or corrupted key")]
    InvalidPinOrCorruptKey,

    /// No private-key envelope has been stored yet
    #[error("no stored key; run first-time setup")]
    NoStoredKey,

    /// The stored envelope is malformed and can only be replaced by a reset
    #[error("stored key is corrupt ({reason}); a key reset is required")]
    EnvelopeCorrupt {
        /// What was wrong with the envelope
        reason: String,
    },

    /// PIN length outside the configured bounds
    #[error("PIN must be between {min} and {max} characters")]
    PinPolicy {
        /// Shortest accepted PIN
        min: usize,
        /// Longest accepted PIN
        max: usize,
    },

    /// First-time setup found an existing key; overwriting needs a confirmed
    /// reset
    #[error("a key already exists; resetting it requires confirmation")]
    ResetNotConfirmed,

    /// Key material could not be produced or serialized
    #[error("key material error: {0}")]
    Crypto(#[from] CryptoError),

    /// The key directory failed
    #[error("key directory error: {0}")]
    Service(#[from] ServiceError),
}

impl VaultError {
    /// Returns true if the user can retry the same operation.
    ///
    /// A wrong PIN or a flaky directory is retryable. A corrupt envelope is
    /// not; only a confirmed reset recovers from it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidPinOrCorruptKey | Self::PinPolicy { .. } => true,
            Self::Service(e) => e.is_transient(),
            Self::NoStoredKey
            | Self::EnvelopeCorrupt { .. }
            | Self::ResetNotConfirmed
            | Self::Crypto(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_timeout_are_transient() {
        assert!(ServiceError::Unavailable { reason: "503".into() }.is_transient());
        assert!(ServiceError::Timeout { elapsed: Duration::from_secs(10) }.is_transient());
        assert!(!ServiceError::Rejected { reason: "forbidden".into() }.is_transient());
    }

    #[test]
    fn corrupt_envelope_is_not_retryable() {
        assert!(!VaultError::EnvelopeCorrupt { reason: "2 segments".into() }.is_retryable());
        assert!(!VaultError::NoStoredKey.is_retryable());
        assert!(VaultError::InvalidPinOrCorruptKey.is_retryable());
        assert!(
            VaultError::Service(ServiceError::Unavailable { reason: "down".into() }).is_retryable()
        );
    }

    #[test]
    fn unlock_failure_message_is_generic() {
        let message = VaultError::InvalidPinOrCorruptKey.to_string();
        assert_eq!(message, "incorrect PIN or corrupted key");
    }
}
