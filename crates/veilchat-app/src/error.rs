//! Messenger errors.

use thiserror::Error;
use veilchat_client::ClientError;
use veilchat_core::{ServiceError, VaultError};
use veilchat_proto::ProtocolError;

/// Errors surfaced by [`crate::Messenger`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessengerError {
    /// Vault operation failed
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Operation needs an unlocked vault
    #[error("vault is locked")]
    Locked,

    /// The directory has no usable public key for the peer
    #[error("no public key available for {peer}")]
    PeerKeyUnavailable {
        /// The peer
        peer: String,
    },

    /// A collaborator failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Wire data could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Conversation-level failure
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl MessengerError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Vault(e) => e.is_retryable(),
            Self::Service(e) => e.is_transient(),
            Self::Locked | Self::PeerKeyUnavailable { .. } | Self::Protocol(_) | Self::Client(_) => {
                false
            },
        }
    }
}
