//! Client error types.

use thiserror::Error;
use veilchat_crypto::CryptoError;

/// Errors from a conversation crypto session.
///
/// Receive-side errors describe one message only. The conversation stores them
/// as an undecryptable entry and keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Envelope lacks content, iv, or the role's wrapped key
    #[error("invalid message: missing key material ({reason})")]
    MissingKeyMaterial {
        /// Which field was missing or undecodable
        reason: String,
    },

    /// The role's wrapped session key could not be opened
    #[error("cannot unwrap session key: {0}")]
    Unwrap(CryptoError),

    /// Decryption failed even with a freshly unwrapped key
    #[error("cannot decrypt message: {0}")]
    Decrypt(CryptoError),

    /// Wrapping the session key for a participant failed
    #[error("cannot wrap session key: {0}")]
    Wrap(CryptoError),

    /// Decrypted bytes are not UTF-8 text
    #[error("decrypted message is not valid text")]
    InvalidPlaintext,
}

/// Errors from the conversation router.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No open conversation with this peer
    #[error("no open conversation with {peer}")]
    ConversationNotOpen {
        /// The peer
        peer: String,
    },

    /// Correlation id already used in this conversation
    #[error("duplicate local id {local_id}")]
    DuplicateLocalId {
        /// The offending id
        local_id: String,
    },

    /// Session failure while preparing a send
    #[error(transparent)]
    Session(#[from] SessionError),
}
