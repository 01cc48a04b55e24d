//! Protocol errors.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding wire or storage records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// JSON text did not match the expected record shape.
    #[error("invalid json: {reason}")]
    InvalidJson {
        /// Parser message
        reason: String,
    },

    /// A required field was absent or empty.
    #[error("missing field: {field}")]
    MissingField {
        /// Wire name of the field
        field: &'static str,
    },

    /// A field was present but not decodable.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Wire name of the field
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// The stored private-key envelope is not `salt.iv.ciphertext`.
    #[error("malformed private key envelope: {reason}")]
    MalformedKeyEnvelope {
        /// Description of the malformation
        reason: String,
    },
}
