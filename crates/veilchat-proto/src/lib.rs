//! Veilchat Protocol Records
//!
//! JSON records exchanged with the key directory, the history service and the
//! realtime bus, plus the string format of the PIN-encrypted private key.
//!
//! Binary fields (ciphertext, nonces, wrapped keys, SPKI public keys) are
//! carried as standard base64 strings. The records are transport-agnostic:
//! the core only ever sees them as opaque JSON text delivered at least once.
//!
//! # Field Naming
//!
//! JSON uses camelCase (`localId`, `wrappedKeySender`, `nextCursor`). The
//! legacy spellings `wrappedKeyForSender` / `wrappedKeyForRecipient` are
//! accepted on input.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod history;
pub mod key_envelope;
pub mod topics;

pub use envelope::{KeyMaterial, MessageEnvelope, MessageType, Role, SendRejection};
pub use errors::{ProtocolError, Result};
pub use history::{Cursor, HistoryPage};
pub use key_envelope::PrivateKeyEnvelope;

/// A user's unique login name, used as the conversation identity.
pub type Username = String;
