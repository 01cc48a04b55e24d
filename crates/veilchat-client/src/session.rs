//! Conversation crypto session.
//!
//! One session per peer. Owns a single symmetric session key, created on the
//! first send or the first successful unwrap on receive.
//!
//! # Decrypt Order
//!
//! ```text
//! cached key ──ok──> plaintext
//!     │ miss / auth failure
//!     ▼
//! unwrap role key with private key ──> cache ──> decrypt once ──> plaintext
//!     │ failure                                      │ failure
//!     ▼                                              ▼
//!  undecryptable                                undecryptable
//! ```
//!
//! The cached path avoids an RSA decrypt per message. The fallback tolerates a
//! peer (or the local user after a key reset) switching to a new session key.

use rand_core::CryptoRngCore;
use veilchat_crypto::{Keypair, PublicKey, SymmetricKey, decrypt, encrypt, unwrap_key, wrap_key};
use veilchat_proto::{MessageEnvelope, codec};

use crate::SessionError;

/// Encrypted fields of an outgoing envelope, base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFields {
    /// Ciphertext
    pub content: String,
    /// AEAD nonce
    pub iv: String,
    /// Session key wrapped under the sender's own public key
    pub wrapped_key_sender: String,
    /// Session key wrapped under the recipient's public key
    pub wrapped_key_recipient: String,
}

/// Which key opened a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPath {
    /// The cached session key
    Cached,
    /// A key unwrapped from the envelope (now cached)
    Unwrapped,
}

/// A successfully decrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    /// Message text
    pub plaintext: String,
    /// Key that opened it
    pub path: KeyPath,
}

/// Per-peer crypto state.
pub struct ConversationSession {
    local_user: String,
    peer: String,
    peer_key: PublicKey,
    session_key: Option<SymmetricKey>,
}

impl ConversationSession {
    /// New session with no session key.
    pub fn new(local_user: impl Into<String>, peer: impl Into<String>, peer_key: PublicKey) -> Self {
        Self { local_user: local_user.into(), peer: peer.into(), peer_key, session_key: None }
    }

    /// The remote participant.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether a session key is cached.
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Drop the cached session key. The next send creates a new one.
    pub fn forget_key(&mut self) {
        self.session_key = None;
    }

    /// Encrypt `plaintext` for the peer.
    ///
    /// The session key is wrapped twice: under the peer's key for delivery,
    /// and under the sender's own key so sent messages stay readable from
    /// history.
    pub fn encrypt_for_send(
        &mut self,
        plaintext: &str,
        keypair: &Keypair,
        rng: &mut impl CryptoRngCore,
    ) -> Result<OutgoingFields, SessionError> {
        let key = self.session_key.get_or_insert_with(|| SymmetricKey::generate(&mut *rng));

        let sealed = encrypt(plaintext.as_bytes(), key, rng);
        let for_recipient = wrap_key(key, &self.peer_key, rng).map_err(SessionError::Wrap)?;
        let for_sender = wrap_key(key, &keypair.public, rng).map_err(SessionError::Wrap)?;

        Ok(OutgoingFields {
            content: codec::encode(&sealed.ciphertext),
            iv: codec::encode(&sealed.nonce),
            wrapped_key_sender: codec::encode(&for_sender),
            wrapped_key_recipient: codec::encode(&for_recipient),
        })
    }

    /// Decrypt a received or fetched envelope.
    ///
    /// The wrapped-key field is chosen by comparing `envelope.sender` with the
    /// local user. Failures describe this message only.
    pub fn decrypt_for_receive(
        &mut self,
        envelope: &MessageEnvelope,
        keypair: &Keypair,
    ) -> Result<Decrypted, SessionError> {
        let role = envelope.role_of(&self.local_user);
        let material = envelope
            .key_material(role)
            .map_err(|e| SessionError::MissingKeyMaterial { reason: e.to_string() })?;

        if let Some(key) = &self.session_key {
            match decrypt(&material.ciphertext, &material.nonce, key) {
                Ok(plaintext) => {
                    return Ok(Decrypted { plaintext: into_text(plaintext)?, path: KeyPath::Cached });
                },
                Err(_) => {
                    tracing::debug!(peer = %self.peer, "cached session key rejected message, unwrapping");
                },
            }
        }

        let key = unwrap_key(&material.wrapped_key, &keypair.private).map_err(SessionError::Unwrap)?;
        let key = self.session_key.insert(key);

        let plaintext =
            decrypt(&material.ciphertext, &material.nonce, key).map_err(SessionError::Decrypt)?;
        Ok(Decrypted { plaintext: into_text(plaintext)?, path: KeyPath::Unwrapped })
    }
}

fn into_text(bytes: Vec<u8>) -> Result<String, SessionError> {
    String::from_utf8(bytes).map_err(|_| SessionError::InvalidPlaintext)
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("local_user", &self.local_user)
            .field("peer", &self.peer)
            .field("has_session_key", &self.has_session_key())
            .finish_non_exhaustive()
    }
}
