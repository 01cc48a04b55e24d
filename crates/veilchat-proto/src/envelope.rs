//! Message envelopes as they travel over the realtime bus and history API.

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result, codec};

/// Kind of message carried by an envelope.
///
/// Only [`MessageType::PrivateChat`] is end-to-end encrypted. The other kinds
/// belong to the public room and are ignored by the private-message router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// One-to-one encrypted message
    #[default]
    PrivateChat,
    /// Public room message
    Chat,
    /// Presence: user joined
    Join,
    /// Presence: user left
    Leave,
    /// Any kind this client does not know
    #[serde(other)]
    Unknown,
}

/// Which side of a message the local user is on.
///
/// Decides which wrapped copy of the session key the local private key can
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Local user sent the message
    Sender,
    /// Local user received the message
    Recipient,
}

/// Wire/storage record of one private message.
///
/// `content` is base64 ciphertext, `iv` the base64 AEAD nonce. The session
/// key is wrapped twice, once for each participant, so either side can read
/// the message with only their own private key.
///
/// # Invariants
///
/// - `id` is assigned by the server and absent on outgoing requests
/// - `local_id` is set only by the sending client and echoed back unchanged
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Server-assigned identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Client correlation id, present until the entry is reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,

    /// Sending user
    #[serde(default)]
    pub sender: String,

    /// Receiving user
    #[serde(default)]
    pub recipient: String,

    /// Base64 ciphertext
    #[serde(default)]
    pub content: String,

    /// Base64 AEAD nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,

    /// Base64 session key wrapped under the sender's public key
    #[serde(default, alias = "wrappedKeyForSender", skip_serializing_if = "Option::is_none")]
    pub wrapped_key_sender: Option<String>,

    /// Base64 session key wrapped under the recipient's public key
    #[serde(default, alias = "wrappedKeyForRecipient", skip_serializing_if = "Option::is_none")]
    pub wrapped_key_recipient: Option<String>,

    /// Message kind
    #[serde(default)]
    pub message_type: MessageType,

    /// Unix milliseconds (UTC)
    #[serde(default)]
    pub timestamp: u64,

    /// Display color chosen by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Decoded binary fields needed to decrypt an envelope for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Ciphertext including tag
    pub ciphertext: Vec<u8>,
    /// AEAD nonce
    pub nonce: Vec<u8>,
    /// Session key wrapped for the role
    pub wrapped_key: Vec<u8>,
}

impl MessageEnvelope {
    /// Parse an envelope from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }

    /// The local user's role for this envelope.
    pub fn role_of(&self, me: &str) -> Role {
        if self.sender == me { Role::Sender } else { Role::Recipient }
    }

    /// The other participant from `me`'s point of view.
    ///
    /// Self-echoes of sent messages route to the recipient's conversation.
    pub fn peer_of(&self, me: &str) -> &str {
        match self.role_of(me) {
            Role::Sender => &self.recipient,
            Role::Recipient => &self.sender,
        }
    }

    /// The wrapped session key readable by `role`, if present.
    pub fn wrapped_key_for(&self, role: Role) -> Option<&str> {
        match role {
            Role::Sender => self.wrapped_key_sender.as_deref(),
            Role::Recipient => self.wrapped_key_recipient.as_deref(),
        }
    }

    /// Decode everything needed to decrypt this envelope as `role`.
    ///
    /// # Errors
    ///
    /// - `MissingField`: content, iv or the role's wrapped key is absent
    /// - `InvalidField`: one of them is not valid base64
    pub fn key_material(&self, role: Role) -> Result<KeyMaterial> {
        let wrapped_field = match role {
            Role::Sender => "wrappedKeySender",
            Role::Recipient => "wrappedKeyRecipient",
        };

        Ok(KeyMaterial {
            ciphertext: codec::decode_required("content", Some(&self.content))?,
            nonce: codec::decode_required("iv", self.iv.as_deref())?,
            wrapped_key: codec::decode_required(wrapped_field, self.wrapped_key_for(role))?,
        })
    }
}

/// A send the server refused, delivered on the sender's error queue.
///
/// Carries the original request so the client can find the optimistic entry
/// by its `localId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRejection {
    /// Human-readable reason from the server
    #[serde(default)]
    pub message: Option<String>,

    /// The rejected request
    #[serde(rename = "data")]
    pub request: MessageEnvelope,
}

impl SendRejection {
    /// Parse a rejection frame from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MessageEnvelope {
        MessageEnvelope {
            id: Some("m1".into()),
            local_id: Some("local-1".into()),
            sender: "alice".into(),
            recipient: "bob".into(),
            content: codec::encode(b"ciphertext"),
            iv: Some(codec::encode(&[1u8; 24])),
            wrapped_key_sender: Some(codec::encode(b"for-alice")),
            wrapped_key_recipient: Some(codec::encode(b"for-bob")),
            message_type: MessageType::PrivateChat,
            timestamp: 1_700_000_000_000,
            color: None,
        }
    }

    #[test]
    fn json_uses_camel_case_wire_names() {
        let json = sample().to_json().unwrap();

        assert!(json.contains("\"localId\":\"local-1\""));
        assert!(json.contains("\"wrappedKeySender\""));
        assert!(json.contains("\"wrappedKeyRecipient\""));
        assert!(json.contains("\"messageType\":\"PRIVATE_CHAT\""));
        assert!(!json.contains("color"), "absent optionals are omitted");
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let envelope = sample();
        let parsed = MessageEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn legacy_wrapped_key_names_are_accepted() {
        let json = r#"{"id":"m9","sender":"a","recipient":"b","content":"","wrappedKeyForSender":"AA==","wrappedKeyForRecipient":"AQ=="}"#;
        let parsed = MessageEnvelope::from_json(json).unwrap();

        assert_eq!(parsed.wrapped_key_sender.as_deref(), Some("AA=="));
        assert_eq!(parsed.wrapped_key_recipient.as_deref(), Some("AQ=="));
    }

    #[test]
    fn unknown_fields_and_types_are_tolerated() {
        let json = r#"{"id":"x","sender":"a","recipient":"b","messageType":"TYPING","isEdited":false}"#;
        let parsed = MessageEnvelope::from_json(json).unwrap();
        assert_eq!(parsed.message_type, MessageType::Unknown);
    }

    #[test]
    fn garbage_json_is_an_error() {
        assert!(matches!(MessageEnvelope::from_json("{not json"), Err(ProtocolError::InvalidJson { .. })));
    }

    #[test]
    fn role_and_peer_follow_the_sender() {
        let envelope = sample();

        assert_eq!(envelope.role_of("alice"), Role::Sender);
        assert_eq!(envelope.peer_of("alice"), "bob");
        assert_eq!(envelope.role_of("bob"), Role::Recipient);
        assert_eq!(envelope.peer_of("bob"), "alice");
    }

    #[test]
    fn key_material_selects_role_field() {
        let envelope = sample();

        assert_eq!(envelope.key_material(Role::Sender).unwrap().wrapped_key, b"for-alice");
        assert_eq!(envelope.key_material(Role::Recipient).unwrap().wrapped_key, b"for-bob");
    }

    #[test]
    fn key_material_reports_missing_fields() {
        let mut envelope = sample();
        envelope.wrapped_key_recipient = None;
        assert_eq!(
            envelope.key_material(Role::Recipient),
            Err(ProtocolError::MissingField { field: "wrappedKeyRecipient" })
        );

        let mut envelope = sample();
        envelope.iv = None;
        assert_eq!(envelope.key_material(Role::Sender), Err(ProtocolError::MissingField { field: "iv" }));

        let mut envelope = sample();
        envelope.content.clear();
        assert_eq!(
            envelope.key_material(Role::Sender),
            Err(ProtocolError::MissingField { field: "content" })
        );
    }

    #[test]
    fn rejection_frame_carries_request() {
        let json = format!(
            r#"{{"type":"ERROR","message":"recipient does not exist","data":{}}}"#,
            sample().to_json().unwrap()
        );
        let rejection = SendRejection::from_json(&json).unwrap();

        assert_eq!(rejection.message.as_deref(), Some("recipient does not exist"));
        assert_eq!(rejection.request.local_id.as_deref(), Some("local-1"));
    }
}
