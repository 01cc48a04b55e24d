//! Property tests for protocol decoding
//!
//! Decoders face untrusted input from the server and local storage. They must
//! return typed errors, never panic, and accept everything the encoders emit.

use proptest::prelude::*;
use veilchat_proto::{HistoryPage, MessageEnvelope, PrivateKeyEnvelope, SendRejection};

#[test]
fn prop_key_envelope_parse_never_panics() {
    proptest!(|(text in ".{0,200}")| {
        let _ = PrivateKeyEnvelope::parse(&text);
    });
}

#[test]
fn prop_key_envelope_encoding_parses() {
    proptest!(|(
        salt in prop::collection::vec(any::<u8>(), 1..32),
        iv in prop::collection::vec(any::<u8>(), 1..32),
        ciphertext in prop::collection::vec(any::<u8>(), 1..512),
    )| {
        let envelope = PrivateKeyEnvelope { salt, iv, ciphertext };
        let parsed = PrivateKeyEnvelope::parse(&envelope.encode()).unwrap();
        prop_assert_eq!(parsed, envelope);
    });
}

#[test]
fn prop_json_decoders_never_panic() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..256))| {
        let text = String::from_utf8_lossy(&bytes);
        let _ = MessageEnvelope::from_json(&text);
        let _ = HistoryPage::from_json(&text);
        let _ = SendRejection::from_json(&text);
    });
}
