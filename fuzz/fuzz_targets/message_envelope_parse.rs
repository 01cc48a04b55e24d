//! Fuzz target for realtime payload decoding
//!
//! Bus frames come from the network. Decoding message envelopes and send
//! rejections, and extracting key material from them, must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilchat_proto::{MessageEnvelope, SendRejection};

fuzz_target!(|text: &str| {
    if let Ok(envelope) = MessageEnvelope::from_json(text) {
        let role = envelope.role_of("alice");
        let _ = envelope.peer_of("alice");
        let _ = envelope.key_material(role);
        let _ = envelope.to_json();
    }

    let _ = SendRejection::from_json(text);
});
