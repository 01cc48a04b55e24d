//! Fuzz target for PrivateKeyEnvelope::parse
//!
//! Arbitrary strings must either parse or return an error. Anything that
//! parses re-encodes to an envelope that parses to the same bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilchat_proto::PrivateKeyEnvelope;

fuzz_target!(|text: &str| {
    let Ok(envelope) = PrivateKeyEnvelope::parse(text) else {
        return;
    };

    let reparsed = PrivateKeyEnvelope::parse(&envelope.encode());
    assert_eq!(reparsed.ok(), Some(envelope), "re-encoded envelope must parse identically");
});
