//! Storage format of the PIN-encrypted private key.
//!
//! ```text
//! base64(salt) "." base64(iv) "." base64(ciphertext)
//! ```
//!
//! Exactly three segments. Anything else, including the older two-segment
//! form without a salt, is malformed and can only be fixed by a key reset.

use crate::{ProtocolError, Result, codec};

const SEPARATOR: char = '.';

/// A persisted private-key envelope.
///
/// Immutable once written; replaced wholesale by a key reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyEnvelope {
    /// KDF salt
    pub salt: Vec<u8>,
    /// AEAD nonce
    pub iv: Vec<u8>,
    /// Encrypted PKCS#8 private key
    pub ciphertext: Vec<u8>,
}

impl PrivateKeyEnvelope {
    /// Encode as the dot-delimited storage string.
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            codec::encode(&self.salt),
            codec::encode(&self.iv),
            codec::encode(&self.ciphertext)
        )
    }

    /// Parse the storage string.
    ///
    /// # Errors
    ///
    /// - `MalformedKeyEnvelope`: wrong segment count, empty segment, or bad
    ///   base64
    pub fn parse(text: &str) -> Result<Self> {
        let segments: Vec<&str> = text.trim().split(SEPARATOR).collect();
        let [salt, iv, ciphertext] = segments.as_slice() else {
            return Err(ProtocolError::MalformedKeyEnvelope {
                reason: format!("expected 3 segments, found {}", segments.len()),
            });
        };

        let decode = |name: &'static str, segment: &str| {
            if segment.is_empty() {
                return Err(ProtocolError::MalformedKeyEnvelope { reason: format!("{name} is empty") });
            }
            codec::decode(name, segment)
                .map_err(|e| ProtocolError::MalformedKeyEnvelope { reason: e.to_string() })
        };

        Ok(Self {
            salt: decode("salt", *salt)?,
            iv: decode("iv", *iv)?,
            ciphertext: decode("ciphertext", *ciphertext)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrivateKeyEnvelope {
        PrivateKeyEnvelope { salt: vec![1; 16], iv: vec![2; 24], ciphertext: vec![3; 48] }
    }

    #[test]
    fn encodes_three_segments() {
        let text = sample().encode();
        assert_eq!(text.split('.').count(), 3);
        assert_eq!(PrivateKeyEnvelope::parse(&text).unwrap(), sample());
    }

    #[test]
    fn legacy_two_segment_form_is_rejected() {
        let result = PrivateKeyEnvelope::parse("AAAA.BBBB");
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedKeyEnvelope { reason }) if reason.contains("found 2")
        ));
    }

    #[test]
    fn extra_segments_are_rejected() {
        let text = format!("{}.AAAA", sample().encode());
        assert!(PrivateKeyEnvelope::parse(&text).is_err());
    }

    #[test]
    fn empty_and_garbage_segments_are_rejected() {
        assert!(PrivateKeyEnvelope::parse("").is_err());
        assert!(PrivateKeyEnvelope::parse("..").is_err());
        assert!(PrivateKeyEnvelope::parse("AAAA.!!!!.AAAA").is_err());
    }
}
