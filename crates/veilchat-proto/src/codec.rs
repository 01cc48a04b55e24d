//! Base64 helpers shared by the record types.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{ProtocolError, Result};

/// Encode bytes as standard padded base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 field, naming the field in the error.
pub fn decode(field: &'static str, text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| ProtocolError::InvalidField { field, reason: e.to_string() })
}

/// Decode an optional base64 field that must be present and non-empty.
pub fn decode_required(field: &'static str, text: Option<&str>) -> Result<Vec<u8>> {
    match text {
        Some(text) if !text.is_empty() => decode(field, text),
        _ => Err(ProtocolError::MissingField { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_names_the_field() {
        let err = decode("iv", "%%%").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "iv", .. }));
    }

    #[test]
    fn empty_required_field_is_missing() {
        assert_eq!(decode_required("content", Some("")), Err(ProtocolError::MissingField {
            field: "content"
        }));
        assert_eq!(decode_required("content", None), Err(ProtocolError::MissingField {
            field: "content"
        }));
        assert_eq!(decode_required("content", Some(&encode(b"x"))).unwrap(), b"x");
    }
}
