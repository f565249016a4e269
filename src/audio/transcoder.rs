//! # Binary Transcoder
//!
//! Converts raw bytes to and from the text form carried in wire messages
//! (standard base64 alphabet with canonical `=` padding).

use crate::error::DecodeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes as padded standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode padded standard base64 back into bytes.
///
/// ## Errors:
/// Returns `DecodeError::Encoding` for characters outside the alphabet,
/// missing or excess padding, or a truncated final quantum.
pub fn decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_bytes() {
        let cases: [&[u8]; 4] = [&[], &[0x00], &[0xFF, 0xFF], &[0, 1, 2, 250, 255]];
        for bytes in cases {
            assert_eq!(decode(&encode(bytes)).unwrap(), bytes);
        }

        let every_byte: Vec<u8> = (0..=255u8).collect();
        assert_eq!(decode(&encode(&every_byte)).unwrap(), every_byte);
    }

    #[test]
    fn test_known_encoding() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(&[0x00, 0xFF]), "AP8=");
        assert_eq!(decode("QQ==").unwrap(), vec![0x41]);
    }

    #[test]
    fn test_rejects_wrong_alphabet() {
        assert!(matches!(decode("@@@@"), Err(DecodeError::Encoding(_))));
        // URL-safe characters are not part of the standard alphabet
        assert!(decode("-_-_").is_err());
    }

    #[test]
    fn test_rejects_invalid_padding() {
        assert!(decode("QQ").is_err());
        assert!(decode("QQ=").is_err());
        assert!(decode("QQ===").is_err());
    }
}
