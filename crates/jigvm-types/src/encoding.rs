//! Encoding utilities for hex and base64.
//!
//! Shared decoding helpers used by the identifier types and by JSON-facing
//! views of outputs and ABIs.

use anyhow::{anyhow, Result};

// =============================================================================
// Hex Parsing
// =============================================================================

/// Parse a hex string to raw bytes.
///
/// # Arguments
/// * `hex_str` - Hex string (with or without 0x prefix)
/// * `context` - Description for error messages (e.g., "package id", "pointer")
pub fn parse_hex_bytes(hex_str: &str, context: &str) -> Result<Vec<u8>> {
    let hex_str = strip_hex_prefix(hex_str);
    hex::decode(hex_str).map_err(|e| anyhow!("Invalid {} hex '{}': {}", context, hex_str, e))
}

/// Parse a hex string that must decode to exactly `N` bytes.
///
/// # Examples
///
/// ```
/// use jigvm_types::encoding::parse_hex_array;
///
/// let bytes: [u8; 2] = parse_hex_array("0xbeef", "test").unwrap();
/// assert_eq!(bytes, [0xbe, 0xef]);
/// assert!(parse_hex_array::<4>("beef", "test").is_err());
/// ```
pub fn parse_hex_array<const N: usize>(hex_str: &str, context: &str) -> Result<[u8; N]> {
    let bytes = parse_hex_bytes(hex_str, context)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("Invalid {}: expected {} bytes, got {}", context, N, len))
}

/// Parse a 32-byte hash in hex form.
pub fn parse_hex32(hex_str: &str, context: &str) -> Result<[u8; 32]> {
    parse_hex_array::<32>(hex_str, context)
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

// =============================================================================
// Base64 Encoding/Decoding
// =============================================================================

/// Encode bytes to base64 string.
pub fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 string to bytes with context-aware error message.
///
/// # Arguments
/// * `b64` - Base64 encoded string
/// * `context` - Description for error messages (e.g., "state bytes")
pub fn base64_decode(b64: &str, context: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| anyhow!("Failed to decode {} from base64: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes_prefix_optional() {
        assert_eq!(parse_hex_bytes("0x0a0b", "test").unwrap(), vec![10, 11]);
        assert_eq!(parse_hex_bytes("0A0B", "test").unwrap(), vec![10, 11]);

        let err = parse_hex_bytes("zz", "package id").unwrap_err();
        assert!(err.to_string().contains("Invalid package id"));
    }

    #[test]
    fn test_parse_hex32_length_checked() {
        let hex = "11".repeat(32);
        assert_eq!(parse_hex32(&hex, "hash").unwrap(), [0x11; 32]);

        let err = parse_hex32("1111", "hash").unwrap_err();
        assert!(err.to_string().contains("expected 32 bytes, got 2"));
    }

    #[test]
    fn test_base64_roundtrip() {
        let original = b"jig state";
        let encoded = base64_encode(original);
        let decoded = base64_decode(&encoded, "test").unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_base64_decode_error() {
        let result = base64_decode("not-valid-base64!!!", "state bytes");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("state bytes"));
    }
}
