use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Decode a base64 payload, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>> {
    let encoded = match payload.split_once(",") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };

    STANDARD
        .decode(encoded.trim())
        .context("Failed to decode base64 payload")
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Wrap PNG bytes as a data URL suitable for direct client rendering.
pub fn png_data_url(data: &[u8]) -> String {
    format!("data:image/png;base64,{}", encode_base64(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_base64() {
        let decoded = decode_base64_payload("aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn test_decode_data_url() {
        let decoded = decode_base64_payload("data:audio/wav;base64,aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(decode_base64_payload("not@@base64!!").is_err());
    }

    #[test]
    fn test_round_trip() {
        let bytes = vec![0u8, 1, 2, 254, 255];
        let encoded = encode_base64(&bytes);
        assert_eq!(decode_base64_payload(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_png_data_url_prefix() {
        let url = png_data_url(b"\x89PNG");
        assert!(url.starts_with("data:image/png;base64,"));
    }
}
