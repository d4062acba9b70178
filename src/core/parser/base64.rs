//! Base64 decoding for link payloads.
//!
//! Links in the wild are encoded with every base64 variant imaginable:
//! standard or URL-safe alphabet, with or without padding, sometimes with
//! stray whitespace from copy-paste. Decoding tries them all.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// Decodes a base64 payload, accepting standard and URL-safe alphabets,
/// padded or raw. Whitespace is stripped first. Returns `None` when no
/// variant decodes.
pub fn decode_any(content: &str) -> Option<Vec<u8>> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();

    if let Ok(decoded) = STANDARD.decode(&cleaned) {
        return Some(decoded);
    }
    if let Ok(decoded) = URL_SAFE.decode(&cleaned) {
        return Some(decoded);
    }
    if let Ok(decoded) = STANDARD_NO_PAD.decode(&cleaned) {
        return Some(decoded);
    }
    if let Ok(decoded) = URL_SAFE_NO_PAD.decode(&cleaned) {
        return Some(decoded);
    }

    // Last resort: repair missing padding and retry both alphabets.
    let padded = add_padding(&cleaned);
    if let Ok(decoded) = STANDARD.decode(&padded) {
        return Some(decoded);
    }
    URL_SAFE.decode(&padded).ok()
}

/// Same as [`decode_any`] but additionally requires valid UTF-8.
pub fn decode_any_utf8(content: &str) -> Option<String> {
    decode_any(content).and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Encodes with the standard padded alphabet, the canonical form used when
/// links are rewritten.
pub fn encode_std(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn add_padding(s: &str) -> String {
    let mut result = s.to_string();
    while result.len() % 4 != 0 {
        result.push('=');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard() {
        assert_eq!(decode_any("aGVsbG8gd29ybGQ=").unwrap(), b"hello world");
    }

    #[test]
    fn decodes_without_padding() {
        assert_eq!(decode_any("aGVsbG8gd29ybGQ").unwrap(), b"hello world");
    }

    #[test]
    fn decodes_url_safe() {
        // '-' and '_' only appear in the URL-safe alphabet
        assert!(decode_any("aGVsbG8td29ybGQ_").is_some());
    }

    #[test]
    fn strips_whitespace() {
        assert_eq!(decode_any("aGVs\nbG8g\nd29y\nbGQ=").unwrap(), b"hello world");
        assert_eq!(decode_any("  aGVsbG8gd29ybGQ=  ").unwrap(), b"hello world");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_any("not valid base64!!!").is_none());
    }

    #[test]
    fn empty_is_empty() {
        assert_eq!(decode_any("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn roundtrip_std() {
        let original = "ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@example.com:8388#test";
        let encoded = encode_std(original.as_bytes());
        assert_eq!(decode_any_utf8(&encoded).unwrap(), original);
    }
}
