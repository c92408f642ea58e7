//! Pool/session coinbase signature tag validation (spec.md §4.1, §4.7):
//! non-empty, length <= 20, every byte drawn from
//! `[A-Za-z0-9_\-.:!#/ ]`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature tag is empty")]
    Empty,
    #[error("signature tag exceeds 20 bytes (got {0})")]
    TooLong(usize),
    #[error("signature tag contains a disallowed byte at index {0}")]
    InvalidByte(usize),
}

fn is_allowed(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(byte, b'_' | b'-' | b'.' | b':' | b'!' | b'#' | b'/' | b' ')
}

/// Validates a pool or `mining.suggest_signature` coinbase tag.
pub fn validate_signature(tag: &str) -> Result<(), SignatureError> {
    if tag.is_empty() {
        return Err(SignatureError::Empty);
    }
    let bytes = tag.as_bytes();
    if bytes.len() > 20 {
        return Err(SignatureError::TooLong(bytes.len()));
    }
    for (i, &b) in bytes.iter().enumerate() {
        if !is_allowed(b) {
            return Err(SignatureError::InvalidByte(i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_20_bytes() {
        let tag = "a".repeat(20);
        assert!(validate_signature(&tag).is_ok());
    }

    #[test]
    fn rejects_21_bytes() {
        let tag = "a".repeat(21);
        assert_eq!(validate_signature(&tag), Err(SignatureError::TooLong(21)));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_signature(""), Err(SignatureError::Empty));
    }

    #[test]
    fn rejects_control_chars() {
        assert!(validate_signature("hello\nworld").is_err());
    }

    #[test]
    fn rejects_non_ascii() {
        assert!(validate_signature("café").is_err());
    }

    #[test]
    fn accepts_allowed_punctuation() {
        assert!(validate_signature("pool-tag_v1.0:#!/ ok").is_ok());
    }
}
