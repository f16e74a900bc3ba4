// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of string exceeds 64K.
    TooManyData,

    /// Contains null character or other disallowed code points.
    InvalidChar,

    /// Not a well formed UTF-8 byte sequence.
    InvalidUtf8,
}

/// Text fields in MQTT packets are length-prefixed, so a string may hold
/// at most `u16::MAX` bytes.
///
/// # Errors
///
/// Returns error if `s` is too long or contains the null character.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooManyData);
    }
    // A UTF-8 encoded string MUST NOT include an encoding of the null
    // character U+0000 [MQTT-1.5.3-2].
    if s.chars().any(|c| c == '\u{0000}') {
        return Err(StringError::InvalidChar);
    }
    Ok(())
}

/// Convert a raw byte slice into an owned UTF-8 string.
///
/// # Errors
///
/// Returns error if `bytes` is not well formed UTF-8 or fails
/// [`validate_utf8_string`].
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = std::str::from_utf8(bytes).map_err(|_err| StringError::InvalidUtf8)?;
    validate_utf8_string(s)?;
    Ok(s.to_string())
}

/// Generate a random alphanumeric string with `len` characters.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a random client id.
///
/// The result stays within the 23 bytes recommended for client identifiers.
#[must_use]
pub fn random_client_id() -> String {
    format!("tern-{}", random_string(16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("tern/client").is_ok());
        assert_eq!(
            validate_utf8_string("a\u{0000}b"),
            Err(StringError::InvalidChar)
        );
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        assert_eq!(validate_utf8_string(&long), Err(StringError::TooManyData));
    }

    #[test]
    fn test_random_client_id() {
        let id = random_client_id();
        assert!(id.starts_with("tern-"));
        assert!(id.len() <= 23);
    }
}
