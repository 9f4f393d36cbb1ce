// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! String validation helpers shared by the packet types.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    InvalidLength,
    InvalidChar,
}

/// Maximum length of a length-prefixed string field.
pub const STRING_MAX_LEN: usize = u16::MAX as usize;

/// Validate a UTF-8 string field.
///
/// The character data MUST NOT include U+0000 [MQTT-1.5.4-2] and SHOULD NOT
/// include control characters or non-characters; we reject both groups as
/// malformed.
///
/// # Errors
///
/// Returns error if `s` is too long or contains a disallowed code point.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > STRING_MAX_LEN {
        return Err(StringError::InvalidLength);
    }
    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::InvalidChar);
        }
        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }
        let cp = u32::from(c);
        // Non-characters: U+FDD0..U+FDEF and the last two code points of
        // every plane.
        if (0xfdd0..=0xfdef).contains(&cp) || (cp & 0xfffe) == 0xfffe {
            return Err(StringError::InvalidChar);
        }
    }
    Ok(())
}

/// Convert raw bytes into a validated UTF-8 string.
///
/// # Errors
///
/// Returns error if bytes are not well-formed UTF-8 or contain disallowed
/// code points.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_e| StringError::InvalidChar)?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Validate a client identifier supplied in a CONNECT packet.
///
/// An empty id is legal on the wire; the server decides whether to assign
/// one. Non-empty ids are limited to UTF-8 without disallowed code points.
///
/// # Errors
///
/// Returns error if `client_id` is invalid.
pub fn validate_client_id(client_id: &str) -> Result<(), StringError> {
    validate_utf8_string(client_id)
}

/// Generate a random client id with the `corvid-` prefix.
#[must_use]
pub fn random_client_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("corvid-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("sensors/kitchen").is_ok());
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("with\u{0000}nul").is_err());
        assert!(validate_utf8_string("bell\u{0007}").is_err());
        assert!(validate_utf8_string("nonchar\u{ffff}").is_err());
    }

    #[test]
    fn test_random_client_id() {
        let id = random_client_id();
        assert!(id.starts_with("corvid-"));
        assert_ne!(id, random_client_id());
    }
}
