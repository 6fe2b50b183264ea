//! Small helpers for input validation and opaque token handling.

use crate::error::{Error, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use uuid::Uuid;

/// Length of an encoded opaque token (16 bytes, base64url without padding).
pub const TOKEN_LEN: usize = 22;

/// Strip surrounding whitespace from a submitted email. Case is kept:
/// addresses are stored and compared exactly.
#[must_use]
pub fn trim_email(email: &str) -> String {
    email.trim().to_string()
}

/// Basic email format check on trimmed input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// Draw 128 random bits from the OS for a session id, verification token or
/// OAuth state.
///
/// # Errors
///
/// Returns a server error if the OS random source fails.
pub fn generate_token_id() -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::server(format!("failed to generate token: {err}")))?;
    Ok(Uuid::from_bytes(bytes))
}

/// Wire form of an opaque token.
#[must_use]
pub fn encode_token(id: Uuid) -> String {
    Base64UrlUnpadded::encode_string(id.as_bytes())
}

/// Parse the wire form of an opaque token. Returns `None` for anything
/// malformed.
#[must_use]
pub fn decode_token(token: &str) -> Option<Uuid> {
    if token.len() != TOKEN_LEN {
        return None;
    }
    let mut bytes = [0u8; 16];
    let decoded = Base64UrlUnpadded::decode(token, &mut bytes).ok()?;
    let bytes: [u8; 16] = decoded.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_email_keeps_case() {
        assert_eq!(trim_email("  Ada@Example.COM "), "Ada@Example.COM");
    }

    #[test]
    fn test_valid_email() {
        assert!(valid_email("ada@example.com"));
        assert!(!valid_email("ada@example"));
        assert!(!valid_email("ada example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn test_token_wire_form() {
        let id = generate_token_id().unwrap();
        let token = encode_token(id);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(!token.contains('='));
        assert!(!token.contains('+') && !token.contains('/'));
        assert_eq!(decode_token(&token), Some(id));
    }

    #[test]
    fn test_decode_token_rejects_malformed() {
        assert_eq!(decode_token(""), None);
        assert_eq!(decode_token("short"), None);
        assert_eq!(decode_token("!!!!!!!!!!!!!!!!!!!!!!"), None);
        assert_eq!(decode_token("AAAAAAAAAAAAAAAAAAAAAAAA"), None);
    }

    #[test]
    fn test_generated_tokens_differ() {
        let a = generate_token_id().unwrap();
        let b = generate_token_id().unwrap();
        assert_ne!(a, b);
    }
}
