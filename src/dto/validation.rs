//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted player name, in characters.
pub const MAX_PLAYER_NAME_CHARS: usize = 32;

/// Canonical form of a user-typed lobby code: trimmed and upper-cased.
pub fn normalize_lobby_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Validates that a lobby code is three uppercase letters, a dash and three digits.
///
/// # Examples
///
/// ```ignore
/// validate_lobby_code("ABC-123") // Ok
/// validate_lobby_code("abc-123") // Err - lowercase, normalize first
/// validate_lobby_code("ABC123")  // Err - missing dash
/// ```
pub fn validate_lobby_code(code: &str) -> Result<(), ValidationError> {
    let bytes = code.as_bytes();
    let well_formed = bytes.len() == 7
        && bytes[..3].iter().all(u8::is_ascii_uppercase)
        && bytes[3] == b'-'
        && bytes[4..].iter().all(u8::is_ascii_digit);

    if !well_formed {
        let mut err = ValidationError::new("lobby_code_format");
        err.message = Some("Invalid code format. Use e.g. ABC-123".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a player name once trimmed: non-empty and at most
/// [`MAX_PLAYER_NAME_CHARS`] characters.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        let mut err = ValidationError::new("player_name_empty");
        err.message = Some("Player name must not be empty".into());
        return Err(err);
    }

    let length = name.chars().count();
    if length > MAX_PLAYER_NAME_CHARS {
        let mut err = ValidationError::new("player_name_length");
        err.message = Some(
            format!("Player name must be at most {MAX_PLAYER_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lobby_code_valid() {
        assert!(validate_lobby_code("ABC-123").is_ok());
        assert!(validate_lobby_code("ZZZ-000").is_ok());
        assert!(validate_lobby_code(&normalize_lobby_code("  abc-123 ")).is_ok());
    }

    #[test]
    fn test_validate_lobby_code_invalid() {
        assert!(validate_lobby_code("abc-123").is_err()); // lowercase
        assert!(validate_lobby_code("ABC123").is_err()); // missing dash
        assert!(validate_lobby_code("AB1-123").is_err()); // digit in prefix
        assert!(validate_lobby_code("ABC-12").is_err()); // too short
        assert!(validate_lobby_code("ÄBC-123").is_err()); // non ascii
        assert!(validate_lobby_code("").is_err());

        let err = validate_lobby_code("nope").unwrap_err();
        assert_eq!(
            err.message.as_deref(),
            Some("Invalid code format. Use e.g. ABC-123")
        );
    }

    #[test]
    fn test_validate_player_name() {
        assert!(validate_player_name("  Ada ").is_ok());
        assert!(validate_player_name(&"x".repeat(32)).is_ok());
        assert!(validate_player_name("   ").is_err());
        assert!(validate_player_name(&"x".repeat(33)).is_err());
    }
}
