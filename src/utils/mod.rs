//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

use chrono::{DateTime, Utc};

/// Validate a reservation PIN.
///
/// A PIN must be 4 to 8 ASCII digits. Anything else is rejected before
/// it reaches the engine.
///
/// ## Arguments
///
/// * `pin` - Candidate PIN string
///
/// ## Returns
///
/// * `Ok(())` - Well-formed PIN
/// * `Err(String)` - Reason the PIN is malformed
pub fn validate_pin(pin: &str) -> Result<(), String> {
    if pin.len() < 4 || pin.len() > 8 {
        return Err(format!(
            "PIN must be 4-8 digits, got {} characters",
            pin.len()
        ));
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err("PIN must contain only digits".to_string());
    }

    Ok(())
}

/// Format a timestamp as ISO 8601.
#[allow(dead_code)]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

/// Truncate a string to a maximum length.
///
/// Useful for logging long tokens.
#[allow(dead_code)]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let half = (max_len - 3) / 2;
        format!("{}...{}", &s[..half], &s[s.len() - half..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("12345678").is_ok());

        // Too short / too long
        assert!(validate_pin("123").is_err());
        assert!(validate_pin("123456789").is_err());

        // Non-digits
        assert!(validate_pin("12a4").is_err());
        assert!(validate_pin("12 4").is_err());
        assert!(validate_pin("١٢٣٤").is_err());
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abc...nop");
    }
}
