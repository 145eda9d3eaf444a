//! Input validation utilities

use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Validate a phone number (E.164 digits, optional leading `+`)
pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }

    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").expect("Failed to compile phone regex"));

    if !regex.is_match(phone) {
        return Err("Invalid phone number format".to_string());
    }

    Ok(())
}

/// Validate a six-digit verification code
pub fn validate_code(code: &str) -> Result<(), String> {
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err("Verification code must be six digits".to_string());
    }
    Ok(())
}

/// Validate nickname
pub fn validate_nickname(nickname: &str) -> Result<(), String> {
    if nickname.trim().is_empty() {
        return Err("Nickname is required".to_string());
    }

    if nickname.chars().count() > 32 {
        return Err("Nickname must be at most 32 characters long".to_string());
    }

    Ok(())
}

/// Validate the free-form profile text
pub fn validate_about_me(about_me: &str) -> Result<(), String> {
    if about_me.chars().count() > 1024 {
        return Err("About me must be at most 1024 characters long".to_string());
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` birthday that is not in the future
pub fn validate_birthday(birthday: &str) -> Result<NaiveDate, String> {
    let date = NaiveDate::parse_from_str(birthday, "%Y-%m-%d")
        .map_err(|_| "Birthday must be formatted as YYYY-MM-DD".to_string())?;

    if date > Utc::now().date_naive() {
        return Err("Birthday cannot be in the future".to_string());
    }

    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone() {
        assert!(validate_phone("13800138000").is_ok());
        assert!(validate_phone("+8613800138000").is_ok());
        assert!(validate_phone("").is_err());
        assert!(validate_phone("0123").is_err());
        assert!(validate_phone("138-0013-8000").is_err());
    }

    #[test]
    fn test_code() {
        assert!(validate_code("012345").is_ok());
        assert!(validate_code("12345").is_err());
        assert!(validate_code("12345a").is_err());
    }

    #[test]
    fn test_nickname() {
        assert!(validate_nickname("小明").is_ok());
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_about_me() {
        assert!(validate_about_me("").is_ok());
        assert!(validate_about_me(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn test_birthday() {
        assert_eq!(
            validate_birthday("2000-01-01"),
            Ok(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap())
        );
        assert!(validate_birthday("01/01/2000").is_err());
        assert!(validate_birthday("2999-01-01").is_err());
    }
}
