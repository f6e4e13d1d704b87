//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Validate a display name
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".to_string());
    }

    if name.len() < 2 {
        return Err("Name must be at least 2 characters long".to_string());
    }

    if name.len() > 100 {
        return Err("Name must be at most 100 characters long".to_string());
    }

    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z .'-]*$").expect("Failed to compile name regex")
    });

    if !regex.is_match(name) {
        return Err(
            "Name can only contain letters, spaces, apostrophes, and hyphens".to_string(),
        );
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    let mut has_upper = false;
    let mut has_lower = false;
    let mut has_digit = false;

    for c in password.chars() {
        if c.is_ascii_uppercase() {
            has_upper = true;
        } else if c.is_ascii_lowercase() {
            has_lower = true;
        } else if c.is_ascii_digit() {
            has_digit = true;
        }
    }

    if !has_upper {
        return Err("Password must contain at least one uppercase letter".to_string());
    }

    if !has_lower {
        return Err("Password must contain at least one lowercase letter".to_string());
    }

    if !has_digit {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_names() {
        assert!(validate_name("Asha Mushi").is_ok());
        assert!(validate_name("O'Neill").is_ok());
        assert!(validate_name("Jean-Paul").is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("A").is_err());
        assert!(validate_name("1337").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn accepts_reasonable_emails() {
        assert!(validate_email("asha@example.org").is_ok());
        assert!(validate_email("first.last+tag@sub.example.co.tz").is_ok());
    }

    #[test]
    fn rejects_bad_emails() {
        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("missing@tld").is_err());
    }

    #[test]
    fn enforces_password_strength() {
        assert!(validate_password("Correct1horse").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("short1A").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("ALLUPPERCASE1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
    }
}
