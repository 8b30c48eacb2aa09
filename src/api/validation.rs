//! Input validation for API requests.
//!
//! Field-level validators returning `Result<(), String>`, collected through
//! the `ValidationErrorBuilder` from the `error` module.

use chrono::{NaiveDate, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email shape check; real verification happens out of band
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+$"
    ).unwrap();

    /// Phone numbers: digits with optional separators and leading +
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9][0-9 ()./-]{4,24}$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a person or pet name
pub fn validate_name(name: &str, field: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} is required", field));
    }

    if name.len() > 100 {
        return Err(format!("{} is too long (max 100 characters)", field));
    }

    Ok(())
}

/// Validate a phone number (optional field; empty means not provided)
pub fn validate_phone(phone: &str) -> Result<(), String> {
    if phone.is_empty() {
        return Ok(());
    }

    if !PHONE_REGEX.is_match(phone) {
        return Err("Invalid phone number format".to_string());
    }

    Ok(())
}

/// Validate a calendar date (YYYY-MM-DD)
pub fn validate_date(date: &str, field: &str) -> Result<(), String> {
    if date.is_empty() {
        return Err(format!("{} is required", field));
    }

    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| format!("Invalid {} format, expected YYYY-MM-DD", field))
}

/// Validate a time of day (HH:MM or HH:MM:SS)
pub fn validate_time(time: &str, field: &str) -> Result<(), String> {
    if time.is_empty() {
        return Err(format!("{} is required", field));
    }

    NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map(|_| ())
        .map_err(|_| format!("Invalid {} format, expected HH:MM", field))
}

/// Validate a monetary amount
pub fn validate_amount(amount: f64, field: &str) -> Result<(), String> {
    if !amount.is_finite() {
        return Err(format!("{} must be a number", field));
    }

    if amount < 0.0 {
        return Err(format!("{} cannot be negative", field));
    }

    Ok(())
}

/// Validate an item quantity
pub fn validate_quantity(quantity: i64) -> Result<(), String> {
    if quantity < 1 {
        return Err("Quantity must be at least 1".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("jane@example.com").is_ok());
        assert!(validate_email("j.doe+vet@clinic.co.uk").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("missing@tld").is_err());
        assert!(validate_email("@example.com").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Jane", "First name").is_ok());
        assert!(validate_name("", "First name").is_err());
        assert!(validate_name("   ", "First name").is_err());
        assert!(validate_name(&"x".repeat(101), "First name").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(validate_phone("").is_ok()); // optional
        assert!(validate_phone("+1 555 123-4567").is_ok());
        assert!(validate_phone("0151 2345678").is_ok());

        assert!(validate_phone("call me").is_err());
        assert!(validate_phone("123").is_err());
    }

    #[test]
    fn test_validate_date() {
        assert!(validate_date("2025-10-25", "date").is_ok());

        assert!(validate_date("", "date").is_err());
        assert!(validate_date("25/10/2025", "date").is_err());
        assert!(validate_date("2025-13-40", "date").is_err());
    }

    #[test]
    fn test_validate_time() {
        assert!(validate_time("10:00", "time").is_ok());
        assert!(validate_time("23:59:59", "time").is_ok());

        assert!(validate_time("", "time").is_err());
        assert!(validate_time("25:00", "time").is_err());
        assert!(validate_time("10am", "time").is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(0.0, "totalAmount").is_ok());
        assert!(validate_amount(129.99, "totalAmount").is_ok());

        assert!(validate_amount(-1.0, "totalAmount").is_err());
        assert!(validate_amount(f64::NAN, "totalAmount").is_err());
        assert!(validate_amount(f64::INFINITY, "totalAmount").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(10).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-2).is_err());
    }
}
