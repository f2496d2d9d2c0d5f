//! Key naming for everything this crate writes to the shared store.
//!
//! These layouts are shared with other services reading the same store and
//! must not change.

use crate::error::{GuardError, GuardResult};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9][0-9]{6,14}$").expect("static E.164 pattern"));

/// Which fixed window a rate check counts against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateAction {
    /// Challenge issuance, keyed `otp:rate_limit:<phone>`.
    OtpIssue,
    /// Challenge verification, keyed `otp:verify_rate_limit:<phone>`.
    OtpVerify,
    /// Anything else, keyed `rate_limit:<name>:<subject>`.
    Named(String),
}

impl RateAction {
    pub fn key(&self, subject: &str) -> String {
        match self {
            RateAction::OtpIssue => format!("otp:rate_limit:{}", subject),
            RateAction::OtpVerify => format!("otp:verify_rate_limit:{}", subject),
            RateAction::Named(name) => {
                format!("rate_limit:{}:{}", sanitize_component(name), subject)
            }
        }
    }
}

impl fmt::Display for RateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateAction::OtpIssue => f.write_str("otp_issue"),
            RateAction::OtpVerify => f.write_str("otp_verify"),
            RateAction::Named(name) => f.write_str(name),
        }
    }
}

impl From<&str> for RateAction {
    fn from(name: &str) -> Self {
        match name {
            "otp_issue" => RateAction::OtpIssue,
            "otp_verify" => RateAction::OtpVerify,
            other => RateAction::Named(other.to_string()),
        }
    }
}

pub fn lock_key(resource: &str) -> String {
    format!("lock:{}", resource)
}

pub fn otp_key(phone: &str) -> String {
    format!("otp:{}", phone)
}

pub fn inventory_quantity_key(inventory_id: &str) -> String {
    format!("inventory:quantity:{}", inventory_id)
}

pub fn user_reservations_key(user_id: &str, merchant_id: &str) -> String {
    format!("user:reservations:{}:{}", user_id, merchant_id)
}

/// Normalizes a phone number to E.164 (`+` and digits only).
///
/// Spaces, dashes, dots and parentheses are dropped and a leading `00`
/// international prefix becomes `+`.
pub fn normalize_phone(raw: &str) -> GuardResult<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let normalized = match compact.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => compact,
    };

    if E164.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(GuardError::Validation(format!(
            "'{}' is not a valid international phone number",
            raw
        )))
    }
}

/// Replaces anything outside `[A-Za-z0-9:_-]` so caller-supplied names
/// cannot smuggle extra separators or whitespace into a key.
pub fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ':' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layouts() {
        assert_eq!(lock_key("inventory:42"), "lock:inventory:42");
        assert_eq!(otp_key("+96171123456"), "otp:+96171123456");
        assert_eq!(
            RateAction::OtpIssue.key("+96171123456"),
            "otp:rate_limit:+96171123456"
        );
        assert_eq!(inventory_quantity_key("7"), "inventory:quantity:7");
        assert_eq!(user_reservations_key("u1", "m9"), "user:reservations:u1:m9");
    }

    #[test]
    fn test_named_action_key() {
        let action = RateAction::from("login attempt");
        assert_eq!(action.key("u1"), "rate_limit:login_attempt:u1");
        assert_eq!(RateAction::from("otp_verify"), RateAction::OtpVerify);
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+961 71 123 456").unwrap(), "+96171123456");
        assert_eq!(normalize_phone("0096171123456").unwrap(), "+96171123456");
        assert_eq!(normalize_phone("+1 (415) 555-0100").unwrap(), "+14155550100");
    }

    #[test]
    fn test_normalize_phone_rejects_garbage() {
        assert!(normalize_phone("").is_err());
        assert!(normalize_phone("71123456").is_err());
        assert!(normalize_phone("+0123456789").is_err());
        assert!(normalize_phone("+9617112abc").is_err());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("test@key#with$chars"), "test_key_with_chars");
    }
}
