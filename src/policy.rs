use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Tunables for every component, loadable from a JSON policy file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Policies {
    #[validate(nested)]
    pub otp: OtpPolicy,
    #[validate(nested)]
    pub lock: LockPolicy,
    #[validate(nested)]
    pub cache: CachePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_otp_windows"))]
pub struct OtpPolicy {
    #[validate(range(min = 4, max = 10))]
    pub code_length: u32,
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[validate(range(min = 1))]
    pub issue_limit: u32,
    #[serde(with = "humantime_serde")]
    pub issue_window: Duration,
    #[validate(range(min = 1))]
    pub verify_limit: u32,
    #[serde(with = "humantime_serde")]
    pub verify_window: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_lock_timing"))]
pub struct LockPolicy {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[validate(range(min = 1, max = 100))]
    pub acquire_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_cache_ttls"))]
pub struct CachePolicy {
    #[serde(with = "humantime_serde")]
    pub inventory_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub reservation_index_ttl: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            max_attempts: 3,
            ttl: Duration::from_secs(300),
            issue_limit: 3,
            issue_window: Duration::from_secs(3600),
            verify_limit: 5,
            verify_window: Duration::from_secs(60),
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            acquire_attempts: 5,
            retry_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            inventory_ttl: Duration::from_secs(3600),
            reservation_index_ttl: Duration::from_secs(86400),
        }
    }
}

impl LockPolicy {
    /// Delay before retry number `attempt` (0-based), doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.retry_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Policies {
    pub fn from_json(raw: &str) -> GuardResult<Self> {
        let policies: Policies = serde_json::from_str(raw)
            .map_err(|e| GuardError::Configuration(format!("Invalid policy file: {}", e)))?;
        policies.validate()?;
        Ok(policies)
    }

    pub fn load(path: &Path) -> GuardResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}

fn whole_seconds(value: Duration, field: &'static str) -> Result<(), ValidationError> {
    if value.as_secs() == 0 || value.subsec_nanos() != 0 {
        let mut err = ValidationError::new("whole_seconds");
        err.message = Some(format!("{} must be a positive whole number of seconds", field).into());
        return Err(err);
    }
    Ok(())
}

fn validate_otp_windows(policy: &OtpPolicy) -> Result<(), ValidationError> {
    whole_seconds(policy.ttl, "otp.ttl")?;
    whole_seconds(policy.issue_window, "otp.issue_window")?;
    whole_seconds(policy.verify_window, "otp.verify_window")
}

fn validate_lock_timing(policy: &LockPolicy) -> Result<(), ValidationError> {
    whole_seconds(policy.ttl, "lock.ttl")?;
    if policy.retry_backoff.is_zero() || policy.retry_backoff > policy.max_backoff {
        return Err(ValidationError::new("lock_backoff"));
    }
    Ok(())
}

fn validate_cache_ttls(policy: &CachePolicy) -> Result<(), ValidationError> {
    whole_seconds(policy.inventory_ttl, "cache.inventory_ttl")?;
    whole_seconds(policy.reservation_index_ttl, "cache.reservation_index_ttl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let policies = Policies::default();
        assert!(policies.validate().is_ok());
        assert_eq!(policies.otp.max_attempts, 3);
        assert_eq!(policies.otp.ttl, Duration::from_secs(300));
        assert_eq!(policies.otp.issue_window, Duration::from_secs(3600));
        assert_eq!(policies.cache.inventory_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let policies = Policies::from_json(r#"{"otp": {"ttl": "2m", "verify_limit": 10}}"#).unwrap();
        assert_eq!(policies.otp.ttl, Duration::from_secs(120));
        assert_eq!(policies.otp.verify_limit, 10);
        assert_eq!(policies.otp.issue_limit, 3);
        assert_eq!(policies.lock.acquire_attempts, 5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Policies::from_json(r#"{"otp": {"code_length": 2}}"#).is_err());
        assert!(Policies::from_json(r#"{"otp": {"ttl": "500ms"}}"#).is_err());
        assert!(Policies::from_json(r#"{"lock": {"retry_backoff": "5s", "max_backoff": "1s"}}"#).is_err());
        assert!(Policies::from_json("not json").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let lock = LockPolicy::default();
        assert_eq!(lock.backoff(0), Duration::from_millis(50));
        assert_eq!(lock.backoff(1), Duration::from_millis(100));
        assert_eq!(lock.backoff(3), Duration::from_millis(400));
        assert_eq!(lock.backoff(10), Duration::from_secs(1));
        assert_eq!(lock.backoff(40), Duration::from_secs(1));
    }
}
