use crate::error::{GuardError, GuardResult};
use crate::policy::Policies;
use clap::Args;
use std::path::PathBuf;
use validator::Validate;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON file overriding the default policies
    #[arg(long, env = "POLICY_FILE")]
    pub policy_file: Option<PathBuf>,
}

impl Config {
    pub fn validate(&self) -> GuardResult<()> {
        validate_redis_url(&self.redis_url)
    }

    /// Policies from the policy file, or the defaults when none is set.
    pub fn policies(&self) -> GuardResult<Policies> {
        match &self.policy_file {
            Some(path) => Policies::load(path),
            None => {
                let policies = Policies::default();
                policies.validate()?;
                Ok(policies)
            }
        }
    }
}

pub fn validate_redis_url(url: &str) -> GuardResult<()> {
    if url.is_empty() {
        return Err(GuardError::Configuration("Redis URL cannot be empty".to_string()));
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(GuardError::Configuration(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(redis_url: &str) -> Config {
        Config {
            redis_url: redis_url.to_string(),
            log_level: "info".to_string(),
            policy_file: None,
        }
    }

    #[test]
    fn test_valid_redis_url() {
        assert!(validate_redis_url("redis://localhost:6379").is_ok());
        assert!(validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(validate_redis_url("").is_err());
        assert!(validate_redis_url("http://localhost:6379").is_err());
        assert!(config("memcached://x").validate().is_err());
    }

    #[test]
    fn test_default_policies_without_file() {
        let policies = config("redis://localhost").policies().unwrap();
        assert_eq!(policies.otp.issue_limit, 3);
    }

    #[test]
    fn test_missing_policy_file_is_configuration_error() {
        let mut cfg = config("redis://localhost");
        cfg.policy_file = Some(PathBuf::from("/nonexistent/slotguard-policy.json"));
        assert!(matches!(cfg.policies(), Err(GuardError::Configuration(_))));
    }
}
