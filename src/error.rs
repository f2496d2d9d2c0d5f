use serde::Serialize;
use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Debug, Clone, Error)]
pub enum GuardError {
    #[error("Lock contended: {0}")]
    LockContended(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("No active challenge for this subject")]
    ChallengeNotFound,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Invalid code ({remaining_attempts} attempts left)")]
    InvalidCode { remaining_attempts: u32 },

    #[error("Too many failed attempts")]
    TooManyAttempts,

    #[error("Rate limited on {action}, retry in {retry_after_secs}s")]
    RateLimited { action: String, retry_after_secs: u64 },

    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Insufficient inventory for {inventory_id}: requested {requested}")]
    InsufficientInventory { inventory_id: String, requested: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, GuardError::StoreUnavailable(_))
    }

    /// Seconds the caller should wait before retrying, when that is known.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GuardError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_timeout()
            || err.is_connection_dropped()
        {
            GuardError::StoreUnavailable(err.to_string())
        } else {
            GuardError::Store(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for GuardError {
    fn from(err: validator::ValidationErrors) -> Self {
        GuardError::Configuration(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
            retry_after: None,
        }
    }

    pub fn from_guard_error(err: &GuardError) -> Self {
        let message = err.to_string();
        let mut response = match err {
            GuardError::LockContended(_) => Self::new("lock_contended", &message, 409),
            GuardError::StoreUnavailable(_) => Self::new("service_unavailable", &message, 503),
            GuardError::Store(_) => Self::new("store_error", &message, 500),
            GuardError::ChallengeNotFound => Self::new("challenge_not_found", &message, 404),
            GuardError::ChallengeExpired => Self::new("challenge_expired", &message, 410),
            GuardError::InvalidCode { .. } => Self::new("invalid_code", &message, 401),
            GuardError::TooManyAttempts => Self::new("too_many_attempts", &message, 403),
            GuardError::RateLimited { .. } => Self::new("rate_limit_exceeded", &message, 429),
            GuardError::CacheMiss(_) => Self::new("cache_miss", &message, 404),
            GuardError::Delivery(_) => Self::new("delivery_failed", &message, 502),
            GuardError::InsufficientInventory { .. } => {
                Self::new("insufficient_inventory", &message, 409)
            }
            GuardError::Validation(_) => Self::new("validation_error", &message, 422),
            GuardError::Configuration(_) => Self::new("configuration_error", &message, 500),
            GuardError::Serialization(_) => Self::new("serialization_error", &message, 500),
            GuardError::Internal(_) => Self::new("internal_error", &message, 500),
        };
        response.retry_after = err.retry_after();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_response_carries_retry_after() {
        let err = GuardError::RateLimited {
            action: "otp:rate_limit".to_string(),
            retry_after_secs: 42,
        };
        let response = ErrorResponse::from_guard_error(&err);
        assert_eq!(response.code, 429);
        assert_eq!(response.retry_after, Some(42));

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"retry_after\":42"));
    }

    #[test]
    fn test_store_unavailable_maps_to_503() {
        let err = GuardError::StoreUnavailable("connection refused".to_string());
        assert!(err.is_store_unavailable());
        let response = ErrorResponse::from_guard_error(&err);
        assert_eq!(response.code, 503);
        assert!(response.retry_after.is_none());
    }

    #[test]
    fn test_redis_io_error_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: GuardError = redis::RedisError::from(io).into();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_redis_type_error_is_not_unavailable() {
        let err: GuardError =
            redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE")).into();
        assert!(matches!(err, GuardError::Store(_)));
    }
}
