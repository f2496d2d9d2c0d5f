use crate::error::GuardResult;
use crate::keys::RateAction;
use crate::store::{KeyValueStore, StoreScript};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of one fixed-window hit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Count in the window after this hit (unchanged when refused).
    pub count: u64,
    pub limit: u64,
    pub reset_after_secs: u64,
}

impl RateDecision {
    pub fn is_limited(&self) -> bool {
        !self.allowed
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Fixed-window counter per subject and action.
///
/// The window starts at the first hit and resets wholesale when its TTL
/// lapses, so a burst straddling the boundary can see up to twice the limit.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn check(
        &self,
        subject: &str,
        action: &RateAction,
        limit: u32,
        window: Duration,
    ) -> GuardResult<RateDecision> {
        let key = action.key(subject);
        let window_secs = window.as_secs().max(1);

        let reply = self
            .store
            .eval(
                StoreScript::FixedWindowHit,
                &[key],
                &[limit.to_string(), window_secs.to_string()],
            )
            .await?;
        let values = reply.expect_ints(StoreScript::FixedWindowHit, 3)?;

        let decision = RateDecision {
            allowed: values[0] == 1,
            count: values[1].max(0) as u64,
            limit: u64::from(limit),
            reset_after_secs: values[2].max(0) as u64,
        };

        debug!(
            subject = %subject,
            action = %action,
            allowed = decision.allowed,
            count = decision.count,
            "Fixed window rate limit check"
        );

        Ok(decision)
    }

    pub async fn check_and_increment(
        &self,
        subject: &str,
        action: &RateAction,
        limit: u32,
        window: Duration,
    ) -> GuardResult<bool> {
        Ok(self.check(subject, action, limit, window).await?.allowed)
    }

    pub async fn reset(&self, subject: &str, action: &RateAction) -> GuardResult<bool> {
        self.store.del(&action.key(subject)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter() -> (RateLimiter, MemoryStore) {
        let store = MemoryStore::new();
        (RateLimiter::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_refuses_at_limit_without_incrementing() {
        let (limiter, store) = limiter();
        let action = RateAction::from("search");
        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let decision = limiter.check("u1", &action, 3, window).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.count, expected);
        }

        let refused = limiter.check("u1", &action, 3, window).await.unwrap();
        assert!(refused.is_limited());
        assert_eq!(refused.remaining(), 0);
        assert_eq!(
            store.get(&action.key("u1")).await.unwrap(),
            Some("3".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_ttl() {
        let (limiter, _) = limiter();
        let action = RateAction::OtpVerify;
        let window = Duration::from_secs(60);

        assert!(limiter.check_and_increment("p", &action, 1, window).await.unwrap());
        assert!(!limiter.check_and_increment("p", &action, 1, window).await.unwrap());

        tokio::time::advance(Duration::from_secs(60)).await;
        let decision = limiter.check("p", &action, 1, window).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.reset_after_secs, 60);
    }

    #[tokio::test]
    async fn test_subjects_and_actions_are_independent() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);

        assert!(limiter.check_and_increment("a", &RateAction::OtpIssue, 1, window).await.unwrap());
        assert!(limiter.check_and_increment("b", &RateAction::OtpIssue, 1, window).await.unwrap());
        assert!(limiter.check_and_increment("a", &RateAction::OtpVerify, 1, window).await.unwrap());
        assert!(!limiter.check_and_increment("a", &RateAction::OtpIssue, 1, window).await.unwrap());

        assert!(limiter.reset("a", &RateAction::OtpIssue).await.unwrap());
        assert!(limiter.check_and_increment("a", &RateAction::OtpIssue, 1, window).await.unwrap());
    }
}
