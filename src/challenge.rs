//! One-time passcode challenges.
//!
//! Per subject: `NONE -> ISSUED -> VERIFIED | EXHAUSTED | EXPIRED`. Issuing
//! again while a challenge is live replaces it. Two separate defences apply
//! to verification: the fixed verify window throttles calls, and the
//! challenge's own attempt counter caps wrong guesses.

use crate::error::{GuardError, GuardResult};
use crate::keys::{normalize_phone, otp_key, RateAction};
use crate::notifier::SmsSender;
use crate::policy::OtpPolicy;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::store::{KeyValueStore, StoreScript};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const SWAP_RETRIES: usize = 16;

/// Stored form, `{"otp", "attempts", "createdAt"}` with `createdAt` in epoch millis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Challenge {
    #[serde(rename = "otp")]
    pub code: String,
    pub attempts: u32,
    #[serde(rename = "createdAt")]
    pub created_at: u64,
}

impl Challenge {
    fn is_stale(&self, policy: &OtpPolicy, now_ms: u64) -> bool {
        let ttl_ms = policy.ttl.as_millis() as u64;
        self.created_at.saturating_add(ttl_ms) <= now_ms
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Verification {
    /// Normalized phone number, handed on to the session token issuer.
    pub subject: String,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn generate_code(length: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Compares without returning early on the first differing byte.
fn codes_match(expected: &str, given: &str) -> bool {
    let (a, b) = (expected.as_bytes(), given.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn rate_limited(action: &RateAction, decision: &RateDecision) -> GuardError {
    GuardError::RateLimited {
        action: action.to_string(),
        retry_after_secs: decision.reset_after_secs,
    }
}

#[derive(Clone)]
pub struct ChallengeStore {
    store: Arc<dyn KeyValueStore>,
    limiter: RateLimiter,
    sender: Arc<dyn SmsSender>,
    policy: OtpPolicy,
}

impl ChallengeStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        limiter: RateLimiter,
        sender: Arc<dyn SmsSender>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            store,
            limiter,
            sender,
            policy,
        }
    }

    /// Issues a fresh code and sends it. The issue window is charged before a
    /// code is generated. If delivery fails the stored challenge stays valid,
    /// so the caller may retry delivery without re-issuing.
    pub async fn issue(&self, subject: &str, locale: &str) -> GuardResult<()> {
        let phone = normalize_phone(subject)?;

        let action = RateAction::OtpIssue;
        let decision = self
            .limiter
            .check(&phone, &action, self.policy.issue_limit, self.policy.issue_window)
            .await?;
        if decision.is_limited() {
            warn!(phone = %phone, retry_after = decision.reset_after_secs, "OTP issue rate limited");
            return Err(rate_limited(&action, &decision));
        }

        let challenge = Challenge {
            code: generate_code(self.policy.code_length),
            attempts: 0,
            created_at: now_millis(),
        };
        self.store
            .set(
                &otp_key(&phone),
                &serde_json::to_string(&challenge)?,
                Some(self.policy.ttl),
            )
            .await?;

        info!(phone = %phone, issued_in_window = decision.count, "OTP challenge issued");

        self.sender
            .send(&phone, &challenge.code, locale)
            .await
            .map_err(|e| {
                warn!(phone = %phone, error = %e, "OTP delivery failed");
                match e {
                    GuardError::Delivery(_) => e,
                    other => GuardError::Delivery(other.to_string()),
                }
            })
    }

    pub async fn verify(&self, subject: &str, code: &str) -> GuardResult<Verification> {
        let phone = normalize_phone(subject)?;

        let action = RateAction::OtpVerify;
        let decision = self
            .limiter
            .check(&phone, &action, self.policy.verify_limit, self.policy.verify_window)
            .await?;
        if decision.is_limited() {
            warn!(phone = %phone, "OTP verify rate limited");
            return Err(rate_limited(&action, &decision));
        }

        let key = otp_key(&phone);
        for _ in 0..SWAP_RETRIES {
            if let Some(verification) = self.attempt(&phone, &key, code).await? {
                return Ok(verification);
            }
        }
        warn!(phone = %phone, "OTP challenge kept changing during verification");
        Err(GuardError::Store(format!(
            "challenge at {} changed {} times during verification",
            key, SWAP_RETRIES
        )))
    }

    /// One read-decide-write pass over the stored challenge. Every write is
    /// conditional on the exact value read, so `Ok(None)` means another caller
    /// changed the challenge in between and the pass must be repeated.
    async fn attempt(&self, phone: &str, key: &str, code: &str) -> GuardResult<Option<Verification>> {
        let raw = self
            .store
            .get(key)
            .await?
            .ok_or(GuardError::ChallengeNotFound)?;

        let mut challenge: Challenge = match serde_json::from_str(&raw) {
            Ok(challenge) => challenge,
            Err(e) => {
                warn!(phone = %phone, error = %e, "Discarding unreadable OTP challenge");
                self.consume(key, &raw).await?;
                return Err(GuardError::ChallengeNotFound);
            }
        };

        if challenge.is_stale(&self.policy, now_millis()) {
            self.consume(key, &raw).await?;
            return Err(GuardError::ChallengeExpired);
        }

        if challenge.attempts >= self.policy.max_attempts {
            self.consume(key, &raw).await?;
            warn!(phone = %phone, "OTP challenge exhausted");
            return Err(GuardError::TooManyAttempts);
        }

        if !codes_match(&challenge.code, code) {
            challenge.attempts += 1;
            let swapped = self
                .store
                .eval(
                    StoreScript::SwapKeepTtl,
                    &[key.to_string()],
                    &[raw, serde_json::to_string(&challenge)?],
                )
                .await?
                .expect_int(StoreScript::SwapKeepTtl)?;
            if swapped == 0 {
                return Ok(None);
            }
            return Err(GuardError::InvalidCode {
                remaining_attempts: self.policy.max_attempts.saturating_sub(challenge.attempts),
            });
        }

        if !self.consume(key, &raw).await? {
            return Ok(None);
        }
        self.limiter.reset(phone, &RateAction::OtpIssue).await?;

        info!(phone = %phone, "OTP challenge verified");
        Ok(Some(Verification {
            subject: phone.to_string(),
        }))
    }

    /// Deletes the challenge only while it still holds `raw`.
    async fn consume(&self, key: &str, raw: &str) -> GuardResult<bool> {
        let deleted = self
            .store
            .eval(
                StoreScript::CompareAndDelete,
                &[key.to_string()],
                &[raw.to_string()],
            )
            .await?
            .expect_int(StoreScript::CompareAndDelete)?;
        Ok(deleted == 1)
    }

    /// Drops the live challenge, if any.
    pub async fn invalidate(&self, subject: &str) -> GuardResult<bool> {
        let phone = normalize_phone(subject)?;
        self.store.del(&otp_key(&phone)).await
    }
}
