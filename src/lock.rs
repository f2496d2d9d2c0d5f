//! Advisory distributed locks.
//!
//! A lock is a `lock:<resource>` key holding an opaque token. Presence means
//! held, absence means free, and only the token proves ownership: release
//! always compares the stored token inside a script so a holder whose TTL ran
//! out can never delete the next holder's lock. TTL is the only deadlock
//! breaker. Acquisition never blocks; [`LockManager::lock_with_retry`] is a
//! polling helper for callers that want to wait.

use crate::error::{GuardError, GuardResult};
use crate::keys::lock_key;
use crate::policy::LockPolicy;
use crate::store::{KeyValueStore, StoreScript};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LockRecord {
    /// Resource name, without the `lock:` prefix.
    pub key: String,
    pub token: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MultiLockOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Millisecond timestamp plus a v4 UUID.
pub fn generate_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{}", millis, Uuid::new_v4().simple())
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn KeyValueStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// SET NX with expiry. `false` means someone else holds the key.
    pub async fn acquire(&self, key: &str, ttl_seconds: u64, token: Option<String>) -> GuardResult<bool> {
        let token = token.unwrap_or_else(generate_token);
        Ok(self.try_acquire(key, ttl_seconds, token).await?.is_some())
    }

    /// Like [`acquire`](Self::acquire) but hands back the generated token.
    pub async fn acquire_owned(&self, key: &str, ttl_seconds: u64) -> GuardResult<Option<LockRecord>> {
        self.try_acquire(key, ttl_seconds, generate_token()).await
    }

    async fn try_acquire(
        &self,
        key: &str,
        ttl_seconds: u64,
        token: String,
    ) -> GuardResult<Option<LockRecord>> {
        let ttl_seconds = ttl_seconds.max(1);
        let acquired = self
            .store
            .set_nx(&lock_key(key), &token, Duration::from_secs(ttl_seconds))
            .await?;

        debug!(key = %key, acquired, ttl_seconds, "Lock acquire");

        Ok(acquired.then(|| LockRecord {
            key: key.to_string(),
            token,
            ttl_seconds,
        }))
    }

    /// Polls [`acquire_owned`](Self::acquire_owned) with exponential backoff.
    /// Store failures end the loop immediately.
    pub async fn lock_with_retry(&self, key: &str, policy: &LockPolicy) -> GuardResult<LockRecord> {
        let ttl_seconds = policy.ttl.as_secs();
        for attempt in 0..policy.acquire_attempts {
            if let Some(record) = self.acquire_owned(key, ttl_seconds).await? {
                return Ok(record);
            }
            if attempt + 1 < policy.acquire_attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        warn!(key = %key, attempts = policy.acquire_attempts, "Lock still contended after retries");
        Err(GuardError::LockContended(key.to_string()))
    }

    /// Without a token the key is deleted unconditionally; only do that when
    /// ownership is already certain. With a token, deletion happens only if
    /// the stored value still matches.
    pub async fn release(&self, key: &str, token: Option<&str>) -> GuardResult<bool> {
        let store_key = lock_key(key);
        let released = match token {
            None => self.store.del(&store_key).await?,
            Some(token) => {
                self.store
                    .eval(StoreScript::CompareAndDelete, &[store_key], &[token.to_string()])
                    .await?
                    .expect_int(StoreScript::CompareAndDelete)?
                    > 0
            }
        };

        if !released && token.is_some() {
            debug!(key = %key, "Lock not released: expired or owned by another token");
        }

        Ok(released)
    }

    pub async fn release_record(&self, record: &LockRecord) -> GuardResult<bool> {
        self.release(&record.key, Some(&record.token)).await
    }

    /// All-or-nothing acquisition of a set of resources under one token.
    pub async fn acquire_multiple(&self, keys: &[String], ttl_seconds: u64) -> GuardResult<MultiLockOutcome> {
        let store_keys = distinct_lock_keys(keys)?;
        let token = generate_token();
        let ttl_seconds = ttl_seconds.max(1);

        let acquired = self
            .store
            .eval(
                StoreScript::AcquireAll,
                &store_keys,
                &[token.clone(), ttl_seconds.to_string()],
            )
            .await?
            .expect_int(StoreScript::AcquireAll)?
            == 1;

        debug!(keys = store_keys.len(), acquired, "Multi-lock acquire");

        Ok(MultiLockOutcome {
            success: acquired,
            token: acquired.then_some(token),
        })
    }

    /// Releases every key still held by `token`; returns how many were.
    pub async fn release_multiple(&self, keys: &[String], token: &str) -> GuardResult<u64> {
        let store_keys = distinct_lock_keys(keys)?;
        let released = self
            .store
            .eval(StoreScript::ReleaseAllOwned, &store_keys, &[token.to_string()])
            .await?
            .expect_int(StoreScript::ReleaseAllOwned)?;

        if (released as usize) < store_keys.len() {
            debug!(
                requested = store_keys.len(),
                released,
                "Some locks were no longer owned by this token"
            );
        }

        Ok(released.max(0) as u64)
    }
}

fn distinct_lock_keys(keys: &[String]) -> GuardResult<Vec<String>> {
    let distinct: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
    if distinct.is_empty() {
        return Err(GuardError::Validation("at least one lock key is required".into()));
    }
    Ok(distinct.into_iter().map(lock_key).collect())
}
