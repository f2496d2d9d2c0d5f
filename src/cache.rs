//! Advisory caches over the shared store.
//!
//! Both caches may be cold at any moment and are never authoritative. Store
//! errors are returned as-is; deciding whether an outage means "miss" is left
//! to the caller.

use crate::error::{GuardError, GuardResult};
use crate::keys::{inventory_quantity_key, user_reservations_key};
use crate::store::{KeyValueStore, StoreScript};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fast-path mirror of a quantity held in the authoritative store.
#[derive(Clone)]
pub struct CachedCounter {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl CachedCounter {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub async fn set(&self, resource_id: &str, quantity: i64, ttl: Option<Duration>) -> GuardResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.store
            .set(&inventory_quantity_key(resource_id), &quantity.to_string(), Some(ttl))
            .await
    }

    /// `None` is a miss, which is not the same as a cached zero.
    pub async fn get(&self, resource_id: &str) -> GuardResult<Option<i64>> {
        let key = inventory_quantity_key(resource_id);
        let Some(raw) = self.store.get(&key).await? else {
            debug!(resource_id = %resource_id, "Counter cache miss");
            return Ok(None);
        };
        match raw.parse() {
            Ok(quantity) => Ok(Some(quantity)),
            Err(_) => {
                warn!(resource_id = %resource_id, "Dropping non-numeric cached counter");
                self.store.del(&key).await?;
                Ok(None)
            }
        }
    }

    /// Like [`get`](Self::get) but a miss is an error.
    pub async fn require(&self, resource_id: &str) -> GuardResult<i64> {
        self.get(resource_id)
            .await?
            .ok_or_else(|| GuardError::CacheMiss(resource_id.to_string()))
    }

    /// Atomic INCRBY on an existing entry. `None` means the entry was cold and
    /// nothing was written; consult the authoritative source instead of
    /// assuming the value is `delta`.
    pub async fn apply_delta(&self, resource_id: &str, delta: i64) -> GuardResult<Option<i64>> {
        let updated = self
            .store
            .eval(
                StoreScript::IncrByIfPresent,
                &[inventory_quantity_key(resource_id)],
                &[delta.to_string()],
            )
            .await?
            .expect_optional_int(StoreScript::IncrByIfPresent)?;

        debug!(resource_id = %resource_id, delta, hit = updated.is_some(), "Counter delta");
        Ok(updated)
    }

    pub async fn invalidate(&self, resource_id: &str) -> GuardResult<bool> {
        self.store.del(&inventory_quantity_key(resource_id)).await
    }
}

/// Reservation ids a user holds at one merchant.
#[derive(Clone)]
pub struct ReservationIndex {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl ReservationIndex {
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Adds the id and refreshes the set's TTL.
    pub async fn remember(
        &self,
        user_id: &str,
        merchant_id: &str,
        reservation_id: &str,
        ttl: Option<Duration>,
    ) -> GuardResult<()> {
        let key = user_reservations_key(user_id, merchant_id);
        self.store.sadd(&key, reservation_id).await?;
        self.store.expire(&key, ttl.unwrap_or(self.default_ttl)).await?;
        Ok(())
    }

    pub async fn list(&self, user_id: &str, merchant_id: &str) -> GuardResult<Vec<String>> {
        self.store
            .smembers(&user_reservations_key(user_id, merchant_id))
            .await
    }

    pub async fn forget(&self, user_id: &str, merchant_id: &str, reservation_id: &str) -> GuardResult<bool> {
        self.store
            .srem(&user_reservations_key(user_id, merchant_id), reservation_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn counter() -> (CachedCounter, MemoryStore) {
        let store = MemoryStore::new();
        (
            CachedCounter::new(Arc::new(store.clone()), Duration::from_secs(3600)),
            store,
        )
    }

    #[tokio::test]
    async fn test_delta_on_cold_entry_is_a_miss() {
        let (counter, store) = counter();
        assert_eq!(counter.apply_delta("42", -1).await.unwrap(), None);
        assert_eq!(store.get("inventory:quantity:42").await.unwrap(), None);
        assert!(matches!(counter.require("42").await, Err(GuardError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_zero_is_not_a_miss() {
        let (counter, _) = counter();
        counter.set("42", 1, None).await.unwrap();
        assert_eq!(counter.apply_delta("42", -1).await.unwrap(), Some(0));
        assert_eq!(counter.get("42").await.unwrap(), Some(0));
        assert_eq!(counter.require("42").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_keeps_ttl() {
        let (counter, store) = counter();
        counter.set("42", 10, Some(Duration::from_secs(100))).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(counter.apply_delta("42", 5).await.unwrap(), Some(15));
        assert_eq!(
            store.ttl("inventory:quantity:42").await.unwrap(),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let (counter, store) = counter();
        store.set("inventory:quantity:42", "lots", None).await.unwrap();
        assert_eq!(counter.get("42").await.unwrap(), None);
        assert_eq!(store.get("inventory:quantity:42").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_index() {
        let store = MemoryStore::new();
        let index = ReservationIndex::new(Arc::new(store.clone()), Duration::from_secs(60));

        index.remember("u1", "m1", "r1", None).await.unwrap();
        index.remember("u1", "m1", "r2", None).await.unwrap();
        index.remember("u1", "m2", "r3", None).await.unwrap();
        assert_eq!(index.list("u1", "m1").await.unwrap(), vec!["r1", "r2"]);

        assert!(index.forget("u1", "m1", "r1").await.unwrap());
        assert_eq!(index.list("u1", "m1").await.unwrap(), vec!["r2"]);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(index.list("u1", "m2").await.unwrap().is_empty());
    }
}
