use crate::cache::{CachedCounter, ReservationIndex};
use crate::challenge::ChallengeStore;
use crate::health::{HealthChecker, HealthStatus};
use crate::lock::LockManager;
use crate::notifier::SmsSender;
use crate::policy::Policies;
use crate::rate_limiter::RateLimiter;
use crate::reservation::{InventoryStore, ReservationCoordinator};
use crate::store::KeyValueStore;
use std::sync::Arc;

/// Every component wired over one shared store.
pub struct AccessGuard {
    store: Arc<dyn KeyValueStore>,
    policies: Policies,
    locks: LockManager,
    limiter: RateLimiter,
    challenges: ChallengeStore,
    counter: CachedCounter,
    index: ReservationIndex,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, sender: Arc<dyn SmsSender>, policies: Policies) -> Self {
        let locks = LockManager::new(store.clone());
        let limiter = RateLimiter::new(store.clone());
        let challenges = ChallengeStore::new(
            store.clone(),
            limiter.clone(),
            sender,
            policies.otp.clone(),
        );
        let counter = CachedCounter::new(store.clone(), policies.cache.inventory_ttl);
        let index = ReservationIndex::new(store.clone(), policies.cache.reservation_index_ttl);

        Self {
            store,
            policies,
            locks,
            limiter,
            challenges,
            counter,
            index,
        }
    }

    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    pub fn counter(&self) -> &CachedCounter {
        &self.counter
    }

    pub fn reservation_index(&self) -> &ReservationIndex {
        &self.index
    }

    /// Builds a coordinator over the host's authoritative inventory.
    pub fn reservations<I: InventoryStore>(&self, inventory: I) -> ReservationCoordinator<I> {
        ReservationCoordinator::new(
            inventory,
            self.locks.clone(),
            self.counter.clone(),
            self.index.clone(),
            self.policies.lock.clone(),
        )
    }

    pub async fn health_check(&self) -> HealthStatus {
        HealthChecker::new(self.store.clone()).check_health().await
    }
}
