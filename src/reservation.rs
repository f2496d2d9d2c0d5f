//! Reservation creation against scarce inventory.
//!
//! Every change to an item's authoritative quantity runs under the
//! `lock:inventory:<id>` lock, and the authoritative store decrements
//! conditionally, so the last unit cannot be sold twice even when the cached
//! counter is cold or stale. The cached counter and reservation index are
//! refreshed afterwards on a best-effort basis.

use crate::cache::{CachedCounter, ReservationIndex};
use crate::error::{GuardError, GuardResult};
use crate::lock::{LockManager, LockRecord};
use crate::policy::LockPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};
use uuid::Uuid;

/// The durable inventory store. Implemented by the host application.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn quantity(&self, inventory_id: &str) -> GuardResult<Option<i64>>;

    /// Takes `units` only if at least that many remain; returns what is left,
    /// or `None` when there was not enough.
    async fn decrement_if_available(&self, inventory_id: &str, units: i64) -> GuardResult<Option<i64>>;

    /// Puts `units` back; returns the new quantity.
    async fn restock(&self, inventory_id: &str, units: i64) -> GuardResult<i64>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationRequest {
    pub user_id: String,
    pub merchant_id: String,
    pub inventory_id: String,
    pub units: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    pub merchant_id: String,
    pub inventory_id: String,
    pub units: i64,
    /// Authoritative quantity left right after this change.
    pub remaining: i64,
}

fn inventory_resource(inventory_id: &str) -> String {
    format!("inventory:{}", inventory_id)
}

pub struct ReservationCoordinator<I> {
    inventory: I,
    locks: LockManager,
    counter: CachedCounter,
    index: ReservationIndex,
    lock_policy: LockPolicy,
}

impl<I: InventoryStore> ReservationCoordinator<I> {
    pub fn new(
        inventory: I,
        locks: LockManager,
        counter: CachedCounter,
        index: ReservationIndex,
        lock_policy: LockPolicy,
    ) -> Self {
        Self {
            inventory,
            locks,
            counter,
            index,
            lock_policy,
        }
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub async fn reserve(&self, request: &ReservationRequest) -> GuardResult<Reservation> {
        if request.units <= 0 {
            return Err(GuardError::Validation("units must be positive".into()));
        }

        let reservation = self
            .with_inventory_lock(&request.inventory_id, async {
                let remaining = self
                    .inventory
                    .decrement_if_available(&request.inventory_id, request.units)
                    .await?
                    .ok_or_else(|| GuardError::InsufficientInventory {
                        inventory_id: request.inventory_id.clone(),
                        requested: request.units,
                    })?;

                self.sync_counter(&request.inventory_id, -request.units, remaining)
                    .await;

                Ok::<_, GuardError>(Reservation {
                    id: Uuid::new_v4().to_string(),
                    user_id: request.user_id.clone(),
                    merchant_id: request.merchant_id.clone(),
                    inventory_id: request.inventory_id.clone(),
                    units: request.units,
                    remaining,
                })
            })
            .await?;

        if let Err(e) = self
            .index
            .remember(&reservation.user_id, &reservation.merchant_id, &reservation.id, None)
            .await
        {
            warn!(reservation_id = %reservation.id, error = %e, "Reservation index not updated");
        }

        info!(
            reservation_id = %reservation.id,
            inventory_id = %reservation.inventory_id,
            units = reservation.units,
            remaining = reservation.remaining,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Returns the units of a reservation to inventory.
    pub async fn cancel(&self, reservation: &Reservation) -> GuardResult<i64> {
        let remaining = self
            .with_inventory_lock(&reservation.inventory_id, async {
                let remaining = self
                    .inventory
                    .restock(&reservation.inventory_id, reservation.units)
                    .await?;
                self.sync_counter(&reservation.inventory_id, reservation.units, remaining)
                    .await;
                Ok::<_, GuardError>(remaining)
            })
            .await?;

        if let Err(e) = self
            .index
            .forget(&reservation.user_id, &reservation.merchant_id, &reservation.id)
            .await
        {
            warn!(reservation_id = %reservation.id, error = %e, "Reservation index not updated");
        }

        info!(reservation_id = %reservation.id, remaining, "Reservation cancelled");
        Ok(remaining)
    }

    /// Cached quantity when warm, otherwise the authoritative one (and the
    /// cache is backfilled).
    pub async fn available(&self, inventory_id: &str) -> GuardResult<Option<i64>> {
        match self.counter.get(inventory_id).await {
            Ok(Some(quantity)) => return Ok(Some(quantity)),
            Ok(None) => {}
            Err(e) => warn!(inventory_id = %inventory_id, error = %e, "Counter cache unreadable"),
        }

        let quantity = self.inventory.quantity(inventory_id).await?;
        if let Some(quantity) = quantity {
            if let Err(e) = self.counter.set(inventory_id, quantity, None).await {
                warn!(inventory_id = %inventory_id, error = %e, "Counter cache backfill failed");
            }
        }
        Ok(quantity)
    }

    pub async fn reservations_for(&self, user_id: &str, merchant_id: &str) -> GuardResult<Vec<String>> {
        self.index.list(user_id, merchant_id).await
    }

    /// Runs `work` while holding the item's lock. The lock is released by
    /// token on every path. A failed release is only logged; the TTL clears it.
    async fn with_inventory_lock<T, F>(&self, inventory_id: &str, work: F) -> GuardResult<T>
    where
        F: Future<Output = GuardResult<T>>,
    {
        let record: LockRecord = self
            .locks
            .lock_with_retry(&inventory_resource(inventory_id), &self.lock_policy)
            .await?;

        let result = work.await;

        match self.locks.release_record(&record).await {
            Ok(true) => {}
            Ok(false) => warn!(
                inventory_id = %inventory_id,
                "Inventory lock expired before release; consider a longer lock TTL"
            ),
            Err(e) => warn!(inventory_id = %inventory_id, error = %e, "Inventory lock release failed"),
        }

        result
    }

    /// Mirrors an authoritative change into the cache. A cold entry or a
    /// drifted value is overwritten with the authoritative quantity; cache
    /// failures only log.
    async fn sync_counter(&self, inventory_id: &str, delta: i64, authoritative: i64) {
        let cached = match self.counter.apply_delta(inventory_id, delta).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(inventory_id = %inventory_id, error = %e, "Counter cache delta failed");
                return;
            }
        };

        if cached != Some(authoritative) {
            if let Err(e) = self.counter.set(inventory_id, authoritative, None).await {
                warn!(inventory_id = %inventory_id, error = %e, "Counter cache refresh failed");
            }
        }
    }
}
