pub mod cache;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod keys;
pub mod lock;
pub mod notifier;
pub mod policy;
pub mod rate_limiter;
pub mod reservation;
pub mod service;
pub mod store;

pub use cache::{CachedCounter, ReservationIndex};
pub use challenge::{Challenge, ChallengeStore, Verification};
pub use config::Config;
pub use error::{ErrorResponse, GuardError, GuardResult};
pub use lock::{LockManager, LockRecord, MultiLockOutcome};
pub use notifier::SmsSender;
pub use policy::Policies;
pub use rate_limiter::{RateDecision, RateLimiter};
pub use reservation::{InventoryStore, Reservation, ReservationCoordinator, ReservationRequest};
pub use service::AccessGuard;
pub use store::{KeyValueStore, MemoryStore, RedisStore};
