//! Shared key/value store abstraction.
//!
//! Production code talks to [`RedisStore`]; tests and local runs use
//! [`MemoryStore`]. Nothing above this module knows which one it has.

mod memory;
mod redis;
pub mod script;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::script::{KeyArity, ScriptReply, StoreScript};

use crate::error::GuardResult;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> GuardResult<Option<String>>;

    /// Plain SET, with an expiry when `ttl` is given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GuardResult<()>;

    /// SET NX EX. Returns whether the key was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GuardResult<bool>;

    async fn del(&self, key: &str) -> GuardResult<bool>;

    async fn incr_by(&self, key: &str, delta: i64) -> GuardResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> GuardResult<bool>;

    /// Remaining lifetime; `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> GuardResult<Option<Duration>>;

    async fn sadd(&self, key: &str, member: &str) -> GuardResult<bool>;

    async fn srem(&self, key: &str, member: &str) -> GuardResult<bool>;

    async fn smembers(&self, key: &str) -> GuardResult<Vec<String>>;

    /// Runs a named script atomically with respect to every other command.
    async fn eval(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> GuardResult<ScriptReply>;

    async fn ping(&self) -> GuardResult<()>;
}
