use super::{KeyValueStore, ScriptReply, StoreScript};
use crate::error::{GuardError, GuardResult};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Members(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn text(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: Stored::Text(value.to_string()),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process store for tests and single-node runs.
///
/// One mutex guards the whole keyspace and every script runs while holding it,
/// which gives the same no-interleaving guarantee a Redis script has. Expired
/// entries are evicted lazily on access. Time comes from `tokio::time`, so a
/// paused test runtime can fast-forward TTLs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

struct Keyspace<'a> {
    entries: MutexGuard<'a, HashMap<String, Entry>>,
    now: Instant,
}

impl Keyspace<'_> {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now;
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn get_text(&mut self, key: &str) -> GuardResult<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { value: Stored::Text(v), .. }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set_text(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        self.entries.insert(key.to_string(), Entry::text(value, ttl));
    }

    fn set_nx(&mut self, key: &str, value: &str, ttl: Duration) -> bool {
        if self.live(key).is_some() {
            return false;
        }
        self.set_text(key, value, Some(ttl));
        true
    }

    fn del(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> GuardResult<i64> {
        match self.live(key) {
            None => {
                self.set_text(key, &delta.to_string(), None);
                Ok(delta)
            }
            Some(Entry { value: Stored::Text(v), .. }) => {
                let current: i64 = v.parse().map_err(|_| {
                    GuardError::Store(format!("value at {} is not an integer", key))
                })?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| GuardError::Store(format!("increment overflow at {}", key)))?;
                *v = next.to_string();
                Ok(next)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn remaining(&mut self, key: &str) -> Option<Option<Duration>> {
        let now = self.now;
        self.live(key)
            .map(|entry| entry.expires_at.map(|at| at.saturating_duration_since(now)))
    }

    fn run(&mut self, script: StoreScript, keys: &[String], args: &[String]) -> GuardResult<ScriptReply> {
        match script {
            StoreScript::CompareAndDelete => {
                let owned = self.get_text(&keys[0])?.as_deref() == Some(args[0].as_str());
                Ok(ScriptReply::Int(i64::from(owned && self.del(&keys[0]))))
            }
            StoreScript::AcquireAll => {
                let ttl = Duration::from_secs(parse_arg(script, &args[1])?);
                for (i, key) in keys.iter().enumerate() {
                    if !self.set_nx(key, &args[0], ttl) {
                        for taken in &keys[..i] {
                            self.del(taken);
                        }
                        return Ok(ScriptReply::Int(0));
                    }
                }
                Ok(ScriptReply::Int(1))
            }
            StoreScript::ReleaseAllOwned => {
                let mut released = 0;
                for key in keys {
                    if self.get_text(key)?.as_deref() == Some(args[0].as_str()) && self.del(key) {
                        released += 1;
                    }
                }
                Ok(ScriptReply::Int(released))
            }
            StoreScript::IncrByIfPresent => {
                if self.live(&keys[0]).is_none() {
                    return Ok(ScriptReply::Nil);
                }
                let delta: i64 = parse_arg(script, &args[0])?;
                self.incr_by(&keys[0], delta).map(ScriptReply::Int)
            }
            StoreScript::FixedWindowHit => {
                let limit: i64 = parse_arg(script, &args[0])?;
                let window: u64 = parse_arg(script, &args[1])?;
                let key = &keys[0];
                let current = match self.get_text(key)? {
                    None => {
                        self.set_text(key, "1", Some(Duration::from_secs(window)));
                        return Ok(ScriptReply::Ints(vec![1, 1, window as i64]));
                    }
                    Some(v) => v.parse::<i64>().map_err(|_| {
                        GuardError::Store(format!("value at {} is not an integer", key))
                    })?,
                };
                let ttl = match self.remaining(key).flatten() {
                    Some(left) => left.as_secs() as i64,
                    None => {
                        let deadline = self.now + Duration::from_secs(window);
                        if let Some(entry) = self.live(key) {
                            entry.expires_at = Some(deadline);
                        }
                        window as i64
                    }
                };
                if current >= limit {
                    return Ok(ScriptReply::Ints(vec![0, current, ttl]));
                }
                let next = self.incr_by(key, 1)?;
                Ok(ScriptReply::Ints(vec![1, next, ttl]))
            }
            StoreScript::SwapKeepTtl => {
                if self.get_text(&keys[0])?.as_deref() != Some(args[0].as_str()) {
                    return Ok(ScriptReply::Int(0));
                }
                match self.live(&keys[0]) {
                    None => Ok(ScriptReply::Int(0)),
                    Some(entry) => {
                        entry.value = Stored::Text(args[1].clone());
                        Ok(ScriptReply::Int(1))
                    }
                }
            }
        }
    }
}

fn wrong_type(key: &str) -> GuardError {
    GuardError::Store(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

fn parse_arg<T: std::str::FromStr>(script: StoreScript, raw: &str) -> GuardResult<T> {
    raw.parse()
        .map_err(|_| GuardError::Store(format!("script {} got malformed argument {:?}", script, raw)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn keyspace(&self) -> GuardResult<Keyspace<'_>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| GuardError::Internal("Failed to acquire keyspace lock".into()))?;
        Ok(Keyspace {
            entries,
            now: Instant::now(),
        })
    }

    /// Number of live keys.
    pub fn len(&self) -> GuardResult<usize> {
        let mut space = self.keyspace()?;
        let now = space.now;
        space.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(space.entries.len())
    }

    pub fn is_empty(&self) -> GuardResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        self.keyspace()?.get_text(key)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GuardResult<()> {
        self.keyspace()?.set_text(key, value, ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GuardResult<bool> {
        Ok(self.keyspace()?.set_nx(key, value, ttl))
    }

    async fn del(&self, key: &str) -> GuardResult<bool> {
        Ok(self.keyspace()?.del(key))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> GuardResult<i64> {
        self.keyspace()?.incr_by(key, delta)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> GuardResult<bool> {
        let mut space = self.keyspace()?;
        let now = space.now;
        Ok(match space.live(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        })
    }

    async fn ttl(&self, key: &str) -> GuardResult<Option<Duration>> {
        Ok(self.keyspace()?.remaining(key).flatten())
    }

    async fn sadd(&self, key: &str, member: &str) -> GuardResult<bool> {
        let mut space = self.keyspace()?;
        match space.live(key) {
            None => {
                let members = BTreeSet::from([member.to_string()]);
                space.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Stored::Members(members),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
            Some(Entry { value: Stored::Members(members), .. }) => {
                Ok(members.insert(member.to_string()))
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> GuardResult<bool> {
        let mut space = self.keyspace()?;
        let (removed, now_empty) = match space.live(key) {
            None => return Ok(false),
            Some(Entry { value: Stored::Members(members), .. }) => {
                (members.remove(member), members.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        // Redis drops a set once its last member is gone.
        if now_empty {
            space.entries.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> GuardResult<Vec<String>> {
        let mut space = self.keyspace()?;
        match space.live(key) {
            None => Ok(Vec::new()),
            Some(Entry { value: Stored::Members(members), .. }) => {
                Ok(members.iter().cloned().collect())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn eval(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> GuardResult<ScriptReply> {
        script.check_contract(keys, args)?;
        self.keyspace()?.run(script, keys, args)
    }

    async fn ping(&self) -> GuardResult<()> {
        self.keyspace().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_respects_existing_key() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_nx("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_acquire_all_rolls_back() {
        let store = MemoryStore::new();
        store.set("b", "other", None).await.unwrap();

        let reply = store
            .eval(
                StoreScript::AcquireAll,
                &keys(&["a", "b", "c"]),
                &keys(&["tok", "30"]),
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Int(0));
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("c").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some("other".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_swap_keep_ttl_keeps_deadline() {
        let store = MemoryStore::new();
        store.set("k", "one", Some(Duration::from_secs(10))).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        let reply = store
            .eval(StoreScript::SwapKeepTtl, &keys(&["k"]), &keys(&["one", "two"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Int(1));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        let gone = store
            .eval(StoreScript::SwapKeepTtl, &keys(&["k"]), &keys(&["two", "three"]))
            .await
            .unwrap();
        assert_eq!(gone, ScriptReply::Int(0));
    }

    #[tokio::test]
    async fn test_swap_keep_ttl_refuses_stale_expectation() {
        let store = MemoryStore::new();
        store.set("k", "two", None).await.unwrap();

        let reply = store
            .eval(StoreScript::SwapKeepTtl, &keys(&["k"]), &keys(&["one", "three"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Int(0));
        assert_eq!(store.get("k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "r1").await.unwrap());
        assert!(!store.sadd("s", "r1").await.unwrap());
        assert!(store.sadd("s", "r2").await.unwrap());
        assert_eq!(store.smembers("s").await.unwrap(), keys(&["r1", "r2"]));

        assert!(store.srem("s", "r1").await.unwrap());
        assert!(store.srem("s", "r2").await.unwrap());
        assert!(store.smembers("s").await.unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.sadd("s", "x").await.unwrap();
        assert!(matches!(store.get("s").await, Err(GuardError::Store(_))));
        assert!(matches!(store.incr_by("s", 1).await, Err(GuardError::Store(_))));
    }
}
