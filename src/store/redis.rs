use super::{KeyValueStore, ScriptReply, StoreScript};
use crate::error::{GuardError, GuardResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Networked store backed by a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    scripts: HashMap<StoreScript, Script>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> GuardResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            GuardError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let conn = ConnectionManager::new(client).await?;

        let scripts = StoreScript::ALL
            .iter()
            .map(|script| (*script, Script::new(script.source())))
            .collect();

        Ok(Self { conn, scripts })
    }
}

fn script_reply(value: Value, script: StoreScript) -> GuardResult<ScriptReply> {
    match value {
        Value::Nil => Ok(ScriptReply::Nil),
        Value::Int(v) => Ok(ScriptReply::Int(v)),
        Value::Bulk(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Int(v) => Ok(v),
                other => Err(GuardError::Store(format!(
                    "script {} returned non-integer element {:?}",
                    script, other
                ))),
            })
            .collect::<GuardResult<Vec<i64>>>()
            .map(ScriptReply::Ints),
        other => Err(GuardError::Store(format!(
            "script {} returned unexpected reply {:?}",
            script, other
        ))),
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GuardResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GuardResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> GuardResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> GuardResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> GuardResult<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn ttl(&self, key: &str) -> GuardResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = conn.pttl(key).await?;
        // -2: missing, -1: no expiry
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> GuardResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> GuardResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> GuardResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn eval(
        &self,
        script: StoreScript,
        keys: &[String],
        args: &[String],
    ) -> GuardResult<ScriptReply> {
        script.check_contract(keys, args)?;

        let compiled = self
            .scripts
            .get(&script)
            .ok_or_else(|| GuardError::Internal(format!("script {} not loaded", script)))?;

        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut conn = self.conn.clone();
        let value: Value = invocation.invoke_async(&mut conn).await?;
        debug!(script = %script, keys = keys.len(), "Script executed");

        script_reply(value, script)
    }

    async fn ping(&self) -> GuardResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_reply_conversion() {
        assert_eq!(
            script_reply(Value::Int(3), StoreScript::ReleaseAllOwned).unwrap(),
            ScriptReply::Int(3)
        );
        assert_eq!(
            script_reply(Value::Nil, StoreScript::IncrByIfPresent).unwrap(),
            ScriptReply::Nil
        );
        assert_eq!(
            script_reply(
                Value::Bulk(vec![Value::Int(1), Value::Int(2), Value::Int(60)]),
                StoreScript::FixedWindowHit
            )
            .unwrap(),
            ScriptReply::Ints(vec![1, 2, 60])
        );
        assert!(script_reply(Value::Okay, StoreScript::AcquireAll).is_err());
    }

    #[tokio::test]
    #[ignore] // needs a running Redis
    async fn test_redis_compare_and_delete() {
        let store = RedisStore::connect("redis://127.0.0.1:6379").await.unwrap();
        store.set("lock:it-cad", "mine", Some(Duration::from_secs(10))).await.unwrap();

        let keys = vec!["lock:it-cad".to_string()];
        let wrong = store
            .eval(StoreScript::CompareAndDelete, &keys, &["theirs".to_string()])
            .await
            .unwrap();
        assert_eq!(wrong, ScriptReply::Int(0));

        let right = store
            .eval(StoreScript::CompareAndDelete, &keys, &["mine".to_string()])
            .await
            .unwrap();
        assert_eq!(right, ScriptReply::Int(1));
    }
}
