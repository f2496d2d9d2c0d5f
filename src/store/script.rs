//! Named server-side scripts.
//!
//! Every multi-step operation that must not interleave with another caller is
//! expressed as one of these scripts. The store runs a script start-to-finish
//! with no other command in between, which is the only atomicity this crate
//! relies on. Each variant documents its `KEYS`/`ARGV` contract and reply shape,
//! and [`StoreScript::check_contract`] enforces the counts before execution.

use crate::error::{GuardError, GuardResult};
use std::fmt;

/// How many keys a script accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArity {
    Exactly(usize),
    AtLeast(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScript {
    /// KEYS[1] = lock key, ARGV[1] = token.
    /// Deletes the key only while it still holds the token. Replies 1 or 0.
    CompareAndDelete,
    /// KEYS[1..n] = lock keys, ARGV[1] = token, ARGV[2] = ttl seconds.
    /// Sets every key NX; on the first held key, deletes the keys set so far.
    /// Replies 1 when all keys were taken, 0 otherwise.
    AcquireAll,
    /// KEYS[1..n] = lock keys, ARGV[1] = token.
    /// Deletes each key whose value equals the token. Replies the count.
    ReleaseAllOwned,
    /// KEYS[1] = counter key, ARGV[1] = delta.
    /// INCRBY only when the key exists. Replies the new value or nil.
    IncrByIfPresent,
    /// KEYS[1] = window key, ARGV[1] = limit, ARGV[2] = window seconds.
    /// Replies {allowed, count, ttl}; a refused hit does not increment.
    FixedWindowHit,
    /// KEYS[1] = key, ARGV[1] = expected value, ARGV[2] = new value.
    /// Overwrites the value keeping the remaining TTL, only while it still
    /// equals the expected value. Replies 1 when swapped, 0 otherwise.
    SwapKeepTtl,
}

impl StoreScript {
    pub const ALL: [StoreScript; 6] = [
        StoreScript::CompareAndDelete,
        StoreScript::AcquireAll,
        StoreScript::ReleaseAllOwned,
        StoreScript::IncrByIfPresent,
        StoreScript::FixedWindowHit,
        StoreScript::SwapKeepTtl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreScript::CompareAndDelete => "compare_and_delete",
            StoreScript::AcquireAll => "acquire_all",
            StoreScript::ReleaseAllOwned => "release_all_owned",
            StoreScript::IncrByIfPresent => "incr_by_if_present",
            StoreScript::FixedWindowHit => "fixed_window_hit",
            StoreScript::SwapKeepTtl => "swap_keep_ttl",
        }
    }

    pub fn key_arity(&self) -> KeyArity {
        match self {
            StoreScript::AcquireAll | StoreScript::ReleaseAllOwned => KeyArity::AtLeast(1),
            _ => KeyArity::Exactly(1),
        }
    }

    pub fn arg_count(&self) -> usize {
        match self {
            StoreScript::AcquireAll | StoreScript::FixedWindowHit | StoreScript::SwapKeepTtl => 2,
            _ => 1,
        }
    }

    pub fn check_contract(&self, keys: &[String], args: &[String]) -> GuardResult<()> {
        let keys_ok = match self.key_arity() {
            KeyArity::Exactly(n) => keys.len() == n,
            KeyArity::AtLeast(n) => keys.len() >= n,
        };
        if !keys_ok {
            return Err(GuardError::Internal(format!(
                "script {} expects {:?} keys, got {}",
                self.name(),
                self.key_arity(),
                keys.len()
            )));
        }
        if args.len() != self.arg_count() {
            return Err(GuardError::Internal(format!(
                "script {} expects {} args, got {}",
                self.name(),
                self.arg_count(),
                args.len()
            )));
        }
        Ok(())
    }

    pub fn source(&self) -> &'static str {
        match self {
            StoreScript::CompareAndDelete => {
                r"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                end
                return 0
                "
            }
            StoreScript::AcquireAll => {
                r"
                for i, key in ipairs(KEYS) do
                    if not redis.call('SET', key, ARGV[1], 'NX', 'EX', ARGV[2]) then
                        for j = 1, i - 1 do
                            redis.call('DEL', KEYS[j])
                        end
                        return 0
                    end
                end
                return 1
                "
            }
            StoreScript::ReleaseAllOwned => {
                r"
                local released = 0
                for _, key in ipairs(KEYS) do
                    if redis.call('GET', key) == ARGV[1] then
                        released = released + redis.call('DEL', key)
                    end
                end
                return released
                "
            }
            StoreScript::IncrByIfPresent => {
                r"
                if redis.call('EXISTS', KEYS[1]) == 0 then
                    return false
                end
                return redis.call('INCRBY', KEYS[1], ARGV[1])
                "
            }
            StoreScript::FixedWindowHit => {
                r"
                local limit = tonumber(ARGV[1])
                local window = tonumber(ARGV[2])
                local current = redis.call('GET', KEYS[1])
                if not current then
                    redis.call('SET', KEYS[1], 1, 'EX', window)
                    return {1, 1, window}
                end
                local ttl = redis.call('TTL', KEYS[1])
                if ttl < 0 then
                    redis.call('EXPIRE', KEYS[1], window)
                    ttl = window
                end
                current = tonumber(current)
                if current >= limit then
                    return {0, current, ttl}
                end
                current = redis.call('INCR', KEYS[1])
                return {1, current, ttl}
                "
            }
            StoreScript::SwapKeepTtl => {
                r"
                if redis.call('GET', KEYS[1]) ~= ARGV[1] then
                    return 0
                end
                local ttl = redis.call('PTTL', KEYS[1])
                if ttl == -2 or ttl == 0 then
                    return 0
                end
                if ttl == -1 then
                    redis.call('SET', KEYS[1], ARGV[2])
                else
                    redis.call('SET', KEYS[1], ARGV[2], 'PX', ttl)
                end
                return 1
                "
            }
        }
    }
}

impl fmt::Display for StoreScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reply of a script, reduced to the shapes the scripts above produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Int(i64),
    Ints(Vec<i64>),
}

impl ScriptReply {
    pub fn expect_int(self, script: StoreScript) -> GuardResult<i64> {
        match self {
            ScriptReply::Int(v) => Ok(v),
            other => Err(GuardError::Store(format!(
                "script {} returned {:?}, expected integer",
                script, other
            ))),
        }
    }

    pub fn expect_optional_int(self, script: StoreScript) -> GuardResult<Option<i64>> {
        match self {
            ScriptReply::Nil => Ok(None),
            ScriptReply::Int(v) => Ok(Some(v)),
            other => Err(GuardError::Store(format!(
                "script {} returned {:?}, expected integer or nil",
                script, other
            ))),
        }
    }

    pub fn expect_ints(self, script: StoreScript, len: usize) -> GuardResult<Vec<i64>> {
        match self {
            ScriptReply::Ints(values) if values.len() == len => Ok(values),
            other => Err(GuardError::Store(format!(
                "script {} returned {:?}, expected {} integers",
                script, other, len
            ))),
        }
    }
}
