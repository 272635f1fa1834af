//! Shared KV store abstraction.
//!
//! The exact cache, rate limiter, and judge recorder all talk to the same
//! key-value store through [`KvStore`]. Production uses [`RedisKv`] over a
//! pooled connection manager; [`MemoryKv`] is a process-local stand-in for
//! tests and development without a Redis instance.
//!
//! Key layout:
//! - `llm:<hex>` - exact cache entries
//! - `rate:<identifier>` - sliding-window sorted sets
//! - `judge:result:<request_id>` - judge results
//! - `judge:total_evaluations`, `judge:failed_evaluations` - counters

use crate::error::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Uniform interface over the shared KV store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a string value, `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment an integer key, returning the new value.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Sliding-window admission: prune entries scored at or below
    /// `window_start`, then append `now` and refresh the TTL if fewer than
    /// `max` remain. Atomic per key. Returns whether the caller was admitted.
    async fn window_admit(
        &self,
        key: &str,
        window_start: f64,
        max: u32,
        now: f64,
        ttl_seconds: u64,
    ) -> Result<bool>;

    /// Count of window entries in `(window_start, now]` after pruning.
    async fn window_count(&self, key: &str, window_start: f64, now: f64) -> Result<u32>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Drop every key in the store's keyspace.
    async fn flush_all(&self) -> Result<()>;
}

/// Lua admission script. Runs the prune/count/append sequence as one atomic
/// unit per identifier; the naive four-command version races under
/// concurrent callers.
const WINDOW_ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[2]) then
    redis.call('ZADD', KEYS[1], ARGV[3], ARGV[3])
    redis.call('EXPIRE', KEYS[1], ARGV[4])
    return 1
end
return 0
"#;

/// Redis-backed [`KvStore`] over a pooled, auto-reconnecting connection
/// manager. Cloning the manager is cheap; each operation clones it.
pub struct RedisKv {
    manager: ConnectionManager,
    admit_script: redis::Script,
}

impl RedisKv {
    /// Connect to Redis, failing if the server is unreachable within
    /// `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(format!("redis://{}:{}/", host, port))?;
        let manager = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                crate::error::GatewayError::Other(format!(
                    "timed out connecting to redis at {}:{}",
                    host, port
                ))
            })??;
        Ok(Self {
            manager,
            admit_script: redis::Script::new(WINDOW_ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        Ok(con.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.del(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut con = self.manager.clone();
        Ok(con.incr(key, 1i64).await?)
    }

    async fn window_admit(
        &self,
        key: &str,
        window_start: f64,
        max: u32,
        now: f64,
        ttl_seconds: u64,
    ) -> Result<bool> {
        let mut con = self.manager.clone();
        let admitted: i64 = self
            .admit_script
            .key(key)
            .arg(window_start)
            .arg(max)
            .arg(now)
            .arg(ttl_seconds)
            .invoke_async(&mut con)
            .await?;
        Ok(admitted == 1)
    }

    async fn window_count(&self, key: &str, window_start: f64, now: f64) -> Result<u32> {
        let mut con = self.manager.clone();
        let _: () = con.zrembyscore(key, 0f64, window_start).await?;
        Ok(con.zcount(key, window_start, now).await?)
    }

    async fn ping(&self) -> Result<()> {
        let mut con = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB").query_async(&mut con).await?;
        Ok(())
    }
}

/// Process-local [`KvStore`] with the same semantics as the Redis
/// implementation (TTL expiry, atomic window admission). Not durable; for
/// tests and development only.
#[derive(Default)]
pub struct MemoryKv {
    strings: Mutex<HashMap<String, (String, Option<Instant>)>>,
    windows: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut strings = self.strings.lock().expect("kv lock poisoned");
        match strings.get(key) {
            Some((_, Some(expiry))) if *expiry <= Instant::now() => {
                strings.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let expiry = Instant::now() + Duration::from_secs(ttl_seconds);
        self.strings
            .lock()
            .expect("kv lock poisoned")
            .insert(key.to_string(), (value.to_string(), Some(expiry)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.strings.lock().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut strings = self.strings.lock().expect("kv lock poisoned");
        let current = strings
            .get(key)
            .and_then(|(value, _)| value.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        strings.insert(key.to_string(), (next.to_string(), None));
        Ok(next)
    }

    async fn window_admit(
        &self,
        key: &str,
        window_start: f64,
        max: u32,
        now: f64,
        _ttl_seconds: u64,
    ) -> Result<bool> {
        let mut windows = self.windows.lock().expect("kv lock poisoned");
        let entries = windows.entry(key.to_string()).or_default();
        entries.retain(|&ts| ts > window_start);
        if entries.len() < max as usize {
            entries.push(now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn window_count(&self, key: &str, window_start: f64, now: f64) -> Result<u32> {
        let mut windows = self.windows.lock().expect("kv lock poisoned");
        let entries = windows.entry(key.to_string()).or_default();
        entries.retain(|&ts| ts > window_start);
        Ok(entries.iter().filter(|&&ts| ts <= now).count() as u32)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        self.strings.lock().expect("kv lock poisoned").clear();
        self.windows.lock().expect("kv lock poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set_delete() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("a").await.unwrap(), None);
        kv.set_ex("a", "1", 60).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1", 0).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_incr() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("count").await.unwrap(), 1);
        assert_eq!(kv.incr("count").await.unwrap(), 2);
        assert_eq!(kv.get("count").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_memory_window_admit_caps() {
        let kv = MemoryKv::new();
        let now = 100.0;
        for i in 0..3 {
            assert!(kv
                .window_admit("rate:c", now - 60.0, 3, now + i as f64, 60)
                .await
                .unwrap());
        }
        assert!(!kv
            .window_admit("rate:c", now - 60.0, 3, now + 3.0, 60)
            .await
            .unwrap());
        assert_eq!(kv.window_count("rate:c", now - 60.0, now + 3.0).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_memory_window_prunes_old_entries() {
        let kv = MemoryKv::new();
        assert!(kv.window_admit("rate:c", 40.0, 1, 50.0, 60).await.unwrap());
        assert!(!kv.window_admit("rate:c", 40.0, 1, 55.0, 60).await.unwrap());
        // Entry at 50.0 falls out of the window once window_start passes it.
        assert!(kv.window_admit("rate:c", 51.0, 1, 120.0, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_flush_all() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1", 60).await.unwrap();
        kv.window_admit("rate:c", 0.0, 5, 1.0, 60).await.unwrap();
        kv.flush_all().await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert_eq!(kv.window_count("rate:c", 0.0, 2.0).await.unwrap(), 0);
    }
}
