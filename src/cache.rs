//! Exact-match response cache.
//!
//! Keyed by a canonical SHA-256 of the request shape, stored in the shared
//! KV with a per-entry TTL. A KV failure on `get` is a miss, never an error;
//! `set` and `delete` are best-effort.

use crate::domain::Message;
use crate::kv::KvStore;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Default entry TTL in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

pub struct ExactCache {
    kv: Arc<dyn KvStore>,
    default_ttl: u64,
}

impl ExactCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            default_ttl: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl = ttl_seconds;
        self
    }

    /// Derive the cache key for a request.
    ///
    /// Canonical JSON of `{model, messages, temperature, max_tokens}` with
    /// sorted keys (serde_json's default object ordering) and stable UTF-8,
    /// hashed with SHA-256. Identical request shapes always produce
    /// byte-equal keys.
    pub fn generate_key(
        model: &str,
        messages: &[Message],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> String {
        let messages_value = if messages.is_empty() {
            serde_json::Value::Null
        } else {
            json!(messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>())
        };
        let canonical = json!({
            "model": model,
            "messages": messages_value,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("llm:{:x}", digest)
    }

    /// Fetch a cached payload. Missing keys, undecodable entries, and KV
    /// failures all read as a miss.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let raw = match self.kv.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache get failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "cached entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Store a payload. Best-effort: failures are logged, not propagated.
    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl_seconds: Option<u64>) {
        let ttl = ttl_seconds.unwrap_or(self.default_ttl);
        if let Err(err) = self.kv.set_ex(key, &value.to_string(), ttl).await {
            tracing::warn!(key, error = %err, "cache set failed");
        }
    }

    /// Evict an entry. Best-effort.
    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.kv.delete(key).await {
            tracing::warn!(key, error = %err, "cache delete failed");
        }
    }
}
