// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Shared tool-result cache.
//!
//! Results are keyed by a digest of the tool name plus its canonicalized
//! parameters, so identical invocations from different agents share one
//! entry. Storage is the coordination store with a per-entry TTL; there is
//! no local tier, every agent in the fleet sees the same cache.

use metrics::counter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use concord_core::domain::keys;
use concord_core::domain::store::CoordinationStore;

/// Hit/miss accounting for one cache instance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Store-backed cache for expensive, deterministic tool invocations.
pub struct ToolResultCache {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl ToolResultCache {
    pub fn new(store: Arc<dyn CoordinationStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Cache key digest: sha256 over the tool name and the parameters in
    /// canonical (sorted-key) JSON form, truncated to 32 hex chars.
    pub fn cache_key(tool_name: &str, params: &serde_json::Map<String, serde_json::Value>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(b"\0");
        // Map iterates in key order, so equal params always digest equally.
        for (key, value) in params {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"\0");
        }
        let digest = hasher.finalize();
        hex_prefix(&digest, 32)
    }

    pub async fn get(
        &self,
        tool_name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let key = keys::tool_cache(&Self::cache_key(tool_name, params));
        match self.store.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    counter!("concord_tool_cache_hits_total").increment(1);
                    debug!(tool_name, "tool cache hit");
                    Some(value)
                }
                Err(error) => {
                    warn!(tool_name, %error, "discarding unreadable cache entry");
                    let _ = self.store.delete(&key).await;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("concord_tool_cache_misses_total").increment(1);
                None
            }
            Err(error) => {
                warn!(tool_name, %error, "tool cache read failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(
        &self,
        tool_name: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        result: &serde_json::Value,
    ) {
        let key = keys::tool_cache(&Self::cache_key(tool_name, params));
        let json = match serde_json::to_string(result) {
            Ok(json) => json,
            Err(error) => {
                warn!(tool_name, %error, "failed to serialize tool result for caching");
                return;
            }
        };
        match self.store.set_with_ttl(&key, &json, self.ttl).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                warn!(tool_name, %error, "tool cache write failed");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::infrastructure::MemoryStore;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn round_trip_and_stats() {
        let cache = ToolResultCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let p = params(&[("query", json!("rust locks"))]);

        assert!(cache.get("search", &p).await.is_none());
        cache.put("search", &p, &json!({"results": [1, 2, 3]})).await;
        assert_eq!(
            cache.get("search", &p).await,
            Some(json!({"results": [1, 2, 3]}))
        );

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn key_ignores_parameter_order() {
        let a = params(&[("a", json!(1)), ("b", json!(2))]);
        let b = params(&[("b", json!(2)), ("a", json!(1))]);
        assert_eq!(
            ToolResultCache::cache_key("t", &a),
            ToolResultCache::cache_key("t", &b)
        );
    }

    #[tokio::test]
    async fn key_separates_tools_and_params() {
        let p = params(&[("q", json!("x"))]);
        let q = params(&[("q", json!("y"))]);
        assert_ne!(
            ToolResultCache::cache_key("t1", &p),
            ToolResultCache::cache_key("t2", &p)
        );
        assert_ne!(
            ToolResultCache::cache_key("t1", &p),
            ToolResultCache::cache_key("t1", &q)
        );
    }

    #[tokio::test]
    async fn entries_expire_with_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = ToolResultCache::new(store, Duration::from_millis(20));
        let p = params(&[("q", json!("x"))]);
        cache.put("t", &p, &json!(42)).await;
        assert_eq!(cache.get("t", &p).await, Some(json!(42)));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("t", &p).await.is_none());
    }
}
