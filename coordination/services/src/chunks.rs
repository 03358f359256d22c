// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Two-tier chunk buffer for large tool payloads.
//!
//! Tier one is a process-local LRU; tier two is the coordination store with
//! a TTL, shared across the fleet. Reads fall through local → store →
//! optional [`ChunkLoader`], backfilling the faster tiers on the way out.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use concord_core::domain::keys;
use concord_core::domain::store::CoordinationStore;

/// One buffered chunk of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkContent {
    pub chunk_id: String,
    pub content: Value,
    /// Open descriptor: producing tool, part index, anything the producer
    /// wants to carry along.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ChunkContent {
    pub fn new(chunk_id: impl Into<String>, content: Value) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            content,
            metadata: Map::new(),
        }
    }
}

/// Fallback source for chunks absent from both buffer tiers, typically a
/// re-invocation of the producing tool. Internals are the caller's business.
#[async_trait]
pub trait ChunkLoader: Send + Sync {
    async fn load(&self, chunk_id: &str) -> Option<ChunkContent>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkBufferStats {
    pub local_hits: u64,
    pub store_hits: u64,
    pub loader_hits: u64,
    pub misses: u64,
    pub local_entries: usize,
}

/// Fleet-shared buffer for oversized tool output.
pub struct ChunkBuffer {
    store: Arc<dyn CoordinationStore>,
    local: Mutex<LruCache<String, ChunkContent>>,
    loader: Option<Arc<dyn ChunkLoader>>,
    ttl: Duration,
    local_hits: AtomicU64,
    store_hits: AtomicU64,
    loader_hits: AtomicU64,
    misses: AtomicU64,
}

impl ChunkBuffer {
    pub fn new(store: Arc<dyn CoordinationStore>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            local: Mutex::new(LruCache::new(capacity)),
            loader: None,
            ttl,
            local_hits: AtomicU64::new(0),
            store_hits: AtomicU64::new(0),
            loader_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ChunkLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Write a chunk to both tiers.
    pub async fn put(&self, chunk: ChunkContent) {
        let key = keys::chunk(&chunk.chunk_id);
        match serde_json::to_string(&chunk) {
            Ok(json) => {
                if let Err(error) = self.store.set_with_ttl(&key, &json, self.ttl).await {
                    warn!(chunk_id = %chunk.chunk_id, %error, "chunk store write failed");
                }
            }
            Err(error) => {
                warn!(chunk_id = %chunk.chunk_id, %error, "failed to serialize chunk");
            }
        }
        self.local.lock().put(chunk.chunk_id.clone(), chunk);
    }

    /// Read a chunk, falling through local → store → loader. Hits from the
    /// slower tiers backfill the faster ones.
    pub async fn get(&self, chunk_id: &str) -> Option<ChunkContent> {
        if let Some(chunk) = self.local.lock().get(chunk_id).cloned() {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(chunk);
        }

        match self.store.get(&keys::chunk(chunk_id)).await {
            Ok(Some(json)) => match serde_json::from_str::<ChunkContent>(&json) {
                Ok(chunk) => {
                    self.store_hits.fetch_add(1, Ordering::Relaxed);
                    self.local.lock().put(chunk_id.to_string(), chunk.clone());
                    return Some(chunk);
                }
                Err(error) => {
                    warn!(chunk_id, %error, "discarding unreadable chunk record");
                    let _ = self.store.delete(&keys::chunk(chunk_id)).await;
                }
            },
            Ok(None) => {}
            Err(error) => {
                warn!(chunk_id, %error, "chunk store read failed");
            }
        }

        if let Some(loader) = &self.loader {
            if let Some(chunk) = loader.load(chunk_id).await {
                self.loader_hits.fetch_add(1, Ordering::Relaxed);
                debug!(chunk_id, "chunk reloaded from source, backfilling buffer");
                self.put(chunk.clone()).await;
                return Some(chunk);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Drop a chunk from both tiers.
    pub async fn evict(&self, chunk_id: &str) -> bool {
        self.local.lock().pop(chunk_id);
        match self.store.delete(&keys::chunk(chunk_id)).await {
            Ok(existed) => existed,
            Err(error) => {
                warn!(chunk_id, %error, "chunk delete failed");
                false
            }
        }
    }

    pub fn stats(&self) -> ChunkBufferStats {
        ChunkBufferStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            loader_hits: self.loader_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            local_entries: self.local.lock().len(),
        }
    }
}
