// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Store Contract
//!
//! Persistence contract for all cross-agent shared state, following the
//! repository doctrine: the interface lives in the domain layer, concrete
//! backends live in `crate::infrastructure`.
//!
//! The store exposes only single-key atomic primitives (conditional set,
//! atomic increment, set add/remove, sorted-set insert, list push/trim,
//! expiry). Multi-key sequences built on top of it are *not* transactional;
//! services accept eventual consistency and rely on per-key TTLs to reap
//! orphaned state.
//!
//! | Implementation | Backend | Use |
//! |----------------|---------|-----|
//! | `MemoryStore` | process-local map | development, testing |
//! | (external) | remote data-structure server | production |

use async_trait::async_trait;
use std::time::Duration;

/// Errors surfaced by store backends.
///
/// Services catch these at their boundary and degrade to `false`/`None`/
/// empty results; store failures never propagate past a service method.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("wrong value type at key: {key}")]
    WrongType { key: String },
}

/// Async contract over a remote key-value/data-structure store.
///
/// Range arguments on list/sorted-set operations are inclusive indices;
/// negative values count from the end (`-1` is the last element).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    // -- strings ---------------------------------------------------------

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set with expiry; overwrites value and TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Conditional set: writes only when the key is absent. Returns whether
    /// the write happened. Used for short-TTL update locks.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Conditional delete: removes the key only when its current value
    /// equals `expected`. The safe-release primitive for update locks.
    async fn delete_if_value(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    // -- counters --------------------------------------------------------

    /// Atomic increment; a missing key starts at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    // -- unordered sets --------------------------------------------------

    /// Returns whether the member was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Returns whether the member was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn set_len(&self, key: &str) -> Result<usize, StoreError>;

    // -- sorted sets -----------------------------------------------------

    /// Insert or update a member's score.
    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Members ordered by ascending score (ties: lexicographic member).
    async fn sorted_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    async fn sorted_len(&self, key: &str) -> Result<usize, StoreError>;

    // -- lists -----------------------------------------------------------

    /// Push to the head; returns the new length.
    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    /// Keep only the inclusive index range.
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError>;

    async fn list_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    // -- expiry & discovery ----------------------------------------------

    /// Refresh a key's TTL; returns whether the key exists.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining TTL, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// All live keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
