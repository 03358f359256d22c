// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Tunables for the coordination services.
//!
//! Defaults follow the operational envelope the services are designed for:
//! 60s heartbeats with a 2× record TTL grace, 30s maintenance sweeps, 24h
//! session lifetime, 1h hard ceiling on lock hold time.

use std::time::Duration;

/// Agent registry tunables.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// An agent whose heartbeat is older than this is considered gone.
    pub heartbeat_timeout: Duration,

    /// How often the background reaper deregisters stale agents.
    pub cleanup_interval: Duration,
}

impl RegistryConfig {
    /// TTL for primary records and index sets: twice the heartbeat timeout,
    /// so the store itself reaps anything the reaper misses.
    pub fn record_ttl(&self) -> Duration {
        self.heartbeat_timeout * 2
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Session context tunables.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Lifetime of an active session context record.
    pub context_ttl: Duration,

    /// Grace TTL applied when the last participant leaves.
    pub drained_ttl: Duration,

    /// Maximum events kept in the per-session event log.
    pub event_log_cap: usize,

    /// Retention window for the event log key.
    pub event_retention: Duration,

    /// Maximum entries in the recent-updates list used by pollers.
    pub updates_cap: usize,

    /// TTL of the per-session update lock; bounds how long a crashed
    /// holder can stall shared-memory writes.
    pub update_lock_ttl: Duration,

    /// Buffered capacity of each per-session broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_ttl: Duration::from_secs(24 * 60 * 60),
            drained_ttl: Duration::from_secs(60),
            event_log_cap: 100,
            event_retention: Duration::from_secs(60 * 60),
            updates_cap: 50,
            update_lock_ttl: Duration::from_secs(5 * 60),
            event_channel_capacity: 256,
        }
    }
}

/// Memory locking tunables.
#[derive(Debug, Clone)]
pub struct LockingConfig {
    /// How often the expiry sweep deletes dead locks.
    pub cleanup_interval: Duration,

    /// How often the deadlock heuristic scans held locks.
    pub deadlock_check_interval: Duration,

    /// Hard ceiling on requested lock hold time; requests are clamped.
    pub max_lock_timeout: Duration,

    /// Maximum waiters per resource queue; beyond this, acquisition is
    /// rejected with an explicit error.
    pub queue_max: usize,

    /// Re-check cadence for waiters in the queue.
    pub poll_interval: Duration,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(30),
            deadlock_check_interval: Duration::from_secs(60),
            max_lock_timeout: Duration::from_secs(60 * 60),
            queue_max: 1000,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Orchestration facade tunables.
#[derive(Debug, Clone)]
pub struct FacadeConfig {
    /// Hold timeout for locks taken on the tool-execution path.
    pub tool_lock_timeout: Duration,

    /// How long a tool call waits for a contended lock before failing.
    pub tool_lock_wait: Duration,

    /// TTL for cached tool results.
    pub cache_ttl: Duration,

    /// Local LRU capacity of the chunk buffer.
    pub chunk_buffer_capacity: usize,

    /// TTL for chunk records in the store tier.
    pub chunk_ttl: Duration,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            tool_lock_timeout: Duration::from_secs(5 * 60),
            tool_lock_wait: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(10 * 60),
            chunk_buffer_capacity: 256,
            chunk_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Aggregate configuration for the whole coordination layer.
#[derive(Debug, Clone, Default)]
pub struct CoordinationConfig {
    pub registry: RegistryConfig,
    pub context: ContextConfig,
    pub locking: LockingConfig,
    pub facade: FacadeConfig,
}
