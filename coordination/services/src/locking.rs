// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Memory Locking Service
//!
//! Distributed read/write/exclusive locks on named resources, with a
//! priority-ordered wait queue per resource, timeout-based auto-expiry,
//! and a background deadlock-heuristic scanner.
//!
//! ## Lifecycle
//!
//! A request is `queued → granted → held → released`, or `queued →
//! timed-out`. Grants happen either immediately (compatibility check
//! against live locks) or through queue processing, which runs on release,
//! on the expiry sweep, and on every waiter poll. Queue order is priority
//! first, arrival order within a priority — maintained as a store sorted
//! set scored `arrival_seq − rank × stride`.
//!
//! ## Guarantees
//!
//! Grants within one process are serialized through an internal gate; the
//! cross-process story remains best-effort single-key atomicity, matching
//! the rest of the coordination layer. Deadlock handling is detection
//! only: suspiciously long holds are logged and counted, never broken
//! automatically.

use metrics::counter;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use concord_core::domain::keys;
use concord_core::domain::store::{CoordinationStore, StoreError};
use concord_core::{ActiveLock, AgentId, LockId, LockPriority, LockRequest, LockType, ResourceId};

use crate::config::LockingConfig;

/// Spread between priority bands in queue scores. Arrival sequence numbers
/// stay far below this, so priority always dominates ordering.
const PRIORITY_STRIDE: f64 = 1e12;

/// Explicit acquisition failures. Store unavailability is *not* an error
/// here; it degrades to `Ok(None)` like every other coordination call.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock queue full for resource {0}")]
    QueueFull(ResourceId),
}

#[derive(Default)]
struct LockCounters {
    locks_granted: AtomicU64,
    locks_released: AtomicU64,
    locks_expired: AtomicU64,
    locks_timed_out: AtomicU64,
    deadlocks_suspected: AtomicU64,
}

/// Operation counts plus a live census.
#[derive(Debug, Clone, Serialize)]
pub struct LockingStats {
    pub locks_granted: u64,
    pub locks_released: u64,
    pub locks_expired: u64,
    pub locks_timed_out: u64,
    pub deadlocks_suspected: u64,
    pub active_locks: usize,
}

/// Point-in-time view of one lock, as returned by `check_lock_status`.
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    #[serde(flatten)]
    pub lock: ActiveLock,
    pub is_expired: bool,
    pub remaining: Duration,
}

/// Distributed lock manager over the coordination store.
pub struct MemoryLockService {
    store: Arc<dyn CoordinationStore>,
    config: LockingConfig,
    counters: LockCounters,
    /// Serializes grant decisions within this process.
    grant_gate: Mutex<()>,
    shutdown: CancellationToken,
}

impl MemoryLockService {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LockingConfig) -> Self {
        Self {
            store,
            config,
            counters: LockCounters::default(),
            grant_gate: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Acquire a lock, waiting up to `wait_timeout` in the resource's
    /// priority queue when the resource is contended.
    ///
    /// Returns `Ok(None)` on wait-timeout or store failure, and
    /// [`LockError::QueueFull`] when the resource's queue is at capacity.
    /// `timeout` (the hold time) is clamped to the configured maximum.
    #[allow(clippy::too_many_arguments)]
    pub async fn acquire_lock(
        &self,
        agent_id: &AgentId,
        resource_id: &ResourceId,
        lock_type: LockType,
        priority: LockPriority,
        timeout: Duration,
        wait_timeout: Duration,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<LockId>, LockError> {
        let timeout = timeout.min(self.config.max_lock_timeout);
        let request = LockRequest::new(
            agent_id.clone(),
            resource_id.clone(),
            lock_type,
            priority,
            timeout,
            metadata,
        );

        match self.try_grant_immediately(&request).await {
            Ok(Some(lock_id)) => return Ok(Some(lock_id)),
            Ok(None) => {}
            Err(error) => {
                warn!(resource_id = %resource_id, %error, "lock acquisition failed at store");
                return Ok(None);
            }
        }

        if wait_timeout.is_zero() {
            self.counters.locks_timed_out.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.enqueue_and_wait(request, wait_timeout).await
    }

    /// Release a held lock. Fails (with a warning) when the caller is not
    /// the owning agent or the lock is unknown; on success the resource's
    /// queue is re-processed.
    pub async fn release_lock(&self, agent_id: &AgentId, lock_id: LockId) -> bool {
        let Some((key, lock)) = self.find_lock(lock_id).await else {
            return false;
        };
        if lock.agent_id != *agent_id {
            warn!(
                lock_id = %lock_id,
                owner = %lock.agent_id,
                caller = %agent_id,
                "release denied: caller does not own lock"
            );
            return false;
        }
        match self.store.delete(&key).await {
            Ok(_) => {
                self.counters.locks_released.fetch_add(1, Ordering::Relaxed);
                counter!("concord_locks_released_total").increment(1);
                debug!(lock_id = %lock_id, resource_id = %lock.resource_id, "lock released");
                self.process_queue(&lock.resource_id).await;
                true
            }
            Err(error) => {
                warn!(lock_id = %lock_id, %error, "failed to delete lock record");
                false
            }
        }
    }

    pub async fn check_lock_status(&self, lock_id: LockId) -> Option<LockStatus> {
        let (_, lock) = self.find_lock(lock_id).await?;
        Some(LockStatus {
            is_expired: lock.is_expired(),
            remaining: lock.remaining(),
            lock,
        })
    }

    /// Non-expired locks currently held on a resource.
    pub async fn get_resource_locks(&self, resource_id: &ResourceId) -> Vec<ActiveLock> {
        self.live_locks(resource_id).await.unwrap_or_else(|error| {
            warn!(resource_id = %resource_id, %error, "failed to read resource locks");
            Vec::new()
        })
    }

    /// Non-expired locks currently held by an agent, across all resources.
    pub async fn get_agent_locks(&self, agent_id: &AgentId) -> Vec<ActiveLock> {
        match self.all_live_locks().await {
            Ok(locks) => locks
                .into_iter()
                .map(|(_, lock)| lock)
                .filter(|lock| lock.agent_id == *agent_id)
                .collect(),
            Err(error) => {
                warn!(agent_id = %agent_id, %error, "failed to scan agent locks");
                Vec::new()
            }
        }
    }

    /// Release every lock owned by an agent (teardown path). Returns how
    /// many were released.
    pub async fn force_release_agent_locks(&self, agent_id: &AgentId) -> usize {
        let locks = match self.all_live_locks().await {
            Ok(locks) => locks,
            Err(error) => {
                warn!(agent_id = %agent_id, %error, "failed to scan locks for forced release");
                return 0;
            }
        };
        let mut released = 0;
        let mut touched_resources = BTreeSet::new();
        for (key, lock) in locks {
            if lock.agent_id != *agent_id {
                continue;
            }
            if self.store.delete(&key).await.is_ok() {
                released += 1;
                touched_resources.insert(lock.resource_id);
            }
        }
        if released > 0 {
            info!(agent_id = %agent_id, released, "force-released agent locks");
            self.counters
                .locks_released
                .fetch_add(released as u64, Ordering::Relaxed);
        }
        for resource_id in touched_resources {
            self.process_queue(&resource_id).await;
        }
        released
    }

    pub async fn get_locking_stats(&self) -> LockingStats {
        let active_locks = self.all_live_locks().await.map(|l| l.len()).unwrap_or(0);
        LockingStats {
            locks_granted: self.counters.locks_granted.load(Ordering::Relaxed),
            locks_released: self.counters.locks_released.load(Ordering::Relaxed),
            locks_expired: self.counters.locks_expired.load(Ordering::Relaxed),
            locks_timed_out: self.counters.locks_timed_out.load(Ordering::Relaxed),
            deadlocks_suspected: self.counters.deadlocks_suspected.load(Ordering::Relaxed),
            active_locks,
        }
    }

    /// Start the expiry sweep and the deadlock scan as one background task.
    pub fn start_maintenance(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
                deadlock_check_interval_secs = self.config.deadlock_check_interval.as_secs(),
                "starting lock maintenance"
            );
            let mut sweep_tick = interval(self.config.cleanup_interval);
            let mut deadlock_tick = interval(self.config.deadlock_check_interval);
            loop {
                tokio::select! {
                    _ = sweep_tick.tick() => {
                        let swept = self.sweep_expired().await;
                        if swept > 0 {
                            info!(swept, "expired locks swept");
                        }
                    }
                    _ = deadlock_tick.tick() => {
                        self.scan_deadlocks().await;
                    }
                    _ = self.shutdown.cancelled() => {
                        info!("shutdown signal received, stopping lock maintenance");
                        break;
                    }
                }
            }
        })
    }

    /// Delete every lock past its expiry and re-process affected queues.
    pub async fn sweep_expired(&self) -> usize {
        let locks = match self.all_locks().await {
            Ok(locks) => locks,
            Err(error) => {
                warn!(%error, "expiry sweep failed to scan locks");
                return 0;
            }
        };
        let mut swept = 0;
        let mut touched_resources = BTreeSet::new();
        for (key, lock) in locks {
            if lock.is_expired() && self.store.delete(&key).await.is_ok() {
                swept += 1;
                touched_resources.insert(lock.resource_id.clone());
                debug!(lock_id = %lock.lock_id, resource_id = %lock.resource_id, "expired lock deleted");
            }
        }
        if swept > 0 {
            self.counters.locks_expired.fetch_add(swept as u64, Ordering::Relaxed);
            counter!("concord_locks_expired_total").increment(swept as u64);
        }
        for resource_id in touched_resources {
            self.process_queue(&resource_id).await;
        }
        swept
    }

    /// Flag locks that overstayed their own declared expiry without being
    /// released: the holder either crashed or is wedged, since a healthy
    /// holder releases before `expires_at`. Detection only; reclamation is
    /// the expiry sweep's job and no lock is ever broken here.
    pub async fn scan_deadlocks(&self) -> usize {
        let locks = match self.all_locks().await {
            Ok(locks) => locks,
            Err(error) => {
                warn!(%error, "deadlock scan failed");
                return 0;
            }
        };
        let mut suspected = 0;
        for (_, lock) in locks {
            if lock.is_expired() {
                suspected += 1;
                warn!(
                    lock_id = %lock.lock_id,
                    agent_id = %lock.agent_id,
                    resource_id = %lock.resource_id,
                    held_secs = lock.held_for().as_secs(),
                    timeout_secs = (lock.expires_at - lock.acquired_at).num_seconds(),
                    "potential deadlock: lock held past its declared timeout without release"
                );
            }
        }
        if suspected > 0 {
            self.counters
                .deadlocks_suspected
                .fetch_add(suspected as u64, Ordering::Relaxed);
            counter!("concord_deadlocks_suspected_total").increment(suspected as u64);
        }
        suspected
    }

    /// Grant the request now when it is compatible with every live lock on
    /// the resource. Serialized through the in-process grant gate.
    async fn try_grant_immediately(
        &self,
        request: &LockRequest,
    ) -> Result<Option<LockId>, StoreError> {
        let _gate = self.grant_gate.lock().await;
        let held = self.live_locks(&request.resource_id).await?;
        let held_types: Vec<LockType> = held.iter().map(|lock| lock.lock_type).collect();
        if !request.lock_type.compatible_with(&held_types) {
            return Ok(None);
        }
        let lock = self.write_grant(request).await?;
        Ok(Some(lock.lock_id))
    }

    async fn enqueue_and_wait(
        &self,
        request: LockRequest,
        wait_timeout: Duration,
    ) -> Result<Option<LockId>, LockError> {
        let queue_key = keys::lock_queue(&request.resource_id);
        match self.store.sorted_len(&queue_key).await {
            Ok(len) if len >= self.config.queue_max => {
                warn!(
                    resource_id = %request.resource_id,
                    queue_len = len,
                    "lock queue full, rejecting request"
                );
                return Err(LockError::QueueFull(request.resource_id.clone()));
            }
            Ok(_) => {}
            Err(error) => {
                warn!(resource_id = %request.resource_id, %error, "failed to inspect lock queue");
                return Ok(None);
            }
        }

        let member = match serde_json::to_string(&request) {
            Ok(member) => member,
            Err(error) => {
                warn!(resource_id = %request.resource_id, %error, "failed to serialize lock request");
                return Ok(None);
            }
        };
        let seq = match self.store.incr_by(keys::LOCK_SEQ, 1).await {
            Ok(seq) => seq,
            Err(error) => {
                warn!(%error, "failed to advance lock sequence");
                return Ok(None);
            }
        };
        let score = seq as f64 - f64::from(request.priority.rank()) * PRIORITY_STRIDE;
        if let Err(error) = self.store.sorted_add(&queue_key, &member, score).await {
            warn!(resource_id = %request.resource_id, %error, "failed to enqueue lock request");
            return Ok(None);
        }
        debug!(
            resource_id = %request.resource_id,
            request_id = %request.request_id,
            priority = ?request.priority,
            "lock request queued"
        );

        let deadline = tokio::time::Instant::now() + wait_timeout;
        loop {
            self.process_queue(&request.resource_id).await;
            match self.find_granted(&request).await {
                Some(lock_id) => {
                    // Defensive: queue processing removes the member on grant.
                    let _ = self.store.sorted_remove(&queue_key, &member).await;
                    return Ok(Some(lock_id));
                }
                None => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        let _ = self.store.sorted_remove(&queue_key, &member).await;
                        self.counters.locks_timed_out.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            resource_id = %request.resource_id,
                            request_id = %request.request_id,
                            "lock wait timed out"
                        );
                        return Ok(None);
                    }
                    tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
                }
            }
        }
    }

    /// Grant queued waiters in order while they stay compatible: a batch of
    /// reads, or a single write at the head.
    async fn process_queue(&self, resource_id: &ResourceId) {
        let _gate = self.grant_gate.lock().await;
        let queue_key = keys::lock_queue(resource_id);
        let members = match self.store.sorted_range(&queue_key, 0, -1).await {
            Ok(members) => members,
            Err(error) => {
                warn!(resource_id = %resource_id, %error, "failed to read lock queue");
                return;
            }
        };
        if members.is_empty() {
            return;
        }
        let mut held_types: Vec<LockType> = match self.live_locks(resource_id).await {
            Ok(locks) => locks.iter().map(|lock| lock.lock_type).collect(),
            Err(error) => {
                warn!(resource_id = %resource_id, %error, "failed to read live locks");
                return;
            }
        };
        for member in members {
            let Ok(request) = serde_json::from_str::<LockRequest>(&member) else {
                // Unparseable queue entries would wedge the head forever.
                let _ = self.store.sorted_remove(&queue_key, &member).await;
                continue;
            };
            if !request.lock_type.compatible_with(&held_types) {
                break;
            }
            match self.write_grant(&request).await {
                Ok(lock) => {
                    let _ = self.store.sorted_remove(&queue_key, &member).await;
                    held_types.push(lock.lock_type);
                    debug!(
                        resource_id = %resource_id,
                        request_id = %request.request_id,
                        lock_id = %lock.lock_id,
                        "queued lock granted"
                    );
                }
                Err(error) => {
                    warn!(resource_id = %resource_id, %error, "failed to grant queued lock");
                    break;
                }
            }
        }
    }

    async fn write_grant(&self, request: &LockRequest) -> Result<ActiveLock, StoreError> {
        let lock = ActiveLock::grant(request);
        let json = serde_json::to_string(&lock)?;
        let key = keys::active_lock(&lock.resource_id, &lock.lock_id);
        self.store.set_with_ttl(&key, &json, request.timeout).await?;
        self.counters.locks_granted.fetch_add(1, Ordering::Relaxed);
        counter!("concord_locks_granted_total").increment(1);
        Ok(lock)
    }

    /// Look for a live lock on the request's resource that was granted for
    /// this specific request.
    async fn find_granted(&self, request: &LockRequest) -> Option<LockId> {
        let locks = self.live_locks(&request.resource_id).await.ok()?;
        locks
            .into_iter()
            .find(|lock| lock.request_id == request.request_id)
            .map(|lock| lock.lock_id)
    }

    async fn find_lock(&self, lock_id: LockId) -> Option<(String, ActiveLock)> {
        let suffix = format!(":{lock_id}");
        let locks = self.all_locks().await.ok()?;
        locks
            .into_iter()
            .find(|(key, _)| key.ends_with(&suffix))
    }

    async fn live_locks(&self, resource_id: &ResourceId) -> Result<Vec<ActiveLock>, StoreError> {
        let prefix = keys::resource_locks(resource_id);
        let keys = self.store.scan_prefix(&prefix).await?;
        let mut locks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(json) = self.store.get(&key).await? {
                if let Ok(lock) = serde_json::from_str::<ActiveLock>(&json) {
                    // Resource ids may contain colons, so the prefix scan
                    // over-matches nested ids ("doc" also hits "doc:42");
                    // the record's own resource_id is authoritative.
                    if lock.resource_id == *resource_id && !lock.is_expired() {
                        locks.push(lock);
                    }
                }
            }
        }
        Ok(locks)
    }

    async fn all_locks(&self) -> Result<Vec<(String, ActiveLock)>, StoreError> {
        let keys = self.store.scan_prefix(keys::LOCK_PREFIX).await?;
        let mut locks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(json) = self.store.get(&key).await? {
                if let Ok(lock) = serde_json::from_str::<ActiveLock>(&json) {
                    locks.push((key, lock));
                }
            }
        }
        Ok(locks)
    }

    async fn all_live_locks(&self) -> Result<Vec<(String, ActiveLock)>, StoreError> {
        Ok(self
            .all_locks()
            .await?
            .into_iter()
            .filter(|(_, lock)| !lock.is_expired())
            .collect())
    }
}
