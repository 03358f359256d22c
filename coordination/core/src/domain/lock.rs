// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Lock Aggregates
//!
//! Mutual-exclusion primitives for named resources.
//!
//! ## Invariants
//!
//! - For a given resource, the simultaneously active locks are either any
//!   number of `Read` locks or exactly one `Write`/`Exclusive` lock, never
//!   a mix.
//! - An [`ActiveLock`] belongs exclusively to the agent that acquired it;
//!   only that agent may release it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Opaque identifier for the thing being locked (memory key, document id, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a granted lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockId(pub Uuid);

impl LockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sharing mode of a lock. `Exclusive` is treated identically to `Write`
/// for compatibility purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
    Exclusive,
}

impl LockType {
    /// Whether a request of this type may be granted alongside `held`.
    pub fn compatible_with(self, held: &[LockType]) -> bool {
        match self {
            LockType::Read => held.iter().all(|t| *t == LockType::Read),
            LockType::Write | LockType::Exclusive => held.is_empty(),
        }
    }
}

/// Queue ordering for waiting lock requests. Higher priority dequeues
/// first; ties preserve arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl LockPriority {
    pub fn rank(self) -> u8 {
        match self {
            LockPriority::Low => 0,
            LockPriority::Normal => 1,
            LockPriority::High => 2,
            LockPriority::Critical => 3,
        }
    }
}

/// A not-yet-granted lock acquisition attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub request_id: Uuid,
    pub agent_id: AgentId,
    pub resource_id: ResourceId,
    pub lock_type: LockType,
    pub priority: LockPriority,
    pub requested_at: DateTime<Utc>,
    /// How long the lock will be held once granted.
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LockRequest {
    pub fn new(
        agent_id: AgentId,
        resource_id: ResourceId,
        lock_type: LockType,
        priority: LockPriority,
        timeout: Duration,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            agent_id,
            resource_id,
            lock_type,
            priority,
            requested_at: Utc::now(),
            timeout,
            metadata,
        }
    }
}

/// A granted, TTL-bounded lock on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLock {
    pub lock_id: LockId,
    pub agent_id: AgentId,
    pub resource_id: ResourceId,
    pub lock_type: LockType,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub request_id: Uuid,
}

impl ActiveLock {
    /// Grant `request` now, holding for `request.timeout`.
    pub fn grant(request: &LockRequest) -> Self {
        let now = Utc::now();
        Self {
            lock_id: LockId::new(),
            agent_id: request.agent_id.clone(),
            resource_id: request.resource_id.clone(),
            lock_type: request.lock_type,
            acquired_at: now,
            expires_at: now + ChronoDuration::seconds(request.timeout.as_secs() as i64),
            request_id: request.request_id,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Remaining hold time, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    /// How long the lock has been held so far.
    pub fn held_for(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }
}
