// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Composite key layout for the coordination store.
//!
//! The single place that owns key-naming conventions. The layout is an
//! implementation detail, not a compatibility surface; every family has a
//! scan prefix so services can enumerate their own records.

use crate::domain::agent::AgentId;
use crate::domain::context::SessionId;
use crate::domain::lock::{LockId, ResourceId};

/// Scan prefix for primary agent records.
pub const AGENT_PREFIX: &str = "agents:active:";

/// Global arrival-sequence counter for lock queueing.
pub const LOCK_SEQ: &str = "locks:seq";

/// Scan prefix for all active lock records.
pub const LOCK_PREFIX: &str = "locks:active:";

pub fn agent_record(agent_id: &AgentId) -> String {
    format!("{AGENT_PREFIX}{agent_id}")
}

pub fn capability_index(capability: &str) -> String {
    format!("agents:capability:{capability}")
}

pub fn session_agents(session_id: &SessionId) -> String {
    format!("agents:session:{session_id}")
}

pub fn session_context(session_id: &SessionId) -> String {
    format!("context:session:{session_id}")
}

/// Capped, retention-expired event log for one session.
pub fn session_events(session_id: &SessionId) -> String {
    format!("context:events:{session_id}")
}

/// Capped recent-updates list consumed by cross-process pollers.
pub fn session_updates(session_id: &SessionId) -> String {
    format!("context:updates:{session_id}")
}

/// Short-TTL conditional-set key guarding shared-memory read-modify-write.
pub fn session_update_lock(session_id: &SessionId) -> String {
    format!("context:update_lock:{session_id}")
}

pub fn active_lock(resource_id: &ResourceId, lock_id: &LockId) -> String {
    format!("{LOCK_PREFIX}{resource_id}:{lock_id}")
}

/// Scan prefix for all locks on one resource. Resource ids may themselves
/// contain colons, so this prefix over-matches nested ids (`doc` also
/// matches `doc:42` keys); scanners must filter by the lock record's
/// `resource_id` field.
pub fn resource_locks(resource_id: &ResourceId) -> String {
    format!("{LOCK_PREFIX}{resource_id}:")
}

/// Priority-ordered wait queue (sorted set) for one resource.
pub fn lock_queue(resource_id: &ResourceId) -> String {
    format!("locks:queue:{resource_id}")
}

pub fn tool_cache(digest: &str) -> String {
    format!("cache:tool:{digest}")
}

pub fn chunk(chunk_id: &str) -> String {
    format!("chunks:{chunk_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_record_lands_under_scan_prefix() {
        let key = agent_record(&AgentId::from("a1"));
        assert!(key.starts_with(AGENT_PREFIX));
        assert_eq!(key, "agents:active:a1");
    }

    #[test]
    fn lock_keys_nest_under_resource_prefix() {
        let resource = ResourceId::from("doc:42");
        let lock_id = LockId::new();
        let key = active_lock(&resource, &lock_id);
        assert!(key.starts_with(&resource_locks(&resource)));
        assert!(key.starts_with(LOCK_PREFIX));
    }
}
