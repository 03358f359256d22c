// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Session Context Aggregate
//!
//! Per-session collaborative state shared between agents, plus the
//! append-only event records that describe how it changed.
//!
//! ## Invariants
//!
//! - [`SharedContext::version`] starts at 1 and strictly increases on every
//!   successful join, leave, or shared-memory update. Consumers compare
//!   versions to detect staleness.
//! - Events carry the context version at the time they were emitted; the
//!   per-session event log is capped and retention-expired, never rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Caller-supplied session identifier grouping cooperating agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Shared mutable state for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedContext {
    pub session_id: SessionId,

    /// Agents currently joined to the session.
    #[serde(default)]
    pub participants: BTreeSet<AgentId>,

    /// Open key/value map collaboratively written by participants.
    #[serde(default)]
    pub shared_memory: Map<String, Value>,

    /// Monotonic version counter, starts at 1.
    pub version: u64,

    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SharedContext {
    pub fn new(session_id: SessionId, initial_memory: Map<String, Value>, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            participants: BTreeSet::new(),
            shared_memory: initial_memory,
            version: 1,
            last_updated: now,
            created_at: now,
            metadata,
        }
    }

    /// Advance the version counter and refresh `last_updated`.
    pub fn bump(&mut self) {
        self.version += 1;
        self.last_updated = Utc::now();
    }
}

/// How an update is folded into [`SharedContext::shared_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Shallow-merge top-level keys, updates win.
    Merge,
    /// Overwrite the whole map.
    Replace,
    /// Extend list-valued keys; a non-list existing value is first wrapped
    /// into a single-element list. Other keys merge.
    Append,
}

impl MergeStrategy {
    /// Apply `updates` to `memory` under this strategy.
    pub fn apply(self, memory: &mut Map<String, Value>, updates: Map<String, Value>) {
        match self {
            MergeStrategy::Replace => {
                *memory = updates;
            }
            MergeStrategy::Merge => {
                for (key, value) in updates {
                    memory.insert(key, value);
                }
            }
            MergeStrategy::Append => {
                for (key, value) in updates {
                    match memory.get_mut(&key) {
                        Some(Value::Array(existing)) => match value {
                            Value::Array(items) => existing.extend(items),
                            other => existing.push(other),
                        },
                        Some(existing) => {
                            let mut items = vec![existing.take()];
                            match value {
                                Value::Array(new_items) => items.extend(new_items),
                                other => items.push(other),
                            }
                            memory.insert(key, Value::Array(items));
                        }
                        None => {
                            memory.insert(key, value);
                        }
                    }
                }
            }
        }
    }
}

/// Kind of change recorded in the session event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventType {
    MemoryUpdate,
    ToolExecution,
    AgentJoin,
    AgentLeave,
    ResourceLock,
    ResourceUnlock,
    SessionStateChange,
}

impl ContextEventType {
    /// Whether events of this kind accompany a context version bump.
    /// Observational events (tool runs, lock transitions) are stamped with
    /// the version current at emission time and may share it with the
    /// preceding bumping event.
    pub fn bumps_version(self) -> bool {
        matches!(
            self,
            ContextEventType::MemoryUpdate
                | ContextEventType::AgentJoin
                | ContextEventType::AgentLeave
        )
    }
}

/// Append-only audit/notification record for one session change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,
    /// Originating agent.
    pub agent_id: AgentId,
    pub event_type: ContextEventType,
    pub timestamp: DateTime<Utc>,
    /// Open payload describing the change.
    #[serde(default)]
    pub data: Value,
    /// Context version at the time the event was emitted.
    pub version: u64,
}

impl ContextEvent {
    pub fn new(
        session_id: SessionId,
        agent_id: AgentId,
        event_type: ContextEventType,
        data: Value,
        version: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            agent_id,
            event_type,
            timestamp: Utc::now(),
            data,
            version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn new_context_starts_at_version_one() {
        let ctx = SharedContext::new(SessionId::from("s1"), Map::new(), Map::new());
        assert_eq!(ctx.version, 1);
        assert!(ctx.participants.is_empty());
    }

    #[test]
    fn bump_strictly_increases_version() {
        let mut ctx = SharedContext::new(SessionId::from("s1"), Map::new(), Map::new());
        ctx.bump();
        ctx.bump();
        assert_eq!(ctx.version, 3);
    }

    #[test]
    fn merge_overwrites_top_level_keys_only() {
        let mut memory = map(json!({"a": 1, "b": {"x": 1}}));
        MergeStrategy::Merge.apply(&mut memory, map(json!({"b": 2, "c": 3})));
        assert_eq!(memory.get("a"), Some(&json!(1)));
        assert_eq!(memory.get("b"), Some(&json!(2)));
        assert_eq!(memory.get("c"), Some(&json!(3)));
    }

    #[test]
    fn replace_discards_previous_memory() {
        let mut memory = map(json!({"a": 1}));
        MergeStrategy::Replace.apply(&mut memory, map(json!({"b": 2})));
        assert!(memory.get("a").is_none());
        assert_eq!(memory.get("b"), Some(&json!(2)));
    }

    #[test]
    fn append_extends_existing_lists() {
        let mut memory = map(json!({"log": ["a"]}));
        MergeStrategy::Append.apply(&mut memory, map(json!({"log": ["b", "c"]})));
        assert_eq!(memory.get("log"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn append_wraps_non_list_values() {
        let mut memory = map(json!({"log": "a"}));
        MergeStrategy::Append.apply(&mut memory, map(json!({"log": "b"})));
        assert_eq!(memory.get("log"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn append_inserts_missing_keys() {
        let mut memory = Map::new();
        MergeStrategy::Append.apply(&mut memory, map(json!({"log": "a"})));
        assert_eq!(memory.get("log"), Some(&json!("a")));
    }
}
