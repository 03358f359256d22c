// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! Identity and liveness record for an agent participating in coordination.
//!
//! ## Invariants
//!
//! - Every live [`AgentInfo`] has at least one entry in the capability index
//!   and, if `session_id` is set, one entry in the session index. Both
//!   indices are denormalized; the registry keeps them consistent with the
//!   primary record on every mutation.
//! - An agent whose `last_heartbeat` is older than the configured heartbeat
//!   timeout is considered gone, even before its record physically expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::context::SessionId;

/// Caller-supplied (or facade-generated) agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Generate a fresh agent id for callers that do not supply one.
    pub fn generate() -> Self {
        Self(format!("agent-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Liveness/activity state reported with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Busy,
    Disconnected,
    Error,
}

/// A single declared capability of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapability {
    /// Capability name (index key), e.g. `"python_coding"`.
    pub name: String,

    /// Capability version string.
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Open parameter schema/defaults for the capability.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl AgentCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: None,
            parameters: serde_json::Map::new(),
        }
    }
}

/// Primary registry record for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub name: String,
    pub status: AgentStatus,

    /// Ordered list of declared capabilities.
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,

    /// Last liveness signal, refreshed by `update_heartbeat`.
    pub last_heartbeat: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentInfo {
    pub fn new(
        agent_id: AgentId,
        name: impl Into<String>,
        capabilities: Vec<AgentCapability>,
        session_id: Option<SessionId>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            agent_id,
            name: name.into(),
            status: AgentStatus::Active,
            capabilities,
            last_heartbeat: Utc::now(),
            session_id,
            metadata,
        }
    }

    /// Refresh the heartbeat timestamp, optionally transitioning status.
    pub fn touch(&mut self, status: Option<AgentStatus>) {
        self.last_heartbeat = Utc::now();
        if let Some(status) = status {
            self.status = status;
        }
    }

    /// True when the heartbeat is older than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let cutoff = Utc::now() - ChronoDuration::seconds(timeout.as_secs() as i64);
        self.last_heartbeat < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_agent_is_not_stale() {
        let info = AgentInfo::new(
            AgentId::from("a1"),
            "worker",
            vec![AgentCapability::new("python_coding")],
            None,
            serde_json::Map::new(),
        );
        assert!(!info.is_stale(Duration::from_secs(60)));
        assert_eq!(info.status, AgentStatus::Active);
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let mut info = AgentInfo::new(
            AgentId::from("a1"),
            "worker",
            vec![],
            None,
            serde_json::Map::new(),
        );
        info.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        assert!(info.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn touch_refreshes_heartbeat_and_status() {
        let mut info = AgentInfo::new(
            AgentId::from("a1"),
            "worker",
            vec![],
            None,
            serde_json::Map::new(),
        );
        info.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        info.touch(Some(AgentStatus::Busy));
        assert!(!info.is_stale(Duration::from_secs(60)));
        assert_eq!(info.status, AgentStatus::Busy);
    }

    #[test]
    fn agent_info_round_trips_through_json() {
        let info = AgentInfo::new(
            AgentId::from("a1"),
            "worker",
            vec![AgentCapability::new("search")],
            Some(SessionId::from("s1")),
            serde_json::Map::new(),
        );
        let json = serde_json::to_string(&info).unwrap();
        let back: AgentInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.agent_id, info.agent_id);
        assert_eq!(back.name, info.name);
        assert_eq!(back.capabilities, info.capabilities);
        assert_eq!(back.session_id, info.session_id);
    }
}
