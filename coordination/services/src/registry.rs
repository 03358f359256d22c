// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Registry
//!
//! Tracks which agents are alive, their declared capabilities, and their
//! session membership. Liveness is heartbeat-based: records carry a TTL of
//! twice the heartbeat timeout, and a background reaper deregisters agents
//! whose heartbeat lapsed before the TTL fired.
//!
//! ## Failure Semantics
//!
//! Every store interaction is caught at this boundary; a failure degrades a
//! single call to `false`/`None`/empty rather than crashing the service.
//! Registration's three writes (primary record, capability index, session
//! index) are not transactional; stale index entries self-expire.

use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use concord_core::domain::keys;
use concord_core::domain::store::CoordinationStore;
use concord_core::{AgentCapability, AgentId, AgentInfo, AgentStatus, SessionId};

use crate::config::RegistryConfig;

#[derive(Default)]
struct RegistryCounters {
    agents_registered: AtomicU64,
    agents_deregistered: AtomicU64,
    agents_reaped: AtomicU64,
}

/// Best-effort operation counts plus a live-agent census.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub agents_registered: u64,
    pub agents_deregistered: u64,
    pub agents_reaped: u64,
    pub active_agents: usize,
}

/// Heartbeat-based agent registry over the coordination store.
pub struct AgentRegistry {
    store: Arc<dyn CoordinationStore>,
    config: RegistryConfig,
    counters: RegistryCounters,
    shutdown: CancellationToken,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            counters: RegistryCounters::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Write the agent's primary record and its capability/session index
    /// entries, all with TTL refresh. Fails closed on store errors.
    pub async fn register_agent(
        &self,
        agent_id: AgentId,
        name: &str,
        capabilities: Vec<AgentCapability>,
        session_id: Option<SessionId>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let info = AgentInfo::new(agent_id.clone(), name, capabilities, session_id, metadata);
        if !self.persist(&info).await {
            return false;
        }
        self.counters.agents_registered.fetch_add(1, Ordering::Relaxed);
        counter!("concord_agents_registered_total").increment(1);
        debug!(agent_id = %agent_id, name, "agent registered");
        true
    }

    /// Remove the agent's index entries and primary record. Returns `false`
    /// when the agent is unknown.
    pub async fn deregister_agent(&self, agent_id: &AgentId) -> bool {
        let Some(info) = self.get_agent_info(agent_id).await else {
            return false;
        };
        for capability in &info.capabilities {
            let key = keys::capability_index(&capability.name);
            if let Err(error) = self.store.set_remove(&key, agent_id.as_str()).await {
                warn!(agent_id = %agent_id, %error, "failed to remove capability index entry");
            }
        }
        if let Some(session_id) = &info.session_id {
            let key = keys::session_agents(session_id);
            if let Err(error) = self.store.set_remove(&key, agent_id.as_str()).await {
                warn!(agent_id = %agent_id, %error, "failed to remove session index entry");
            }
        }
        match self.store.delete(&keys::agent_record(agent_id)).await {
            Ok(_) => {
                self.counters.agents_deregistered.fetch_add(1, Ordering::Relaxed);
                counter!("concord_agents_deregistered_total").increment(1);
                debug!(agent_id = %agent_id, "agent deregistered");
                true
            }
            Err(error) => {
                warn!(agent_id = %agent_id, %error, "failed to delete agent record");
                false
            }
        }
    }

    /// Refresh the heartbeat timestamp (and optionally status), re-writing
    /// the record and index entries with fresh TTLs. `false` when the agent
    /// is unknown.
    pub async fn update_heartbeat(&self, agent_id: &AgentId, status: Option<AgentStatus>) -> bool {
        let Some(mut info) = self.get_agent_info(agent_id).await else {
            return false;
        };
        info.touch(status);
        self.persist(&info).await
    }

    pub async fn get_agent_info(&self, agent_id: &AgentId) -> Option<AgentInfo> {
        let key = keys::agent_record(agent_id);
        match self.store.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(info) => Some(info),
                Err(error) => {
                    warn!(agent_id = %agent_id, %error, "corrupt agent record");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(agent_id = %agent_id, %error, "failed to read agent record");
                None
            }
        }
    }

    /// All agents with a fresh heartbeat. Staleness is filtered here as
    /// defense-in-depth even though the record TTL should already have
    /// expired dead entries.
    pub async fn get_active_agents(&self) -> Vec<AgentInfo> {
        let keys = match self.store.scan_prefix(keys::AGENT_PREFIX).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%error, "failed to scan agent records");
                return Vec::new();
            }
        };
        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            let Ok(Some(json)) = self.store.get(&key).await else {
                continue;
            };
            match serde_json::from_str::<AgentInfo>(&json) {
                Ok(info) if !info.is_stale(self.config.heartbeat_timeout) => agents.push(info),
                Ok(_) => {}
                Err(error) => warn!(key, %error, "corrupt agent record skipped"),
            }
        }
        agents
    }

    /// Capability-index lookup, then per-id fetch with liveness filter.
    pub async fn find_agents_by_capability(&self, capability: &str) -> Vec<AgentInfo> {
        let members = match self.store.set_members(&keys::capability_index(capability)).await {
            Ok(members) => members,
            Err(error) => {
                warn!(capability, %error, "failed to read capability index");
                return Vec::new();
            }
        };
        self.fetch_live(members).await
    }

    pub async fn get_session_agents(&self, session_id: &SessionId) -> Vec<AgentInfo> {
        let members = match self.store.set_members(&keys::session_agents(session_id)).await {
            Ok(members) => members,
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to read session index");
                return Vec::new();
            }
        };
        self.fetch_live(members).await
    }

    pub async fn get_registry_stats(&self) -> RegistryStats {
        RegistryStats {
            agents_registered: self.counters.agents_registered.load(Ordering::Relaxed),
            agents_deregistered: self.counters.agents_deregistered.load(Ordering::Relaxed),
            agents_reaped: self.counters.agents_reaped.load(Ordering::Relaxed),
            active_agents: self.get_active_agents().await.len(),
        }
    }

    /// Start the background reaper that deregisters agents whose heartbeat
    /// lapsed, belt-and-suspenders next to record TTLs.
    pub fn start_reaper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
                "starting agent reaper"
            );
            let mut tick = interval(self.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let reaped = self.reap_cycle().await;
                        if reaped > 0 {
                            info!(reaped, "reaped stale agents");
                        }
                    }
                    _ = self.shutdown.cancelled() => {
                        info!("shutdown signal received, stopping agent reaper");
                        break;
                    }
                }
            }
        })
    }

    /// One reaper pass; returns how many agents were deregistered.
    pub async fn reap_cycle(&self) -> usize {
        let keys = match self.store.scan_prefix(keys::AGENT_PREFIX).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(%error, "reaper failed to scan agent records");
                return 0;
            }
        };
        let mut reaped = 0;
        for key in keys {
            let Ok(Some(json)) = self.store.get(&key).await else {
                continue;
            };
            let Ok(info) = serde_json::from_str::<AgentInfo>(&json) else {
                continue;
            };
            if info.is_stale(self.config.heartbeat_timeout) && self.deregister_agent(&info.agent_id).await {
                self.counters.agents_reaped.fetch_add(1, Ordering::Relaxed);
                counter!("concord_agents_reaped_total").increment(1);
                reaped += 1;
            }
        }
        reaped
    }

    async fn persist(&self, info: &AgentInfo) -> bool {
        let json = match serde_json::to_string(info) {
            Ok(json) => json,
            Err(error) => {
                warn!(agent_id = %info.agent_id, %error, "failed to serialize agent record");
                return false;
            }
        };
        let ttl = self.config.record_ttl();
        if let Err(error) = self
            .store
            .set_with_ttl(&keys::agent_record(&info.agent_id), &json, ttl)
            .await
        {
            warn!(agent_id = %info.agent_id, %error, "failed to write agent record");
            return false;
        }
        for capability in &info.capabilities {
            let key = keys::capability_index(&capability.name);
            if let Err(error) = self.store.set_add(&key, info.agent_id.as_str()).await {
                warn!(agent_id = %info.agent_id, %error, "failed to index capability");
                continue;
            }
            let _ = self.store.expire(&key, ttl).await;
        }
        if let Some(session_id) = &info.session_id {
            let key = keys::session_agents(session_id);
            if let Err(error) = self.store.set_add(&key, info.agent_id.as_str()).await {
                warn!(agent_id = %info.agent_id, %error, "failed to index session membership");
            } else {
                let _ = self.store.expire(&key, ttl).await;
            }
        }
        true
    }

    async fn fetch_live(&self, ids: Vec<String>) -> Vec<AgentInfo> {
        let mut agents = Vec::with_capacity(ids.len());
        for id in ids {
            let agent_id = AgentId::from(id);
            if let Some(info) = self.get_agent_info(&agent_id).await {
                if !info.is_stale(self.config.heartbeat_timeout) {
                    agents.push(info);
                }
            }
        }
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use concord_core::infrastructure::MemoryStore;
    use std::time::Duration;

    fn registry() -> AgentRegistry {
        AgentRegistry::new(Arc::new(MemoryStore::new()), RegistryConfig::default())
    }

    fn caps(names: &[&str]) -> Vec<AgentCapability> {
        names.iter().map(|n| AgentCapability::new(*n)).collect()
    }

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = registry();
        assert!(
            registry
                .register_agent(
                    AgentId::from("a1"),
                    "worker",
                    caps(&["python_coding"]),
                    None,
                    serde_json::Map::new(),
                )
                .await
        );
        let info = registry.get_agent_info(&AgentId::from("a1")).await.unwrap();
        assert_eq!(info.agent_id, AgentId::from("a1"));
        assert_eq!(info.name, "worker");
        assert_eq!(info.capabilities, caps(&["python_coding"]));
    }

    #[tokio::test]
    async fn capability_lookup_finds_exactly_registered_agents() {
        let registry = registry();
        registry
            .register_agent(
                AgentId::from("a1"),
                "worker",
                caps(&["python_coding"]),
                None,
                serde_json::Map::new(),
            )
            .await;
        registry
            .register_agent(
                AgentId::from("a2"),
                "searcher",
                caps(&["search"]),
                None,
                serde_json::Map::new(),
            )
            .await;

        let found = registry.find_agents_by_capability("python_coding").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].agent_id, AgentId::from("a1"));
        assert!(registry.find_agents_by_capability("juggling").await.is_empty());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = registry();
        registry
            .register_agent(
                AgentId::from("a1"),
                "worker",
                caps(&["search"]),
                Some(SessionId::from("s1")),
                serde_json::Map::new(),
            )
            .await;
        assert!(registry.deregister_agent(&AgentId::from("a1")).await);
        assert!(!registry.deregister_agent(&AgentId::from("a1")).await);
        assert!(registry.get_agent_info(&AgentId::from("a1")).await.is_none());
        assert!(registry.find_agents_by_capability("search").await.is_empty());
    }

    #[tokio::test]
    async fn heartbeat_update_refreshes_status() {
        let registry = registry();
        registry
            .register_agent(AgentId::from("a1"), "worker", vec![], None, serde_json::Map::new())
            .await;
        assert!(
            registry
                .update_heartbeat(&AgentId::from("a1"), Some(AgentStatus::Busy))
                .await
        );
        let info = registry.get_agent_info(&AgentId::from("a1")).await.unwrap();
        assert_eq!(info.status, AgentStatus::Busy);

        assert!(!registry.update_heartbeat(&AgentId::from("missing"), None).await);
    }

    #[tokio::test]
    async fn stale_agents_are_excluded_and_reaped() {
        let store = Arc::new(MemoryStore::new());
        let registry = AgentRegistry::new(
            store.clone(),
            RegistryConfig {
                heartbeat_timeout: Duration::from_secs(60),
                cleanup_interval: Duration::from_secs(30),
            },
        );
        registry
            .register_agent(
                AgentId::from("a1"),
                "worker",
                caps(&["search"]),
                None,
                serde_json::Map::new(),
            )
            .await;

        // Age the heartbeat past the timeout without touching the TTL.
        let key = keys::agent_record(&AgentId::from("a1"));
        let mut info: AgentInfo =
            serde_json::from_str(&store.get(&key).await.unwrap().unwrap()).unwrap();
        info.last_heartbeat = Utc::now() - ChronoDuration::seconds(120);
        store
            .set(&key, &serde_json::to_string(&info).unwrap())
            .await
            .unwrap();

        assert!(registry.get_active_agents().await.is_empty());
        assert!(registry.find_agents_by_capability("search").await.is_empty());

        assert_eq!(registry.reap_cycle().await, 1);
        assert!(registry.get_agent_info(&AgentId::from("a1")).await.is_none());

        let stats = registry.get_registry_stats().await;
        assert_eq!(stats.agents_reaped, 1);
        assert_eq!(stats.active_agents, 0);
    }

    #[tokio::test]
    async fn session_index_tracks_membership() {
        let registry = registry();
        registry
            .register_agent(
                AgentId::from("a1"),
                "worker",
                vec![],
                Some(SessionId::from("s1")),
                serde_json::Map::new(),
            )
            .await;
        registry
            .register_agent(AgentId::from("a2"), "loner", vec![], None, serde_json::Map::new())
            .await;

        let members = registry.get_session_agents(&SessionId::from("s1")).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].agent_id, AgentId::from("a1"));
    }
}
