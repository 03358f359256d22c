// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestration Facade
//!
//! Single entry point composing the registry, context coordinator, lock
//! service, tool-result cache, and chunk buffer. The headline operation is
//! [`Orchestrator::execute_tool_with_coordination`]: look up the tool's
//! policy, serve from cache when allowed, take the resource lock when
//! required, invoke, publish, release.
//!
//! Locks taken on the tool path are released through a drop guard, so a
//! panicking or cancelled invocation still frees the resource. The agent's
//! registry record is the single source of session membership; the facade
//! keeps no shadow state of its own.

use dashmap::DashMap;
use futures::future::BoxFuture;
use metrics::counter;
use scopeguard::ScopeGuard;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use concord_core::domain::store::CoordinationStore;
use concord_core::{
    AgentCapability, AgentId, AgentInfo, AgentStatus, ContextEventType, LockId, LockPriority,
    LockType, MergeStrategy, ResourceId, SessionId, SharedContext,
};

use crate::cache::{CacheStats, ToolResultCache};
use crate::chunks::{ChunkBuffer, ChunkBufferStats};
use crate::config::CoordinationConfig;
use crate::context::{ContextCoordinator, ContextStats};
use crate::locking::{LockError, LockingStats, MemoryLockService};
use crate::registry::{AgentRegistry, RegistryStats};

/// Parameter names that identify the contended resource, probed in order
/// when a tool does not receive an explicit `resource_id`.
const RESOURCE_HINT_PARAMS: &[&str] = &["query", "file_name", "doc_id", "key"];

/// A tool implementation handed to the facade per invocation. `Sync` suits
/// cheap pure functions; anything that awaits goes through `Async`.
#[derive(Clone)]
pub enum ToolFunction {
    Sync(Arc<dyn Fn(Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>),
    Async(Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>),
}

impl ToolFunction {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn asynchronous<F>(f: F) -> Self
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync + 'static,
    {
        Self::Async(Arc::new(f))
    }

    async fn invoke(&self, params: Map<String, Value>) -> anyhow::Result<Value> {
        match self {
            ToolFunction::Sync(f) => f(params),
            ToolFunction::Async(f) => f(params).await,
        }
    }
}

/// Coordination requirements for one tool name, set via
/// [`Orchestrator::set_tool_policy`]. Unregistered tools get the default:
/// no lock, no caching, no result sharing.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    /// Whether invocations must hold a lock on the derived resource.
    pub requires_lock: bool,

    /// Sharing mode of that lock.
    pub lock_type: LockType,

    /// Whether results may be served from and written to the shared cache.
    pub cache_result: bool,

    /// Whether successful results are mirrored into the session's shared
    /// memory for other participants.
    pub share_result: bool,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            requires_lock: false,
            lock_type: LockType::Write,
            cache_result: false,
            share_result: false,
        }
    }
}

impl ToolPolicy {
    pub fn locked(lock_type: LockType) -> Self {
        Self {
            requires_lock: true,
            lock_type,
            ..Self::default()
        }
    }

    pub fn cached(mut self) -> Self {
        self.cache_result = true;
        self
    }

    pub fn shared(mut self) -> Self {
        self.share_result = true;
        self
    }
}

/// Failures surfaced by coordinated tool execution. Infrastructure
/// degradation is absorbed upstream; only these two reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("resource {resource_id} busy, tool {tool_name} could not acquire its lock")]
    ResourceBusy {
        tool_name: String,
        resource_id: ResourceId,
    },

    #[error("tool {tool_name} failed: {source}")]
    ToolFailed {
        tool_name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Aggregated snapshot across every composed service.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationStatus {
    pub registry: RegistryStats,
    pub context: ContextStats,
    pub locking: LockingStats,
    pub cache: CacheStats,
    pub chunks: ChunkBufferStats,
    pub tool_policies: usize,
}

/// Composition root for the coordination layer.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    context: Arc<ContextCoordinator>,
    locks: Arc<MemoryLockService>,
    cache: ToolResultCache,
    chunks: ChunkBuffer,
    config: CoordinationConfig,
    policies: DashMap<String, ToolPolicy>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinationConfig) -> Self {
        Self {
            registry: Arc::new(AgentRegistry::new(store.clone(), config.registry.clone())),
            context: Arc::new(ContextCoordinator::new(store.clone(), config.context.clone())),
            locks: Arc::new(MemoryLockService::new(store.clone(), config.locking.clone())),
            cache: ToolResultCache::new(store.clone(), config.facade.cache_ttl),
            chunks: ChunkBuffer::new(
                store,
                config.facade.chunk_buffer_capacity,
                config.facade.chunk_ttl,
            ),
            config,
            policies: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<ContextCoordinator> {
        &self.context
    }

    pub fn locks(&self) -> &Arc<MemoryLockService> {
        &self.locks
    }

    pub fn chunks(&self) -> &ChunkBuffer {
        &self.chunks
    }

    /// Register a new agent with a generated id, joining its session when
    /// one is given. `None` when registration could not be persisted.
    pub async fn register_agent(
        &self,
        name: &str,
        capabilities: Vec<AgentCapability>,
        session_id: Option<SessionId>,
        metadata: Map<String, Value>,
    ) -> Option<AgentId> {
        let agent_id = AgentId::generate();
        if !self
            .registry
            .register_agent(
                agent_id.clone(),
                name,
                capabilities,
                session_id.clone(),
                metadata,
            )
            .await
        {
            return None;
        }
        if let Some(session_id) = &session_id {
            self.context.join_session(session_id, &agent_id).await;
        }
        Some(agent_id)
    }

    /// Heartbeat passthrough to the registry.
    pub async fn update_heartbeat(&self, agent_id: &AgentId, status: Option<AgentStatus>) -> bool {
        self.registry.update_heartbeat(agent_id, status).await
    }

    /// Set (or replace) the coordination policy for a tool name.
    pub fn set_tool_policy(&self, tool_name: &str, policy: ToolPolicy) {
        debug!(
            tool_name,
            requires_lock = policy.requires_lock,
            cache_result = policy.cache_result,
            share_result = policy.share_result,
            "tool policy set"
        );
        self.policies.insert(tool_name.to_string(), policy);
    }

    /// Execute a tool under its declared coordination policy: cache probe
    /// for cacheable tools, resource locking for lock-requiring ones, event
    /// publication into the agent's session.
    ///
    /// Only the tool's own failure propagates; lock-path degradation maps
    /// to [`OrchestrationError::ResourceBusy`].
    pub async fn execute_tool_with_coordination(
        &self,
        agent_id: &AgentId,
        tool_name: &str,
        tool: &ToolFunction,
        params: Map<String, Value>,
    ) -> Result<Value, OrchestrationError> {
        let policy = self
            .policies
            .get(tool_name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let session_id = self
            .registry
            .get_agent_info(agent_id)
            .await
            .and_then(|info| info.session_id);

        if policy.cache_result {
            if let Some(result) = self.cache.get(tool_name, &params).await {
                return Ok(result);
            }
        }

        let lock = if policy.requires_lock {
            let resource_id = derive_resource_id(tool_name, &params);
            let lock_id = self
                .acquire_tool_lock(agent_id, &resource_id, policy.lock_type, tool_name)
                .await?;
            if let Some(session_id) = &session_id {
                self.context
                    .publish_event(
                        session_id,
                        agent_id,
                        ContextEventType::ResourceLock,
                        json!({ "resource_id": resource_id, "tool": tool_name }),
                    )
                    .await;
            }
            Some((resource_id, lock_id))
        } else {
            None
        };

        // Released via drop guard; a panicking or cancelled invocation must
        // not leave the resource locked for its full TTL.
        let release_guard = lock.map(|(resource_id, lock_id)| {
            let locks = self.locks.clone();
            let agent = agent_id.clone();
            scopeguard::guard((resource_id, lock_id), move |(resource_id, lock_id)| {
                warn!(resource_id = %resource_id, "tool invocation interrupted, releasing lock from guard");
                tokio::spawn(async move {
                    locks.release_lock(&agent, lock_id).await;
                });
            })
        });

        let result = tool.invoke(params.clone()).await;
        counter!("concord_tool_executions_total").increment(1);

        if let Some(guard) = release_guard {
            let (resource_id, lock_id) = ScopeGuard::into_inner(guard);
            self.locks.release_lock(agent_id, lock_id).await;
            if let Some(session_id) = &session_id {
                self.context
                    .publish_event(
                        session_id,
                        agent_id,
                        ContextEventType::ResourceUnlock,
                        json!({ "resource_id": resource_id, "tool": tool_name }),
                    )
                    .await;
            }
        }

        match result {
            Ok(value) => {
                if policy.cache_result {
                    self.cache.put(tool_name, &params, &value).await;
                }
                if let Some(session_id) = &session_id {
                    self.context
                        .publish_event(
                            session_id,
                            agent_id,
                            ContextEventType::ToolExecution,
                            json!({ "tool": tool_name, "ok": true }),
                        )
                        .await;
                    if policy.share_result {
                        self.share_tool_result(session_id, agent_id, tool_name, &value)
                            .await;
                    }
                }
                Ok(value)
            }
            Err(source) => {
                counter!("concord_tool_failures_total").increment(1);
                if let Some(session_id) = &session_id {
                    self.context
                        .publish_event(
                            session_id,
                            agent_id,
                            ContextEventType::ToolExecution,
                            json!({ "tool": tool_name, "ok": false, "error": source.to_string() }),
                        )
                        .await;
                }
                Err(OrchestrationError::ToolFailed {
                    tool_name: tool_name.to_string(),
                    source,
                })
            }
        }
    }

    /// Liveness-filtered capability lookup, optionally restricted to one
    /// session's participants.
    pub async fn find_capable_agents(
        &self,
        capability: &str,
        session_id: Option<&SessionId>,
    ) -> Vec<AgentInfo> {
        let agents = self.registry.find_agents_by_capability(capability).await;
        match session_id {
            Some(session_id) => agents
                .into_iter()
                .filter(|info| info.session_id.as_ref() == Some(session_id))
                .collect(),
            None => agents,
        }
    }

    /// The shared context of the session the agent is registered in.
    pub async fn get_session_context(&self, agent_id: &AgentId) -> Option<SharedContext> {
        let info = self.registry.get_agent_info(agent_id).await?;
        let session_id = info.session_id?;
        self.context.get_session_context(&session_id).await
    }

    /// Full teardown for one agent: force-release its locks, leave its
    /// session, deregister it. Idempotent; an unknown agent is a no-op.
    pub async fn cleanup_agent(&self, agent_id: &AgentId) -> bool {
        let released = self.locks.force_release_agent_locks(agent_id).await;
        if let Some(info) = self.registry.get_agent_info(agent_id).await {
            if let Some(session_id) = &info.session_id {
                self.context.leave_session(session_id, agent_id).await;
            }
            self.registry.deregister_agent(agent_id).await;
        }
        info!(agent_id = %agent_id, released_locks = released, "agent cleaned up");
        true
    }

    pub async fn get_orchestration_status(&self) -> OrchestrationStatus {
        OrchestrationStatus {
            registry: self.registry.get_registry_stats().await,
            context: self.context.get_coordination_stats().await,
            locking: self.locks.get_locking_stats().await,
            cache: self.cache.stats(),
            chunks: self.chunks.stats(),
            tool_policies: self.policies.len(),
        }
    }

    /// Start the registry reaper and the lock maintenance loop.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        vec![
            self.registry.clone().start_reaper(),
            self.locks.clone().start_maintenance(),
        ]
    }

    /// Signal every background task to stop.
    pub fn shutdown(&self) {
        info!("coordination layer shutting down");
        self.registry.shutdown_token().cancel();
        self.locks.shutdown_token().cancel();
    }

    /// Mirror a successful result into the session's shared memory under a
    /// per-tool key. Best-effort: a busy update lock just drops the mirror.
    async fn share_tool_result(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        tool_name: &str,
        value: &Value,
    ) {
        let mut updates = Map::new();
        updates.insert(format!("tool_result:{tool_name}"), value.clone());
        if !self
            .context
            .update_shared_memory(session_id, agent_id, updates, MergeStrategy::Merge)
            .await
        {
            debug!(session_id = %session_id, tool_name, "shared-memory mirror skipped");
        }
    }

    async fn acquire_tool_lock(
        &self,
        agent_id: &AgentId,
        resource_id: &ResourceId,
        lock_type: LockType,
        tool_name: &str,
    ) -> Result<LockId, OrchestrationError> {
        let busy = || OrchestrationError::ResourceBusy {
            tool_name: tool_name.to_string(),
            resource_id: resource_id.clone(),
        };
        match self
            .locks
            .acquire_lock(
                agent_id,
                resource_id,
                lock_type,
                LockPriority::Normal,
                self.config.facade.tool_lock_timeout,
                self.config.facade.tool_lock_wait,
                Map::new(),
            )
            .await
        {
            Ok(Some(lock_id)) => Ok(lock_id),
            Ok(None) => Err(busy()),
            Err(LockError::QueueFull(_)) => Err(busy()),
        }
    }
}

/// Resource identity for a tool invocation: an explicit `resource_id`
/// parameter wins; otherwise the first hint parameter present is digested
/// into `{tool}:{hex16}`; otherwise the tool itself is the resource.
pub fn derive_resource_id(tool_name: &str, params: &Map<String, Value>) -> ResourceId {
    if let Some(Value::String(explicit)) = params.get("resource_id") {
        return ResourceId::from(explicit.clone());
    }
    for hint in RESOURCE_HINT_PARAMS {
        if let Some(value) = params.get(*hint) {
            let digest = Sha256::digest(value.to_string().as_bytes());
            let mut hex = String::with_capacity(16);
            for byte in digest.iter().take(8) {
                let _ = write!(hex, "{byte:02x}");
            }
            return ResourceId::from(format!("{tool_name}:{hex}"));
        }
    }
    ResourceId::from(tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use concord_core::infrastructure::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::config::{FacadeConfig, LockingConfig};

    fn orchestrator() -> Orchestrator {
        let config = CoordinationConfig {
            locking: LockingConfig {
                poll_interval: Duration::from_millis(10),
                ..LockingConfig::default()
            },
            facade: FacadeConfig {
                tool_lock_wait: Duration::from_millis(100),
                ..FacadeConfig::default()
            },
            ..CoordinationConfig::default()
        };
        Orchestrator::new(Arc::new(MemoryStore::new()), config)
    }

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn register_agent_generates_id_and_joins_session() {
        let orchestrator = orchestrator();
        let agent_id = orchestrator
            .register_agent(
                "worker",
                vec![AgentCapability::new("search")],
                Some(SessionId::from("s1")),
                Map::new(),
            )
            .await
            .unwrap();

        let info = orchestrator.registry().get_agent_info(&agent_id).await.unwrap();
        assert_eq!(info.session_id, Some(SessionId::from("s1")));
        let context = orchestrator.get_session_context(&agent_id).await.unwrap();
        assert!(context.participants.contains(&agent_id));
    }

    #[tokio::test]
    async fn default_policy_tool_just_runs() {
        let orchestrator = orchestrator();
        let tool = ToolFunction::sync(|params| Ok(Value::Object(params)));
        let result = orchestrator
            .execute_tool_with_coordination(
                &AgentId::from("a1"),
                "echo",
                &tool,
                params(&[("k", json!("v"))]),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn cacheable_tool_computes_once() {
        let orchestrator = orchestrator();
        orchestrator.set_tool_policy("double", ToolPolicy::default().cached());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let tool = ToolFunction::sync(move |params| {
            counted.fetch_add(1, Ordering::SeqCst);
            let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });

        let p = params(&[("n", json!(21))]);
        for _ in 0..3 {
            let result = orchestrator
                .execute_tool_with_coordination(&AgentId::from("a1"), "double", &tool, p.clone())
                .await
                .unwrap();
            assert_eq!(result, json!(42));
        }
        // First call computes, the rest are cache hits.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_tool_executes() {
        let orchestrator = orchestrator();
        let tool = ToolFunction::asynchronous(|params| {
            Box::pin(async move { Ok(Value::Object(params)) })
        });
        let result = orchestrator
            .execute_tool_with_coordination(
                &AgentId::from("a1"),
                "echo",
                &tool,
                params(&[("k", json!("v"))]),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"k": "v"}));
    }

    #[tokio::test]
    async fn locked_tool_releases_after_success() {
        let orchestrator = orchestrator();
        orchestrator.set_tool_policy("write_doc", ToolPolicy::locked(LockType::Write));
        let tool = ToolFunction::sync(|_| Ok(json!("written")));
        orchestrator
            .execute_tool_with_coordination(
                &AgentId::from("a1"),
                "write_doc",
                &tool,
                params(&[("resource_id", json!("doc:42"))]),
            )
            .await
            .unwrap();

        assert!(orchestrator
            .locks()
            .get_resource_locks(&ResourceId::from("doc:42"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn failing_tool_releases_lock_and_propagates() {
        let orchestrator = orchestrator();
        orchestrator.set_tool_policy("explode", ToolPolicy::locked(LockType::Write));
        let tool = ToolFunction::sync(|_| Err(anyhow!("boom")));
        let result = orchestrator
            .execute_tool_with_coordination(
                &AgentId::from("a1"),
                "explode",
                &tool,
                params(&[("resource_id", json!("doc:42"))]),
            )
            .await;

        match result {
            Err(OrchestrationError::ToolFailed { tool_name, source }) => {
                assert_eq!(tool_name, "explode");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected tool failure, got {other:?}"),
        }
        assert!(orchestrator
            .locks()
            .get_resource_locks(&ResourceId::from("doc:42"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn contended_lock_maps_to_resource_busy() {
        let orchestrator = orchestrator();
        orchestrator.set_tool_policy("write_doc", ToolPolicy::locked(LockType::Write));
        // Another agent already holds a write lock on the derived resource.
        let held = orchestrator
            .locks()
            .acquire_lock(
                &AgentId::from("other"),
                &ResourceId::from("doc:42"),
                LockType::Write,
                LockPriority::Normal,
                Duration::from_secs(60),
                Duration::ZERO,
                Map::new(),
            )
            .await
            .unwrap()
            .unwrap();

        let tool = ToolFunction::sync(|_| Ok(json!("written")));
        let result = orchestrator
            .execute_tool_with_coordination(
                &AgentId::from("a1"),
                "write_doc",
                &tool,
                params(&[("resource_id", json!("doc:42"))]),
            )
            .await;
        assert!(matches!(result, Err(OrchestrationError::ResourceBusy { .. })));

        assert!(orchestrator.locks().release_lock(&AgentId::from("other"), held).await);
    }

    #[tokio::test]
    async fn session_tool_publishes_events_and_shares_results() {
        let orchestrator = orchestrator();
        let agent_id = orchestrator
            .register_agent("worker", vec![], Some(SessionId::from("s1")), Map::new())
            .await
            .unwrap();
        orchestrator.set_tool_policy("summarize", ToolPolicy::default().shared());
        let tool = ToolFunction::sync(|_| Ok(json!("a summary")));

        orchestrator
            .execute_tool_with_coordination(&agent_id, "summarize", &tool, Map::new())
            .await
            .unwrap();

        let events = orchestrator
            .context()
            .get_session_events(
                &SessionId::from("s1"),
                None,
                Some(&[ContextEventType::ToolExecution]),
                10,
            )
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["tool"], json!("summarize"));
        assert_eq!(events[0].data["ok"], json!(true));

        let context = orchestrator.get_session_context(&agent_id).await.unwrap();
        assert_eq!(
            context.shared_memory.get("tool_result:summarize"),
            Some(&json!("a summary"))
        );
    }

    #[tokio::test]
    async fn cleanup_agent_tears_everything_down() {
        let orchestrator = orchestrator();
        let agent_id = orchestrator
            .register_agent("worker", vec![], Some(SessionId::from("s1")), Map::new())
            .await
            .unwrap();
        orchestrator
            .locks()
            .acquire_lock(
                &agent_id,
                &ResourceId::from("doc:42"),
                LockType::Write,
                LockPriority::Normal,
                Duration::from_secs(60),
                Duration::ZERO,
                Map::new(),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(orchestrator.cleanup_agent(&agent_id).await);
        assert!(orchestrator.registry().get_agent_info(&agent_id).await.is_none());
        assert!(orchestrator.locks().get_agent_locks(&agent_id).await.is_empty());
        let context = orchestrator
            .context()
            .get_session_context(&SessionId::from("s1"))
            .await;
        assert!(context.is_none_or(|c| !c.participants.contains(&agent_id)));

        // Cleaning up an unknown agent stays a successful no-op.
        assert!(orchestrator.cleanup_agent(&AgentId::from("ghost")).await);
    }

    #[tokio::test]
    async fn capability_search_can_scope_to_a_session() {
        let orchestrator = orchestrator();
        let in_session = orchestrator
            .register_agent(
                "worker",
                vec![AgentCapability::new("search")],
                Some(SessionId::from("s1")),
                Map::new(),
            )
            .await
            .unwrap();
        orchestrator
            .register_agent("loner", vec![AgentCapability::new("search")], None, Map::new())
            .await
            .unwrap();

        assert_eq!(orchestrator.find_capable_agents("search", None).await.len(), 2);
        let scoped = orchestrator
            .find_capable_agents("search", Some(&SessionId::from("s1")))
            .await;
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].agent_id, in_session);
    }

    #[test]
    fn resource_id_prefers_explicit_then_hints_then_tool() {
        let explicit = derive_resource_id("t", &params(&[("resource_id", json!("doc:1"))]));
        assert_eq!(explicit, ResourceId::from("doc:1"));

        let hinted = derive_resource_id("t", &params(&[("query", json!("rust"))]));
        assert!(hinted.as_str().starts_with("t:"));
        assert_eq!(hinted.as_str().len(), "t:".len() + 16);
        // Same hint digests to the same resource.
        assert_eq!(hinted, derive_resource_id("t", &params(&[("query", json!("rust"))])));
        assert_ne!(hinted, derive_resource_id("t", &params(&[("query", json!("go"))])));

        let bare = derive_resource_id("t", &Map::new());
        assert_eq!(bare, ResourceId::from("t"));
    }

    #[tokio::test]
    async fn status_aggregates_all_services() {
        let orchestrator = orchestrator();
        orchestrator.set_tool_policy("noop", ToolPolicy::default());
        orchestrator
            .register_agent("worker", vec![], None, Map::new())
            .await
            .unwrap();

        let status = orchestrator.get_orchestration_status().await;
        assert_eq!(status.tool_policies, 1);
        assert_eq!(status.registry.active_agents, 1);
        assert_eq!(status.locking.active_locks, 0);
    }
}
