// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end scenarios across the composed coordination layer: registry,
//! session context, locking, and the orchestration facade sharing one store.

use anyhow::anyhow;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use concord_core::infrastructure::MemoryStore;
use concord_core::{
    AgentCapability, AgentId, ContextEventType, LockPriority, LockType, MergeStrategy, ResourceId,
    SessionId,
};
use concord_services::config::{CoordinationConfig, FacadeConfig, LockingConfig};
use concord_services::{OrchestrationError, Orchestrator, ToolFunction, ToolPolicy};

fn fast_config() -> CoordinationConfig {
    CoordinationConfig {
        locking: LockingConfig {
            poll_interval: Duration::from_millis(10),
            ..LockingConfig::default()
        },
        facade: FacadeConfig {
            tool_lock_wait: Duration::from_millis(200),
            ..FacadeConfig::default()
        },
        ..CoordinationConfig::default()
    }
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(Arc::new(MemoryStore::new()), fast_config())
}

fn obj(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

#[tokio::test]
async fn agent_lifecycle_round_trip() {
    let orchestrator = orchestrator();
    let agent_id = orchestrator
        .register_agent(
            "python worker",
            vec![AgentCapability::new("python_coding")],
            Some(SessionId::from("s1")),
            Map::new(),
        )
        .await
        .unwrap();

    let found = orchestrator.find_capable_agents("python_coding", None).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].agent_id, agent_id);
    assert!(orchestrator
        .find_capable_agents("golang_coding", None)
        .await
        .is_empty());

    assert!(orchestrator.cleanup_agent(&agent_id).await);
    assert!(orchestrator
        .find_capable_agents("python_coding", None)
        .await
        .is_empty());
    // Double cleanup stays a no-op.
    assert!(orchestrator.cleanup_agent(&agent_id).await);
}

#[tokio::test]
async fn shared_memory_updates_are_versioned_and_observable() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    let writer = AgentId::from("a1");
    let reader = AgentId::from("a2");

    orchestrator.context().join_session(&session, &writer).await;
    orchestrator.context().join_session(&session, &reader).await;
    let mut events = orchestrator.context().subscribe(&session, &reader);

    let before = orchestrator
        .context()
        .get_session_context(&session)
        .await
        .unwrap()
        .version;
    assert!(
        orchestrator
            .context()
            .update_shared_memory(
                &session,
                &writer,
                obj(json!({"findings": ["first"]})),
                MergeStrategy::Merge,
            )
            .await
    );

    let context = orchestrator.context().get_session_context(&session).await.unwrap();
    assert_eq!(context.version, before + 1);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, ContextEventType::MemoryUpdate);
    assert_eq!(event.agent_id, writer);
    assert_eq!(event.version, context.version);
}

#[tokio::test]
async fn append_strategy_accumulates_across_agents() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    for agent in ["a1", "a2", "a3"] {
        orchestrator.context().join_session(&session, &AgentId::from(agent)).await;
        orchestrator
            .context()
            .update_shared_memory(
                &session,
                &AgentId::from(agent),
                obj(json!({"log": agent})),
                MergeStrategy::Append,
            )
            .await;
    }
    let context = orchestrator.context().get_session_context(&session).await.unwrap();
    assert_eq!(context.shared_memory.get("log"), Some(&json!(["a1", "a2", "a3"])));
}

#[tokio::test]
async fn concurrent_reads_coexist_while_writes_exclude() {
    let orchestrator = orchestrator();
    let resource = ResourceId::from("memory:findings");

    let r1 = orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("a1"),
            &resource,
            LockType::Read,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::ZERO,
            Map::new(),
        )
        .await
        .unwrap();
    let r2 = orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("a2"),
            &resource,
            LockType::Read,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::ZERO,
            Map::new(),
        )
        .await
        .unwrap();
    assert!(r1.is_some() && r2.is_some());

    let w = orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("a3"),
            &resource,
            LockType::Write,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::from_millis(100),
            Map::new(),
        )
        .await
        .unwrap();
    assert!(w.is_none());
}

#[tokio::test]
async fn waiting_writer_proceeds_once_readers_release() {
    let orchestrator = Arc::new(orchestrator());
    let resource = ResourceId::from("memory:findings");

    let reader_lock = orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("reader"),
            &resource,
            LockType::Read,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::ZERO,
            Map::new(),
        )
        .await
        .unwrap()
        .unwrap();

    let writer = {
        let orchestrator = orchestrator.clone();
        let resource = resource.clone();
        tokio::spawn(async move {
            orchestrator
                .locks()
                .acquire_lock(
                    &AgentId::from("writer"),
                    &resource,
                    LockType::Write,
                    LockPriority::Normal,
                    Duration::from_secs(60),
                    Duration::from_secs(5),
                    Map::new(),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.locks().release_lock(&AgentId::from("reader"), reader_lock).await);

    let granted = writer.await.unwrap().unwrap();
    assert!(granted.is_some());
    let held = orchestrator.locks().get_resource_locks(&resource).await;
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].agent_id, AgentId::from("writer"));
}

#[tokio::test]
async fn coordinated_tool_failure_frees_the_resource() {
    let orchestrator = orchestrator();
    orchestrator.set_tool_policy("update_doc", ToolPolicy::locked(LockType::Write));
    let tool = ToolFunction::sync(|_| Err(anyhow!("backend unavailable")));

    let result = orchestrator
        .execute_tool_with_coordination(
            &AgentId::from("a1"),
            "update_doc",
            &tool,
            obj(json!({"resource_id": "doc:7"})),
        )
        .await;
    assert!(matches!(result, Err(OrchestrationError::ToolFailed { .. })));

    // The lock did not leak; a second agent gets it immediately.
    let lock = orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("a2"),
            &ResourceId::from("doc:7"),
            LockType::Write,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::ZERO,
            Map::new(),
        )
        .await
        .unwrap();
    assert!(lock.is_some());
}

#[tokio::test]
async fn cacheable_tools_share_results_across_agents() {
    let orchestrator = orchestrator();
    orchestrator.set_tool_policy("search", ToolPolicy::default().cached());
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counted = calls.clone();
    let tool = ToolFunction::asynchronous(move |params| {
        let counted = counted.clone();
        Box::pin(async move {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!({"echo": params.get("query").cloned()}))
        })
    });

    let p = obj(json!({"query": "lock ordering"}));
    let first = orchestrator
        .execute_tool_with_coordination(&AgentId::from("a1"), "search", &tool, p.clone())
        .await
        .unwrap();
    let second = orchestrator
        .execute_tool_with_coordination(&AgentId::from("a2"), "search", &tool, p)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_events_reach_peers_but_not_the_originator() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    let actor = AgentId::from("actor");
    let peer = AgentId::from("peer");

    orchestrator.context().join_session(&session, &actor).await;
    orchestrator.context().join_session(&session, &peer).await;
    let mut actor_events = orchestrator.context().subscribe(&session, &actor);
    let mut peer_events = orchestrator.context().subscribe(&session, &peer);

    orchestrator
        .context()
        .update_shared_memory(&session, &actor, obj(json!({"k": 1})), MergeStrategy::Merge)
        .await;

    let delivered = peer_events.try_recv().unwrap();
    assert_eq!(delivered.event_type, ContextEventType::MemoryUpdate);
    assert!(actor_events.try_recv().is_err());
}

#[tokio::test]
async fn shared_results_flow_through_the_session() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    let producer = orchestrator
        .register_agent("producer", vec![], Some(session.clone()), Map::new())
        .await
        .unwrap();
    let consumer = orchestrator
        .register_agent("consumer", vec![], Some(session.clone()), Map::new())
        .await
        .unwrap();

    orchestrator.set_tool_policy("analyze", ToolPolicy::default().shared());
    let tool = ToolFunction::sync(|_| Ok(json!({"verdict": "ok"})));
    orchestrator
        .execute_tool_with_coordination(&producer, "analyze", &tool, Map::new())
        .await
        .unwrap();

    // The consumer sees the mirrored result through its own session view.
    let context = orchestrator.get_session_context(&consumer).await.unwrap();
    assert_eq!(
        context.shared_memory.get("tool_result:analyze"),
        Some(&json!({"verdict": "ok"}))
    );
}

#[tokio::test]
async fn drained_session_is_purged_but_agents_survive() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    let agent = AgentId::from("a1");

    orchestrator
        .registry()
        .register_agent(agent.clone(), "worker", vec![], Some(session.clone()), Map::new())
        .await;
    orchestrator.context().join_session(&session, &agent).await;
    assert!(orchestrator.context().leave_session(&session, &agent).await);

    assert!(orchestrator
        .context()
        .get_session_events(&session, None, None, 100)
        .await
        .is_empty());
    // Leaving the session does not deregister the agent.
    assert!(orchestrator.registry().get_agent_info(&agent).await.is_some());
}

#[tokio::test]
async fn status_reflects_live_activity() {
    let orchestrator = orchestrator();
    let session = SessionId::from("s1");
    orchestrator
        .registry()
        .register_agent(AgentId::from("a1"), "worker", vec![], None, Map::new())
        .await;
    orchestrator.context().join_session(&session, &AgentId::from("a1")).await;
    orchestrator
        .locks()
        .acquire_lock(
            &AgentId::from("a1"),
            &ResourceId::from("doc:1"),
            LockType::Write,
            LockPriority::Normal,
            Duration::from_secs(60),
            Duration::ZERO,
            Map::new(),
        )
        .await
        .unwrap()
        .unwrap();

    let status = orchestrator.get_orchestration_status().await;
    assert_eq!(status.registry.active_agents, 1);
    assert_eq!(status.context.active_sessions, 1);
    assert_eq!(status.locking.active_locks, 1);
    assert_eq!(status.locking.locks_granted, 1);
}

#[tokio::test]
async fn background_tasks_start_and_stop_cleanly() {
    let orchestrator = orchestrator();
    let handles = orchestrator.start_background_tasks();
    assert_eq!(handles.len(), 2);

    orchestrator.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("background task did not stop")
            .expect("background task panicked");
    }
}
