// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Context Coordination
//!
//! Per-session shared memory with monotonic versioning, an append-only
//! event log, and per-session broadcast channels for update delivery.
//!
//! ## Concurrency
//!
//! `update_shared_memory` is the only mutual exclusion in this component:
//! it holds a short-TTL conditional-set key for the duration of its
//! read-modify-write and releases it through the store's conditional
//! delete, so a crashed holder stalls writers for at most the lock TTL.
//! `join_session`/`leave_session` deliberately do not take that lock; a
//! concurrent join racing a memory update is last-write-wins on
//! `version`/`participants`, reconciled by TTL self-healing.
//!
//! ## Delivery
//!
//! Subscribers get a broadcast receiver that skips events they originated
//! and gates version-bumping events on the last delivered version
//! (observational events pass ungated). Delivery is at-least-once with
//! possible gaps: a lagging receiver drops the oldest buffered events, the
//! same way a slow poller misses entries trimmed off the capped updates
//! list. Cross-process readers poll [`ContextCoordinator::get_session_events`].

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use concord_core::domain::keys;
use concord_core::domain::store::CoordinationStore;
use concord_core::{
    AgentId, ContextEvent, ContextEventType, MergeStrategy, SessionId, SharedContext,
};

use crate::config::ContextConfig;

#[derive(Default)]
struct ContextCounters {
    sessions_created: AtomicU64,
    events_emitted: AtomicU64,
    memory_updates: AtomicU64,
    update_lock_conflicts: AtomicU64,
}

/// Aggregated view over live sessions.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub active_sessions: usize,
    pub total_participants: usize,
    pub active_subscriptions: usize,
    pub sessions_created: u64,
    pub events_emitted: u64,
    pub memory_updates: u64,
    pub update_lock_conflicts: u64,
    pub session_details: Vec<SessionDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session_id: SessionId,
    pub participants: usize,
    pub version: u64,
}

/// Errors surfaced to a subscriber's receive loop.
#[derive(Debug, thiserror::Error)]
pub enum SessionEventsError {
    #[error("session event channel closed")]
    Closed,
    #[error("no session events buffered")]
    Empty,
}

/// Filtered receiver for one agent's subscription to a session.
///
/// Skips events the subscriber itself produced and version-bumping events
/// at or below the last version it delivered; observational events (tool
/// runs, lock transitions) pass through ungated. Dropping the receiver
/// unsubscribes.
pub struct SessionEvents {
    receiver: broadcast::Receiver<ContextEvent>,
    agent_id: AgentId,
    last_version: u64,
}

impl SessionEvents {
    /// Receive the next event addressed to this subscriber.
    pub async fn recv(&mut self) -> Result<ContextEvent, SessionEventsError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Some(event) = self.filter(event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SessionEventsError::Closed),
            }
        }
    }

    /// Non-blocking variant of [`SessionEvents::recv`].
    pub fn try_recv(&mut self) -> Result<ContextEvent, SessionEventsError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.filter(event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "session event receiver lagged, events dropped");
                }
                Err(broadcast::error::TryRecvError::Empty) => return Err(SessionEventsError::Empty),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SessionEventsError::Closed)
                }
            }
        }
    }

    fn filter(&mut self, event: ContextEvent) -> Option<ContextEvent> {
        if event.agent_id == self.agent_id {
            return None;
        }
        // Only version-bumping events participate in the version gate;
        // observational events share the version of the preceding bump and
        // would be swallowed by a `<=` comparison.
        if event.event_type.bumps_version() {
            if event.version <= self.last_version {
                return None;
            }
            self.last_version = event.version;
        }
        Some(event)
    }
}

/// Session context coordination over the store plus in-process broadcast.
pub struct ContextCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: ContextConfig,
    channels: DashMap<SessionId, broadcast::Sender<ContextEvent>>,
    counters: ContextCounters,
}

impl ContextCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: ContextConfig) -> Self {
        Self {
            store,
            config,
            channels: DashMap::new(),
            counters: ContextCounters::default(),
        }
    }

    /// Create the session record explicitly; version starts at 1.
    pub async fn create_session_context(
        &self,
        session_id: &SessionId,
        initial_memory: Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> bool {
        let context = SharedContext::new(session_id.clone(), initial_memory, metadata);
        if !self.persist(&context, self.config.context_ttl).await {
            return false;
        }
        self.counters.sessions_created.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %session_id, "session context created");
        true
    }

    /// Add a participant, auto-creating the session when absent. Bumps the
    /// version and emits an `agent_join` event.
    pub async fn join_session(&self, session_id: &SessionId, agent_id: &AgentId) -> bool {
        let mut context = match self.get_session_context(session_id).await {
            Some(context) => context,
            None => {
                self.counters.sessions_created.fetch_add(1, Ordering::Relaxed);
                SharedContext::new(session_id.clone(), Map::new(), Map::new())
            }
        };
        context.participants.insert(agent_id.clone());
        context.bump();
        if !self.persist(&context, self.config.context_ttl).await {
            return false;
        }
        self.emit(ContextEvent::new(
            session_id.clone(),
            agent_id.clone(),
            ContextEventType::AgentJoin,
            json!({ "participants": context.participants.len() }),
            context.version,
        ))
        .await;
        true
    }

    /// Remove a participant and emit `agent_leave`. When the last
    /// participant leaves, the context TTL is shortened to a grace window
    /// and the session's event keys are purged.
    pub async fn leave_session(&self, session_id: &SessionId, agent_id: &AgentId) -> bool {
        let Some(mut context) = self.get_session_context(session_id).await else {
            return false;
        };
        if !context.participants.remove(agent_id) {
            return false;
        }
        context.bump();
        let drained = context.participants.is_empty();
        let ttl = if drained {
            self.config.drained_ttl
        } else {
            self.config.context_ttl
        };
        if !self.persist(&context, ttl).await {
            return false;
        }
        self.emit(ContextEvent::new(
            session_id.clone(),
            agent_id.clone(),
            ContextEventType::AgentLeave,
            json!({ "participants": context.participants.len() }),
            context.version,
        ))
        .await;
        if drained {
            self.cleanup_session(session_id).await;
        }
        true
    }

    /// Fold `updates` into the session's shared memory under the given
    /// strategy, holding the per-session update lock for the duration of
    /// the read-modify-write. Returns `false` without retrying when the
    /// lock is contended; callers may retry.
    pub async fn update_shared_memory(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        updates: Map<String, Value>,
        strategy: MergeStrategy,
    ) -> bool {
        let lock_key = keys::session_update_lock(session_id);
        let token = Uuid::new_v4().to_string();
        match self
            .store
            .set_if_absent(&lock_key, &token, self.config.update_lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.counters.update_lock_conflicts.fetch_add(1, Ordering::Relaxed);
                debug!(session_id = %session_id, "update lock busy");
                return false;
            }
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to take update lock");
                return false;
            }
        }

        let applied = self
            .apply_memory_update(session_id, agent_id, updates, strategy)
            .await;

        // Release even when the update failed; only our own token is removed.
        match self.store.delete_if_value(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(session_id = %session_id, "update lock expired while held"),
            Err(error) => warn!(session_id = %session_id, %error, "failed to release update lock"),
        }
        applied
    }

    pub async fn get_session_context(&self, session_id: &SessionId) -> Option<SharedContext> {
        let key = keys::session_context(session_id);
        match self.store.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(context) => Some(context),
                Err(error) => {
                    warn!(session_id = %session_id, %error, "corrupt session context");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to read session context");
                None
            }
        }
    }

    /// Most-recent-first slice of the session's event log, optionally
    /// filtered by version floor and event types.
    pub async fn get_session_events(
        &self,
        session_id: &SessionId,
        since_version: Option<u64>,
        event_types: Option<&[ContextEventType]>,
        limit: usize,
    ) -> Vec<ContextEvent> {
        let key = keys::session_events(session_id);
        let entries = match self.store.list_range(&key, 0, -1).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(session_id = %session_id, %error, "failed to read session events");
                return Vec::new();
            }
        };
        entries
            .iter()
            .filter_map(|json| serde_json::from_str::<ContextEvent>(json).ok())
            .filter(|event| since_version.is_none_or(|floor| event.version > floor))
            .filter(|event| event_types.is_none_or(|types| types.contains(&event.event_type)))
            .take(limit)
            .collect()
    }

    /// Subscribe an agent to a session's event stream. The returned
    /// receiver filters out the agent's own events; dropping it
    /// unsubscribes.
    pub fn subscribe(&self, session_id: &SessionId, agent_id: &AgentId) -> SessionEvents {
        let sender = self
            .channels
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.config.event_channel_capacity).0)
            .clone();
        SessionEvents {
            receiver: sender.subscribe(),
            agent_id: agent_id.clone(),
            last_version: 0,
        }
    }

    /// Live subscriber count for one session.
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .get(session_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Append an event to the session's capped log and broadcast it to
    /// in-process subscribers. Best-effort on the store side.
    pub async fn publish_event(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        event_type: ContextEventType,
        data: Value,
    ) -> bool {
        let version = self
            .get_session_context(session_id)
            .await
            .map(|context| context.version)
            .unwrap_or(0);
        self.emit(ContextEvent::new(
            session_id.clone(),
            agent_id.clone(),
            event_type,
            data,
            version,
        ))
        .await;
        true
    }

    pub async fn get_coordination_stats(&self) -> ContextStats {
        let mut session_details = Vec::new();
        let mut total_participants = 0;
        if let Ok(keys) = self.store.scan_prefix("context:session:").await {
            for key in keys {
                let Ok(Some(json)) = self.store.get(&key).await else {
                    continue;
                };
                if let Ok(context) = serde_json::from_str::<SharedContext>(&json) {
                    total_participants += context.participants.len();
                    session_details.push(SessionDetail {
                        session_id: context.session_id,
                        participants: context.participants.len(),
                        version: context.version,
                    });
                }
            }
        }
        let active_subscriptions = self
            .channels
            .iter()
            .map(|entry| entry.value().receiver_count())
            .sum();
        ContextStats {
            active_sessions: session_details.len(),
            total_participants,
            active_subscriptions,
            sessions_created: self.counters.sessions_created.load(Ordering::Relaxed),
            events_emitted: self.counters.events_emitted.load(Ordering::Relaxed),
            memory_updates: self.counters.memory_updates.load(Ordering::Relaxed),
            update_lock_conflicts: self.counters.update_lock_conflicts.load(Ordering::Relaxed),
            session_details,
        }
    }

    async fn apply_memory_update(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        updates: Map<String, Value>,
        strategy: MergeStrategy,
    ) -> bool {
        let Some(mut context) = self.get_session_context(session_id).await else {
            return false;
        };
        let keys_touched: Vec<String> = updates.keys().cloned().collect();
        strategy.apply(&mut context.shared_memory, updates);
        context.bump();
        if !self.persist(&context, self.config.context_ttl).await {
            return false;
        }
        self.counters.memory_updates.fetch_add(1, Ordering::Relaxed);
        self.emit(ContextEvent::new(
            session_id.clone(),
            agent_id.clone(),
            ContextEventType::MemoryUpdate,
            json!({ "strategy": strategy, "keys": keys_touched }),
            context.version,
        ))
        .await;
        true
    }

    async fn persist(&self, context: &SharedContext, ttl: std::time::Duration) -> bool {
        let json = match serde_json::to_string(context) {
            Ok(json) => json,
            Err(error) => {
                warn!(session_id = %context.session_id, %error, "failed to serialize session context");
                return false;
            }
        };
        let key = keys::session_context(&context.session_id);
        match self.store.set_with_ttl(&key, &json, ttl).await {
            Ok(()) => true,
            Err(error) => {
                warn!(session_id = %context.session_id, %error, "failed to write session context");
                false
            }
        }
    }

    async fn emit(&self, event: ContextEvent) {
        self.counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        if let Ok(json) = serde_json::to_string(&event) {
            let events_key = keys::session_events(&event.session_id);
            let updates_key = keys::session_updates(&event.session_id);
            if let Err(error) = self.store.list_push_front(&events_key, &json).await {
                warn!(session_id = %event.session_id, %error, "failed to append session event");
            } else {
                let _ = self
                    .store
                    .list_trim(&events_key, 0, self.config.event_log_cap as isize - 1)
                    .await;
                let _ = self.store.expire(&events_key, self.config.event_retention).await;
            }
            if self.store.list_push_front(&updates_key, &json).await.is_ok() {
                let _ = self
                    .store
                    .list_trim(&updates_key, 0, self.config.updates_cap as isize - 1)
                    .await;
                let _ = self.store.expire(&updates_key, self.config.event_retention).await;
            }
        }
        if let Some(sender) = self.channels.get(&event.session_id) {
            // No receivers is fine; send only fails when nobody listens.
            let _ = sender.send(event);
        }
    }

    async fn cleanup_session(&self, session_id: &SessionId) {
        let _ = self.store.delete(&keys::session_events(session_id)).await;
        let _ = self.store.delete(&keys::session_updates(session_id)).await;
        let _ = self.store.delete(&keys::session_update_lock(session_id)).await;
        self.channels.remove(session_id);
        debug!(session_id = %session_id, "session drained, event state purged");
    }
}
