// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: coordination aggregates and the store contract.

pub mod agent;
pub mod context;
pub mod keys;
pub mod lock;
pub mod store;

pub use agent::{AgentCapability, AgentId, AgentInfo, AgentStatus};
pub use context::{ContextEvent, ContextEventType, MergeStrategy, SessionId, SharedContext};
pub use lock::{ActiveLock, LockId, LockPriority, LockRequest, LockType, ResourceId};
pub use store::{CoordinationStore, StoreError};
