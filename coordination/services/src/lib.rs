// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `concord-services` — Coordination Services
//!
//! Best-effort multi-agent coordination over a single shared
//! key-value/data-structure store: who is alive, what they share, and who
//! may touch what.
//!
//! ## Crate Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`registry`] | Agent registry with heartbeat liveness and a background reaper |
//! | [`context`] | Per-session shared memory with monotonic versioning and event broadcast |
//! | [`locking`] | Distributed read/write locks with priority queueing and expiry sweeps |
//! | [`cache`] | Advisory tool-result cache |
//! | [`chunks`] | Two-tier chunk buffer with an external fallback loader |
//! | [`facade`] | [`facade::Orchestrator`] composing the services behind one entry point |
//! | [`config`] | Tunables for every service |
//!
//! ## Guarantees (and non-guarantees)
//!
//! This is not a consensus protocol. All shared mutation goes through
//! single-key atomic store primitives; multi-key sequences may partially
//! fail and are reconciled by TTL expiry. Within one resource, queued lock
//! requests are served in priority order with FIFO ties; session versions
//! are monotonic per session only. Infrastructure failures degrade to
//! `false`/`None`/empty results, never panics or propagated store errors.

pub mod cache;
pub mod chunks;
pub mod config;
pub mod context;
pub mod facade;
pub mod locking;
pub mod registry;

pub use cache::ToolResultCache;
pub use chunks::{ChunkBuffer, ChunkContent, ChunkLoader};
pub use config::CoordinationConfig;
pub use context::{ContextCoordinator, SessionEvents};
pub use facade::{OrchestrationError, Orchestrator, ToolFunction, ToolPolicy};
pub use locking::{LockError, MemoryLockService};
pub use registry::AgentRegistry;
