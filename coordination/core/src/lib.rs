// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # `concord-core` — Coordination Domain & Store Abstraction
//!
//! Shared domain model for the Concord coordination layer, plus the
//! [`domain::store::CoordinationStore`] trait every service talks through.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Agent, session, event and lock aggregates; store contract; key layout |
//! | [`infrastructure`] | Infrastructure | In-memory store backend for development and testing |
//!
//! ## Key Concepts
//!
//! - **Coordination store**: the single external key-value/data-structure
//!   service holding all cross-agent state. Every key carries an expiry so
//!   orphaned state self-heals; the store is the system of record.
//! - **Agent**: an independent caller that registers, holds locks, and
//!   participates in sessions. Liveness is heartbeat-based.
//! - **Session**: a group of agents sharing a [`domain::context::SharedContext`]
//!   and its append-only event stream.

pub mod domain;
pub mod infrastructure;

pub use domain::*;
