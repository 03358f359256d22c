// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer: concrete store backends.

pub mod memory_store;

pub use memory_store::MemoryStore;
