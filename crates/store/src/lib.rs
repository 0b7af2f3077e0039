// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-store: durable task queue, task store, and TTL markers.
//!
//! Persistence is an append-only WAL of [`gantry_core::Event`] facts plus
//! periodic zstd-compressed snapshots. Replaying snapshot + WAL rebuilds
//! [`MaterializedState`]; every mutation goes through [`Store`], which
//! validates, appends, then applies.

mod error;
mod seal;
mod snapshot;
pub mod state;
mod store;
mod wal;

pub use error::StoreError;
pub use state::{MaterializedState, SpendLedger, WorkspaceRecord};
pub use store::{QueueCaps, Store, StoreStats, TaskFilter, TaskPage};
pub use wal::Wal;
