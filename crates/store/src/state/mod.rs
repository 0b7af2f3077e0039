// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Materialized state from WAL replay.

mod helpers;
mod installations;
mod markers;
mod tasks;
mod types;
mod workspaces;

pub use types::{Marker, SpendLedger, WorkspaceRecord};

use gantry_core::{Event, Installation, OrgId, Provider, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Materialized state built from WAL events.
///
/// Events are facts about what happened; state is derived from those facts.
/// Every applier in the submodules is idempotent (see the contract on
/// [`gantry_core::Event`]).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    /// Task id → task record. The queue is the subset with status `queued`.
    pub tasks: HashMap<String, Task>,
    /// Installation id → installation record (soft-deleted rows included).
    pub installations: HashMap<String, Installation>,
    /// Marker key → expiry. Keys are `dedup:<provider>:<event-id>` and
    /// `posted:<provider>:<artifact-id>`.
    #[serde(default)]
    pub markers: HashMap<String, Marker>,
    /// Org → daily spend ledger.
    #[serde(default)]
    pub spend: HashMap<OrgId, SpendLedger>,
    /// Workspace id → durable checkout record (drives TTL eviction).
    #[serde(default)]
    pub workspaces: HashMap<String, WorkspaceRecord>,
}

impl MaterializedState {
    /// Get a task by id or unique prefix.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        helpers::find_by_prefix(&self.tasks, id)
    }

    /// The active installation for a (provider, organization) pair, if any.
    pub fn active_installation(&self, provider: Provider, org: &str) -> Option<&Installation> {
        self.installations
            .values()
            .find(|i| i.active && i.provider == provider && i.org.as_str() == org)
    }

    /// Apply an event to derive state changes. Idempotent.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::InstallationCreated { .. }
            | Event::InstallationTokenRefreshed { .. }
            | Event::InstallationRevoked { .. } => installations::apply(self, event),

            Event::TaskCreated { .. }
            | Event::TaskLeased { .. }
            | Event::TaskStarted { .. }
            | Event::TaskHeartbeat { .. }
            | Event::TaskPhase { .. }
            | Event::TaskUsage { .. }
            | Event::TaskRequeued { .. }
            | Event::TaskLeaseReclaimed { .. }
            | Event::TaskCancelRequested { .. }
            | Event::TaskFinished { .. }
            | Event::TaskPosted { .. } => tasks::apply(self, event),

            Event::MarkerSet { .. } | Event::MarkerCleared { .. } | Event::SpendRecorded { .. } => {
                markers::apply(self, event)
            }

            Event::WorkspaceRecorded { .. } | Event::WorkspaceEvicted { .. } => {
                workspaces::apply(self, event)
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
