// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Durable control-plane events.
//!
//! Every state mutation is recorded as one of these facts in the WAL and
//! replayed into materialized state on startup. Serializes with
//! `{"type": "domain:verb", ...fields}` format.
//!
//! # Idempotency Requirement
//!
//! **All event appliers MUST be idempotent.** Applying the same event twice
//! must produce the same state as applying it once, because events are
//! applied both at commit time and again during WAL replay. Counters are
//! therefore carried as totals (assignment, not increment) and inserts are
//! guarded by existence checks.

use crate::error::Fault;
use crate::id::{InstallationId, TaskId, WorkspaceId};
use crate::installation::{Installation, OrgId, Secret};
use crate::provider::Provider;
use crate::task::{Task, TaskResult, TaskStatus};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- installations --
    #[serde(rename = "installation:created")]
    InstallationCreated { installation: Installation },

    #[serde(rename = "installation:token-refreshed")]
    InstallationTokenRefreshed {
        id: InstallationId,
        access_token: Secret,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<Secret>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at_ms: Option<u64>,
        at_ms: u64,
    },

    #[serde(rename = "installation:revoked")]
    InstallationRevoked { id: InstallationId, at_ms: u64 },

    // -- tasks --
    #[serde(rename = "task:created")]
    TaskCreated { task: Task },

    #[serde(rename = "task:leased")]
    TaskLeased { id: TaskId, worker: WorkerId, lease_expires_at_ms: u64, at_ms: u64 },

    #[serde(rename = "task:started")]
    TaskStarted { id: TaskId, at_ms: u64 },

    #[serde(rename = "task:heartbeat")]
    TaskHeartbeat { id: TaskId, lease_expires_at_ms: u64 },

    #[serde(rename = "task:phase")]
    TaskPhase { id: TaskId, phase: String },

    /// Metered usage as cumulative totals (idempotent by assignment).
    #[serde(rename = "task:usage")]
    TaskUsage { id: TaskId, input_tokens: u64, output_tokens: u64, cost_usd: f64 },

    /// Nack: lease cleared, task re-available at `available_at_ms`.
    #[serde(rename = "task:requeued")]
    TaskRequeued { id: TaskId, available_at_ms: u64, at_ms: u64 },

    /// An expired lease was reclaimed back to queued.
    #[serde(rename = "task:lease-reclaimed")]
    TaskLeaseReclaimed { id: TaskId, at_ms: u64 },

    #[serde(rename = "task:cancel-requested")]
    TaskCancelRequested { id: TaskId, at_ms: u64 },

    /// Ack into a terminal state.
    #[serde(rename = "task:finished")]
    TaskFinished {
        id: TaskId,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<TaskResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault: Option<Fault>,
        posted: bool,
        at_ms: u64,
    },

    /// The terminal artifact reached the source after the task finished.
    #[serde(rename = "task:posted")]
    TaskPosted { id: TaskId, artifact_id: String, at_ms: u64 },

    // -- markers --
    /// TTL marker (dedup / posted-artifact). Set-if-absent semantics.
    #[serde(rename = "marker:set")]
    MarkerSet { key: String, expires_at_ms: u64 },

    /// Roll back a marker whose guarded action was refused (backpressure).
    #[serde(rename = "marker:cleared")]
    MarkerCleared { key: String },

    // -- budget --
    /// Daily spend as the new day total (idempotent by assignment).
    #[serde(rename = "spend:recorded")]
    SpendRecorded { org: OrgId, day: String, total_usd: f64 },

    // -- workspaces --
    #[serde(rename = "workspace:recorded")]
    WorkspaceRecorded {
        id: WorkspaceId,
        provider: Provider,
        org: OrgId,
        repo: String,
        git_ref: String,
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head: Option<String>,
        last_access_ms: u64,
    },

    #[serde(rename = "workspace:evicted")]
    WorkspaceEvicted { id: WorkspaceId },
}

impl Event {
    /// The wire tag, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Event::InstallationCreated { .. } => "installation:created",
            Event::InstallationTokenRefreshed { .. } => "installation:token-refreshed",
            Event::InstallationRevoked { .. } => "installation:revoked",
            Event::TaskCreated { .. } => "task:created",
            Event::TaskLeased { .. } => "task:leased",
            Event::TaskStarted { .. } => "task:started",
            Event::TaskHeartbeat { .. } => "task:heartbeat",
            Event::TaskPhase { .. } => "task:phase",
            Event::TaskUsage { .. } => "task:usage",
            Event::TaskRequeued { .. } => "task:requeued",
            Event::TaskLeaseReclaimed { .. } => "task:lease-reclaimed",
            Event::TaskCancelRequested { .. } => "task:cancel-requested",
            Event::TaskFinished { .. } => "task:finished",
            Event::TaskPosted { .. } => "task:posted",
            Event::MarkerSet { .. } => "marker:set",
            Event::MarkerCleared { .. } => "marker:cleared",
            Event::SpendRecorded { .. } => "spend:recorded",
            Event::WorkspaceRecorded { .. } => "workspace:recorded",
            Event::WorkspaceEvicted { .. } => "workspace:evicted",
        }
    }

    /// Task id carried by task-domain events.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Event::TaskCreated { task } => Some(task.id),
            Event::TaskLeased { id, .. }
            | Event::TaskStarted { id, .. }
            | Event::TaskHeartbeat { id, .. }
            | Event::TaskPhase { id, .. }
            | Event::TaskUsage { id, .. }
            | Event::TaskRequeued { id, .. }
            | Event::TaskLeaseReclaimed { id, .. }
            | Event::TaskCancelRequested { id, .. }
            | Event::TaskFinished { id, .. }
            | Event::TaskPosted { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
