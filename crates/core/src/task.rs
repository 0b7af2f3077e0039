// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Task record and state machine.
//!
//! A task binds one inbound event to one agent command. Its status moves
//! through the monotonic machine below; terminal states are absorbing and
//! every transition is checked by the store before it is recorded.
//!
//! ```text
//! queued ──lease──▶ leased ──start──▶ running ──ok──▶ succeeded
//!   ▲                 │                  │
//!   │   nack/reclaim  │                  ├─ err transient ──▶ queued
//!   └─────────────────┘                  ├─ err permanent ──▶ failed
//!                                        └─ timeout ────────▶ timed-out
//! queued|leased|running ──cancel──▶ cancelled
//! leased ──pre-hook skip──▶ skipped
//! ```

use crate::command::Command;
use crate::error::Fault;
use crate::id::{InstallationId, TaskId};
use crate::installation::OrgId;
use crate::priority::Priority;
use crate::provider::Provider;
use crate::source::{SourceRef, TaskSource};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Queued,
    Leased,
    Running,
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states absorb: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Skipped
                | TaskStatus::TimedOut
                | TaskStatus::Cancelled
        )
    }

    /// Whether a task in this state holds a lease (and therefore must have
    /// `lease_expires_at_ms` set).
    pub fn holds_lease(&self) -> bool {
        matches!(self, TaskStatus::Leased | TaskStatus::Running)
    }

    /// Whether `self → to` is a legal edge of the state machine.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Queued, Leased) | (Queued, Cancelled) => true,
            (Leased, Running)
            | (Leased, Queued)
            | (Leased, Skipped)
            | (Leased, Failed)
            | (Leased, Cancelled) => true,
            (Running, Succeeded)
            | (Running, Failed)
            | (Running, TimedOut)
            | (Running, Queued)
            | (Running, Cancelled) => true,
            _ => false,
        }
    }
}

crate::simple_display! {
    TaskStatus {
        Queued => "queued",
        Leased => "leased",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Skipped => "skipped",
        TimedOut => "timed-out",
        Cancelled => "cancelled",
    }
}

/// Final artifact summary plus metered cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The artifact body delivered to the source (or its partial snapshot
    /// for timed-out and cancelled tasks).
    pub summary: String,
    /// Artifact kind hint from the runner (`markdown`, `patch`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl TaskResult {
    /// Fold a usage report into the running totals.
    pub fn add_usage(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += cost_usd;
    }
}

/// The unit of work: one event, one command, one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub installation_id: InstallationId,
    pub provider: Provider,
    pub org: OrgId,
    pub source: TaskSource,
    pub command: Command,
    /// The user's message (mention text, ticket description, alert title).
    pub input: String,
    pub source_ref: SourceRef,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Incremented on every lease, including reclaims.
    pub attempt: u32,
    /// Earliest time the queue may serve this task (retry backoff).
    pub scheduled_for_ms: u64,
    /// Set iff status is leased or running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
    /// Last phase reported by the runner, for timeout notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
    /// Whether the terminal artifact reached the source provider. A task
    /// can be succeeded with `posted = false` when the poster is retrying.
    #[serde(default)]
    pub posted: bool,
    /// Cooperative cancellation flag, checked at hook boundaries and at
    /// every runner event.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl Task {
    /// Create a queued task for an inbound event.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        installation_id: InstallationId,
        provider: Provider,
        org: OrgId,
        source: TaskSource,
        command: Command,
        input: impl Into<String>,
        source_ref: SourceRef,
        priority: Priority,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            installation_id,
            provider,
            org,
            source,
            command,
            input: input.into(),
            source_ref,
            priority,
            status: TaskStatus::Queued,
            attempt: 0,
            scheduled_for_ms: now_ms,
            lease_expires_at_ms: None,
            worker: None,
            phase: None,
            result: None,
            fault: None,
            posted: false,
            cancel_requested: false,
            created_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Lease invariant check: `lease_expires_at_ms` set iff leased/running.
    pub fn lease_consistent(&self) -> bool {
        self.status.holds_lease() == self.lease_expires_at_ms.is_some()
    }
}

crate::builder! {
    pub struct TaskBuilder => Task {
        into {
            org: OrgId = "acme",
            input: String = "@agent analyze",
        }
        set {
            provider: Provider = Provider::Github,
            source: TaskSource = TaskSource::Webhook,
            command: Command = Command::Analyze,
            source_ref: SourceRef = SourceRef::default(),
            priority: Priority = Priority::Normal,
            status: TaskStatus = TaskStatus::Queued,
            attempt: u32 = 0,
            scheduled_for_ms: u64 = 1_000_000,
            posted: bool = false,
            cancel_requested: bool = false,
            created_at_ms: u64 = 1_000_000,
        }
        option {
            lease_expires_at_ms: u64 = None,
            worker: WorkerId = None,
            phase: String = None,
            result: TaskResult = None,
            fault: Fault = None,
            started_at_ms: u64 = None,
            finished_at_ms: u64 = None,
        }
        computed {
            id: TaskId = TaskId::new_at(1_000_000),
            installation_id: InstallationId = InstallationId::new_at(1_000_000),
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
