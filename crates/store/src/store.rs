// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! The durable store facade: task store, durable queue, markers, spend.
//!
//! Every mutation validates against materialized state, appends one event
//! to the WAL, flushes, then applies the event. The WAL lock is the
//! serialization point, so a `lease` is atomic with respect to competing
//! workers and an `ack` races cleanly with expired-lease reclaim (the
//! status guard makes the loser a no-op).

use crate::error::StoreError;
use crate::seal::Seal;
use crate::snapshot;
use crate::state::{MaterializedState, WorkspaceRecord};
use crate::wal::Wal;
use gantry_core::{
    Event, Fault, Installation, InstallationId, OrgId, Priority, Provider, Secret, Task, TaskId,
    TaskResult, TaskStatus, WorkerId, WorkspaceId,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

const WAL_FILE: &str = "gantry.wal";
const SNAPSHOT_FILE: &str = "state.zst";

/// Queue admission and lease limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCaps {
    /// Max tasks leased or running across all organizations.
    pub global_inflight: usize,
    /// Max tasks leased or running per organization.
    pub per_org_inflight: usize,
    /// Queue depth beyond which low/normal enqueues shed.
    pub soft_limit: usize,
    /// Queue depth beyond which every enqueue sheds.
    pub hard_limit: usize,
    /// Lease visibility timeout.
    pub visibility: Duration,
}

impl Default for QueueCaps {
    fn default() -> Self {
        Self {
            global_inflight: 10,
            per_org_inflight: 2,
            soft_limit: 1000,
            hard_limit: 4000,
            visibility: Duration::from_secs(600),
        }
    }
}

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub org: Option<OrgId>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

/// One page of a task listing.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Total matches before paging.
    pub total: usize,
}

/// Counts surfaced by the health endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StoreStats {
    pub queued: usize,
    pub inflight: usize,
    pub terminal: usize,
    pub installations: usize,
    pub markers: usize,
    pub workspaces: usize,
}

struct Inner {
    state: MaterializedState,
    wal: Wal,
}

pub struct Store {
    inner: Mutex<Inner>,
    seal: Seal,
    dir: PathBuf,
}

impl Store {
    /// Open the store rooted at `dir`: load the snapshot if present, then
    /// replay the WAL over it.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let seal = Seal::load_or_create(dir)?;
        let mut state = snapshot::read(&dir.join(SNAPSHOT_FILE))?.unwrap_or_default();
        let wal = Wal::open(&dir.join(WAL_FILE))?;
        let entries = wal.replay()?;
        let replayed = entries.len();
        for entry in entries {
            state.apply_event(&entry.event);
        }
        if replayed > 0 {
            tracing::info!(replayed, "wal replay complete");
        }
        Ok(Self { inner: Mutex::new(Inner { state, wal }), seal, dir: dir.to_path_buf() })
    }

    /// Write a snapshot (with expired markers pruned) and truncate the WAL.
    pub fn snapshot(&self, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let mut pruned = inner.state.clone();
        pruned.markers.retain(|_, m| m.expires_at_ms > now_ms);
        snapshot::write(&self.dir.join(SNAPSHOT_FILE), &pruned)?;
        inner.state = pruned;
        inner.wal.truncate()?;
        Ok(())
    }

    /// Run a closure against a read-only view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        f(&self.inner.lock().state)
    }

    fn commit(inner: &mut Inner, event: Event) -> Result<(), StoreError> {
        inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply_event(&event);
        Ok(())
    }

    // ---- installations ----

    /// Register an installation. Credential fields are sealed before the
    /// event is written: the WAL only sees ciphertext.
    pub fn create_installation(&self, mut installation: Installation) -> Result<(), StoreError> {
        installation.access_token = self.seal.seal(&installation.access_token)?;
        installation.refresh_token =
            installation.refresh_token.as_ref().map(|s| self.seal.seal(s)).transpose()?;
        installation.webhook_secret =
            installation.webhook_secret.as_ref().map(|s| self.seal.seal(s)).transpose()?;

        let mut inner = self.inner.lock();
        if inner
            .state
            .active_installation(installation.provider, installation.org.as_str())
            .is_some()
        {
            return Err(StoreError::AlreadyExists {
                provider: installation.provider.to_string(),
                org: installation.org.to_string(),
            });
        }
        Self::commit(&mut inner, Event::InstallationCreated { installation })
    }

    pub fn installation(&self, id: &InstallationId) -> Option<Installation> {
        let row = self.inner.lock().state.installations.get(id.as_str()).cloned();
        row.and_then(|row| self.unseal_installation(row))
    }

    pub fn active_installation(&self, provider: Provider, org: &str) -> Option<Installation> {
        let row = self.inner.lock().state.active_installation(provider, org).cloned();
        row.and_then(|row| self.unseal_installation(row))
    }

    pub fn update_installation_token(
        &self,
        id: InstallationId,
        access_token: Secret,
        refresh_token: Option<Secret>,
        expires_at_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let access_token = self.seal.seal(&access_token)?;
        let refresh_token = refresh_token.as_ref().map(|s| self.seal.seal(s)).transpose()?;

        let mut inner = self.inner.lock();
        if !inner.state.installations.contains_key(id.as_str()) {
            return Err(StoreError::InstallationNotFound);
        }
        Self::commit(
            &mut inner,
            Event::InstallationTokenRefreshed {
                id,
                access_token,
                refresh_token,
                expires_at_ms,
                at_ms: now_ms,
            },
        )
    }

    /// Decrypt credential fields on the way out; a row that fails to open
    /// (wrong master key) is withheld rather than served as ciphertext.
    fn unseal_installation(&self, mut row: Installation) -> Option<Installation> {
        match (
            self.seal.open(&row.access_token),
            self.seal.open_optional(&row.refresh_token),
            self.seal.open_optional(&row.webhook_secret),
        ) {
            (Ok(access), Ok(refresh), Ok(webhook)) => {
                row.access_token = access;
                row.refresh_token = refresh;
                row.webhook_secret = webhook;
                Some(row)
            }
            _ => {
                tracing::error!(installation = %row.id, "cannot unseal credentials");
                None
            }
        }
    }

    pub fn revoke_installation(&self, id: InstallationId, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.installations.contains_key(id.as_str()) {
            return Err(StoreError::InstallationNotFound);
        }
        Self::commit(&mut inner, Event::InstallationRevoked { id, at_ms: now_ms })
    }

    // ---- task store ----

    /// Create and enqueue a task. Returns `false` when the id already
    /// exists (idempotent re-enqueue).
    pub fn create_task(&self, task: Task, caps: &QueueCaps) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.tasks.contains_key(task.id.as_str()) {
            return Ok(false);
        }
        let depth = queued_count(&inner.state);
        if depth >= caps.hard_limit
            || (depth >= caps.soft_limit && task.priority.sheds_under_backpressure())
        {
            return Err(StoreError::TooBusy);
        }
        Self::commit(&mut inner, Event::TaskCreated { task })?;
        Ok(true)
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.inner.lock().state.tasks.get(id.as_str()).cloned()
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> TaskPage {
        let inner = self.inner.lock();
        let mut matches: Vec<&Task> = inner
            .state
            .tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.org.as_ref().is_none_or(|o| &t.org == o))
            .filter(|t| filter.since_ms.is_none_or(|s| t.created_at_ms >= s))
            .filter(|t| filter.until_ms.is_none_or(|u| t.created_at_ms < u))
            .collect();
        matches.sort_by_key(|t| (t.created_at_ms, t.id));
        let total = matches.len();
        let tasks = matches
            .into_iter()
            .skip(filter.offset)
            .take(if filter.limit == 0 { usize::MAX } else { filter.limit })
            .cloned()
            .collect();
        TaskPage { tasks, total }
    }

    // ---- durable queue ----

    /// Atomically select and lease the next eligible task.
    ///
    /// Priority bands are strict; within a band order is FIFO by
    /// `(scheduled_for, id)`. An organization at its in-flight cap is
    /// passed over, which is also the fairness rule: its queued tasks
    /// yield to other organizations in the same band.
    pub fn lease(
        &self,
        worker: &WorkerId,
        now_ms: u64,
        caps: &QueueCaps,
    ) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.lock();

        if inflight_count(&inner.state) >= caps.global_inflight {
            return Ok(None);
        }

        let mut candidate: Option<TaskId> = None;
        for band in Priority::ALL {
            let mut eligible: Vec<&Task> = inner
                .state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Queued)
                .filter(|t| t.priority == band)
                .filter(|t| t.scheduled_for_ms <= now_ms)
                .filter(|t| !t.cancel_requested)
                .collect();
            eligible.sort_by_key(|t| (t.scheduled_for_ms, t.id));
            if let Some(task) = eligible
                .iter()
                .find(|t| inflight_for_org(&inner.state, &t.org) < caps.per_org_inflight)
            {
                candidate = Some(task.id);
                break;
            }
        }

        let Some(id) = candidate else { return Ok(None) };
        let lease_expires_at_ms = now_ms + caps.visibility.as_millis() as u64;
        Self::commit(
            &mut inner,
            Event::TaskLeased { id, worker: worker.clone(), lease_expires_at_ms, at_ms: now_ms },
        )?;
        Ok(inner.state.tasks.get(id.as_str()).cloned())
    }

    /// Mark a leased task as running.
    pub fn start(&self, id: TaskId, worker: &WorkerId, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        verify_lease(&inner.state, id, worker, now_ms)?;
        Self::commit(&mut inner, Event::TaskStarted { id, at_ms: now_ms })
    }

    /// Extend the lease. Fails when the lease expired or is held by
    /// another worker.
    pub fn heartbeat(
        &self,
        id: TaskId,
        worker: &WorkerId,
        now_ms: u64,
        caps: &QueueCaps,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        verify_lease(&inner.state, id, worker, now_ms)?;
        let lease_expires_at_ms = now_ms + caps.visibility.as_millis() as u64;
        Self::commit(&mut inner, Event::TaskHeartbeat { id, lease_expires_at_ms })
    }

    /// Transition to a terminal state (compare-and-set on status).
    pub fn ack(
        &self,
        id: TaskId,
        outcome: TaskStatus,
        result: Option<TaskResult>,
        fault: Option<Fault>,
        posted: bool,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        debug_assert!(outcome.is_terminal());
        let mut inner = self.inner.lock();
        let task = inner.state.tasks.get(id.as_str()).ok_or(StoreError::TaskNotFound(id))?;
        if !task.status.can_transition(outcome) {
            return Err(StoreError::Conflict { id, from: task.status, to: outcome });
        }
        Self::commit(
            &mut inner,
            Event::TaskFinished { id, status: outcome, result, fault, posted, at_ms: now_ms },
        )
    }

    /// Clear the lease and schedule re-availability after `retry_after`.
    pub fn nack(&self, id: TaskId, retry_after: Duration, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let task = inner.state.tasks.get(id.as_str()).ok_or(StoreError::TaskNotFound(id))?;
        if !task.status.holds_lease() {
            return Err(StoreError::Conflict { id, from: task.status, to: TaskStatus::Queued });
        }
        let available_at_ms = now_ms + retry_after.as_millis() as u64;
        Self::commit(&mut inner, Event::TaskRequeued { id, available_at_ms, at_ms: now_ms })
    }

    /// Return expired leases to the queue. Each lease is reclaimed at most
    /// once: the status guard turns a second pass into a no-op. A task with
    /// a pending cancel request goes straight to `cancelled` instead of
    /// back into the queue (the queue never serves cancel-requested tasks).
    pub fn reclaim_expired(&self, now_ms: u64) -> Result<Vec<TaskId>, StoreError> {
        let mut inner = self.inner.lock();
        let expired: Vec<(TaskId, bool)> = inner
            .state
            .tasks
            .values()
            .filter(|t| t.status.holds_lease())
            .filter(|t| t.lease_expires_at_ms.is_some_and(|at| at <= now_ms))
            .map(|t| (t.id, t.cancel_requested))
            .collect();
        for (id, cancel_requested) in &expired {
            if *cancel_requested {
                Self::commit(
                    &mut inner,
                    Event::TaskFinished {
                        id: *id,
                        status: TaskStatus::Cancelled,
                        result: None,
                        fault: None,
                        posted: false,
                        at_ms: now_ms,
                    },
                )?;
            } else {
                Self::commit(&mut inner, Event::TaskLeaseReclaimed { id: *id, at_ms: now_ms })?;
            }
        }
        Ok(expired.into_iter().map(|(id, _)| id).collect())
    }

    /// Request cancellation. Queued tasks cancel immediately; in-flight
    /// tasks get the flag and cancel at the next checkpoint; terminal
    /// tasks are left alone.
    pub fn request_cancel(&self, id: TaskId, now_ms: u64) -> Result<TaskStatus, StoreError> {
        let mut inner = self.inner.lock();
        let task = inner.state.tasks.get(id.as_str()).ok_or(StoreError::TaskNotFound(id))?;
        match task.status {
            TaskStatus::Queued => {
                Self::commit(
                    &mut inner,
                    Event::TaskFinished {
                        id,
                        status: TaskStatus::Cancelled,
                        result: None,
                        fault: None,
                        posted: false,
                        at_ms: now_ms,
                    },
                )?;
                Ok(TaskStatus::Cancelled)
            }
            status if status.holds_lease() => {
                Self::commit(&mut inner, Event::TaskCancelRequested { id, at_ms: now_ms })?;
                Ok(status)
            }
            terminal => Ok(terminal),
        }
    }

    pub fn set_phase(&self, id: TaskId, phase: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(id.as_str()) {
            return Err(StoreError::TaskNotFound(id));
        }
        Self::commit(&mut inner, Event::TaskPhase { id, phase: phase.into() })
    }

    /// Record cumulative usage totals for a task.
    pub fn record_usage(
        &self,
        id: TaskId,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(id.as_str()) {
            return Err(StoreError::TaskNotFound(id));
        }
        Self::commit(&mut inner, Event::TaskUsage { id, input_tokens, output_tokens, cost_usd })
    }

    /// Record that the terminal artifact reached the source.
    pub fn mark_posted(
        &self,
        id: TaskId,
        artifact_id: impl Into<String>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(id.as_str()) {
            return Err(StoreError::TaskNotFound(id));
        }
        Self::commit(
            &mut inner,
            Event::TaskPosted { id, artifact_id: artifact_id.into(), at_ms: now_ms },
        )
    }

    // ---- markers ----

    /// Set a TTL marker. Returns `false` (and writes nothing) when the key
    /// is already present and unexpired.
    pub fn set_marker_if_absent(
        &self,
        key: impl Into<String>,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = key.into();
        let mut inner = self.inner.lock();
        if let Some(marker) = inner.state.markers.get(&key) {
            if marker.expires_at_ms > now_ms {
                return Ok(false);
            }
        }
        let expires_at_ms = now_ms + ttl.as_millis() as u64;
        Self::commit(&mut inner, Event::MarkerSet { key, expires_at_ms })?;
        Ok(true)
    }

    pub fn marker_present(&self, key: &str, now_ms: u64) -> bool {
        self.inner.lock().state.markers.get(key).is_some_and(|m| m.expires_at_ms > now_ms)
    }

    /// Roll back a marker whose guarded action was refused, so a retry of
    /// the same delivery is not treated as a duplicate.
    pub fn clear_marker(&self, key: impl Into<String>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(&mut inner, Event::MarkerCleared { key: key.into() })
    }

    // ---- spend ----

    /// Add `delta_usd` to the org's ledger for `day`, returning the new
    /// day total.
    pub fn record_spend(
        &self,
        org: &OrgId,
        day: &str,
        delta_usd: f64,
    ) -> Result<f64, StoreError> {
        let mut inner = self.inner.lock();
        let current =
            inner.state.spend.get(org).map(|l| l.total_for(day)).unwrap_or(0.0);
        let total_usd = current + delta_usd;
        Self::commit(
            &mut inner,
            Event::SpendRecorded { org: org.clone(), day: day.to_string(), total_usd },
        )?;
        Ok(total_usd)
    }

    pub fn spend_for(&self, org: &OrgId, day: &str) -> f64 {
        self.inner.lock().state.spend.get(org).map(|l| l.total_for(day)).unwrap_or(0.0)
    }

    // ---- workspaces ----

    pub fn record_workspace(&self, record: WorkspaceRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(
            &mut inner,
            Event::WorkspaceRecorded {
                id: record.id,
                provider: record.provider,
                org: record.org,
                repo: record.repo,
                git_ref: record.git_ref,
                path: record.path,
                head: record.head,
                last_access_ms: record.last_access_ms,
            },
        )
    }

    pub fn evict_workspace(&self, id: WorkspaceId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(&mut inner, Event::WorkspaceEvicted { id })
    }

    pub fn workspaces(&self) -> Vec<WorkspaceRecord> {
        self.inner.lock().state.workspaces.values().cloned().collect()
    }

    // ---- introspection ----

    pub fn queue_depth(&self) -> usize {
        queued_count(&self.inner.lock().state)
    }

    pub fn inflight(&self) -> usize {
        inflight_count(&self.inner.lock().state)
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            queued: queued_count(&inner.state),
            inflight: inflight_count(&inner.state),
            terminal: inner.state.tasks.values().filter(|t| t.is_terminal()).count(),
            installations: inner.state.installations.values().filter(|i| i.active).count(),
            markers: inner.state.markers.len(),
            workspaces: inner.state.workspaces.len(),
        }
    }
}

fn queued_count(state: &MaterializedState) -> usize {
    state.tasks.values().filter(|t| t.status == TaskStatus::Queued).count()
}

fn inflight_count(state: &MaterializedState) -> usize {
    state.tasks.values().filter(|t| t.status.holds_lease()).count()
}

fn inflight_for_org(state: &MaterializedState, org: &OrgId) -> usize {
    state.tasks.values().filter(|t| t.status.holds_lease() && &t.org == org).count()
}

fn verify_lease(
    state: &MaterializedState,
    id: TaskId,
    worker: &WorkerId,
    now_ms: u64,
) -> Result<(), StoreError> {
    let task = state.tasks.get(id.as_str()).ok_or(StoreError::TaskNotFound(id))?;
    if !task.status.holds_lease() || task.worker.as_ref() != Some(worker) {
        return Err(StoreError::LeaseNotHeld { id, worker: worker.to_string() });
    }
    if task.lease_expires_at_ms.is_some_and(|at| at <= now_ms) {
        return Err(StoreError::LeaseExpired(id));
    }
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
