// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Task event appliers.
//!
//! Transitions are guarded by the current status so replaying an event a
//! second time is a no-op: the first application performs the transition,
//! the second sees the target state and leaves it alone.

use super::MaterializedState;
use gantry_core::{Event, TaskStatus};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::TaskCreated { task } => {
            // Enqueue idempotence: re-creating an existing id is a no-op.
            if !state.tasks.contains_key(task.id.as_str()) {
                state.tasks.insert(task.id.as_str().to_string(), task.clone());
            }
        }

        Event::TaskLeased { id, worker, lease_expires_at_ms, .. } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                // Attempt increments only on the queued -> leased edge.
                if task.status == TaskStatus::Queued {
                    task.status = TaskStatus::Leased;
                    task.attempt += 1;
                    task.worker = Some(worker.clone());
                    task.lease_expires_at_ms = Some(*lease_expires_at_ms);
                }
            }
        }

        Event::TaskStarted { id, at_ms } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                if task.status == TaskStatus::Leased {
                    task.status = TaskStatus::Running;
                    task.started_at_ms = Some(*at_ms);
                }
            }
        }

        Event::TaskHeartbeat { id, lease_expires_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                if task.status.holds_lease() {
                    task.lease_expires_at_ms = Some(*lease_expires_at_ms);
                }
            }
        }

        Event::TaskPhase { id, phase } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                task.phase = Some(phase.clone());
            }
        }

        Event::TaskUsage { id, input_tokens, output_tokens, cost_usd } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                // Totals are assigned, never added: idempotent on replay.
                let result = task.result.get_or_insert_with(Default::default);
                result.input_tokens = *input_tokens;
                result.output_tokens = *output_tokens;
                result.cost_usd = *cost_usd;
            }
        }

        Event::TaskRequeued { id, available_at_ms, .. } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                if task.status.holds_lease() {
                    task.status = TaskStatus::Queued;
                    task.scheduled_for_ms = *available_at_ms;
                    task.lease_expires_at_ms = None;
                    task.worker = None;
                }
            }
        }

        Event::TaskLeaseReclaimed { id, .. } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                // Reclaim happens exactly once per expiry: the guard is the
                // same leased/running check a competing worker's ack uses.
                if task.status.holds_lease() {
                    task.status = TaskStatus::Queued;
                    task.lease_expires_at_ms = None;
                    task.worker = None;
                }
            }
        }

        Event::TaskCancelRequested { id, .. } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                if !task.is_terminal() {
                    task.cancel_requested = true;
                }
            }
        }

        Event::TaskFinished { id, status, result, fault, posted, at_ms } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                if !task.is_terminal() {
                    task.status = *status;
                    task.lease_expires_at_ms = None;
                    task.worker = None;
                    task.finished_at_ms = Some(*at_ms);
                    task.posted = *posted;
                    if let Some(result) = result {
                        task.result = Some(result.clone());
                    }
                    task.fault = fault.clone();
                }
            }
        }

        Event::TaskPosted { id, .. } => {
            if let Some(task) = state.tasks.get_mut(id.as_str()) {
                task.posted = true;
            }
        }

        _ => {}
    }
}
