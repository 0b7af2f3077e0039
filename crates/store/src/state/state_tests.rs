// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use gantry_core::test_support::queued_task;
use gantry_core::{Command, Secret, TaskId, TaskStatus, WorkerId};

fn created(state: &mut MaterializedState, now: u64) -> TaskId {
    let task = queued_task("acme", Command::Analyze, now);
    let id = task.id;
    state.apply_event(&Event::TaskCreated { task });
    id
}

/// Apply `event` twice and assert the state after each pass is identical.
fn assert_idempotent(state: &mut MaterializedState, event: &Event) {
    state.apply_event(event);
    let first = serde_json::to_value(&*state).unwrap();
    state.apply_event(event);
    let second = serde_json::to_value(&*state).unwrap();
    assert_eq!(first, second, "applier for {} is not idempotent", event.name());
}

#[test]
fn create_twice_is_single_task() {
    let mut state = MaterializedState::default();
    let task = queued_task("acme", Command::Analyze, 1_000);
    let event = Event::TaskCreated { task };
    assert_idempotent(&mut state, &event);
    assert_eq!(state.tasks.len(), 1);
}

#[test]
fn lease_increments_attempt_once() {
    let mut state = MaterializedState::default();
    let id = created(&mut state, 1_000);
    let lease = Event::TaskLeased {
        id,
        worker: WorkerId::new("w0"),
        lease_expires_at_ms: 601_000,
        at_ms: 1_000,
    };
    assert_idempotent(&mut state, &lease);

    let task = state.get_task(id.as_str()).unwrap();
    assert_eq!(task.status, TaskStatus::Leased);
    assert_eq!(task.attempt, 1);
    assert_eq!(task.lease_expires_at_ms, Some(601_000));
}

#[test]
fn finish_is_absorbing() {
    let mut state = MaterializedState::default();
    let id = created(&mut state, 1_000);
    state.apply_event(&Event::TaskLeased {
        id,
        worker: WorkerId::new("w0"),
        lease_expires_at_ms: 601_000,
        at_ms: 1_000,
    });
    state.apply_event(&Event::TaskStarted { id, at_ms: 2_000 });
    state.apply_event(&Event::TaskFinished {
        id,
        status: TaskStatus::Succeeded,
        result: None,
        fault: None,
        posted: true,
        at_ms: 3_000,
    });

    // A late reclaim or second finish must not move a terminal task.
    state.apply_event(&Event::TaskLeaseReclaimed { id, at_ms: 4_000 });
    state.apply_event(&Event::TaskFinished {
        id,
        status: TaskStatus::Failed,
        result: None,
        fault: None,
        posted: false,
        at_ms: 5_000,
    });

    let task = state.get_task(id.as_str()).unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(task.posted);
    assert!(task.lease_consistent());
}

#[test]
fn requeue_clears_lease() {
    let mut state = MaterializedState::default();
    let id = created(&mut state, 1_000);
    state.apply_event(&Event::TaskLeased {
        id,
        worker: WorkerId::new("w0"),
        lease_expires_at_ms: 601_000,
        at_ms: 1_000,
    });
    let requeue = Event::TaskRequeued { id, available_at_ms: 9_000, at_ms: 2_000 };
    assert_idempotent(&mut state, &requeue);

    let task = state.get_task(id.as_str()).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.scheduled_for_ms, 9_000);
    assert_eq!(task.lease_expires_at_ms, None);
    assert_eq!(task.worker, None);
    assert_eq!(task.attempt, 1);
}

#[test]
fn usage_totals_are_assigned_not_added() {
    let mut state = MaterializedState::default();
    let id = created(&mut state, 1_000);
    let usage = Event::TaskUsage { id, input_tokens: 100, output_tokens: 20, cost_usd: 0.05 };
    assert_idempotent(&mut state, &usage);

    let result = state.get_task(id.as_str()).unwrap().result.as_ref().unwrap();
    assert_eq!(result.input_tokens, 100);
    assert!((result.cost_usd - 0.05).abs() < 1e-9);
}

#[test]
fn revoke_soft_deletes() {
    let mut state = MaterializedState::default();
    let installation = gantry_core::test_support::installation(Provider::Github, "acme");
    let id = installation.id;
    state.apply_event(&Event::InstallationCreated { installation });
    assert!(state.active_installation(Provider::Github, "acme").is_some());

    let revoke = Event::InstallationRevoked { id, at_ms: 5_000 };
    assert_idempotent(&mut state, &revoke);

    assert!(state.active_installation(Provider::Github, "acme").is_none());
    assert!(state.installations.contains_key(id.as_str()), "row must survive revoke");
}

#[test]
fn token_refresh_updates_credentials() {
    let mut state = MaterializedState::default();
    let installation = gantry_core::test_support::installation(Provider::Jira, "acme");
    let id = installation.id;
    state.apply_event(&Event::InstallationCreated { installation });

    let refresh = Event::InstallationTokenRefreshed {
        id,
        access_token: Secret::new("tok-new"),
        refresh_token: None,
        expires_at_ms: Some(2_000_000),
        at_ms: 1_500_000,
    };
    assert_idempotent(&mut state, &refresh);

    let row = state.installations.get(id.as_str()).unwrap();
    assert_eq!(row.access_token.expose(), "tok-new");
    assert_eq!(row.expires_at_ms, Some(2_000_000));
}

#[test]
fn marker_set_keeps_longest_expiry() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MarkerSet { key: "dedup:github:d1".into(), expires_at_ms: 10_000 });
    state.apply_event(&Event::MarkerSet { key: "dedup:github:d1".into(), expires_at_ms: 5_000 });
    assert_eq!(state.markers["dedup:github:d1"].expires_at_ms, 10_000);
}

#[test]
fn marker_clear_is_idempotent() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MarkerSet { key: "dedup:github:d1".into(), expires_at_ms: 10_000 });
    let clear = Event::MarkerCleared { key: "dedup:github:d1".into() };
    assert_idempotent(&mut state, &clear);
    assert!(state.markers.is_empty());
}

#[test]
fn spend_total_is_monotone() {
    let mut state = MaterializedState::default();
    let org = OrgId::new("acme");
    state.apply_event(&Event::SpendRecorded { org: org.clone(), day: "2026-08-01".into(), total_usd: 1.5 });
    // A replayed older total must not roll the ledger back.
    state.apply_event(&Event::SpendRecorded { org: org.clone(), day: "2026-08-01".into(), total_usd: 0.5 });
    assert!((state.spend[&org].total_for("2026-08-01") - 1.5).abs() < 1e-9);
}
