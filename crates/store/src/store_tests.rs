// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use gantry_core::test_support::{installation, queued_task, queued_task_with_priority};
use gantry_core::Command;
use tempfile::{tempdir, TempDir};

fn open_store() -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (dir, store)
}

fn caps() -> QueueCaps {
    QueueCaps::default()
}

const NOW: u64 = 1_000_000;

#[test]
fn enqueue_is_idempotent_on_task_id() {
    let (_dir, store) = open_store();
    let task = queued_task("acme", Command::Analyze, NOW);

    assert!(store.create_task(task.clone(), &caps()).unwrap());
    assert!(!store.create_task(task, &caps()).unwrap());
    assert_eq!(store.queue_depth(), 1);
}

#[test]
fn backpressure_sheds_low_but_admits_critical() {
    let (_dir, store) = open_store();
    let caps = QueueCaps { soft_limit: 2, hard_limit: 4, ..QueueCaps::default() };

    for i in 0..2 {
        let task = queued_task(&format!("org{i}"), Command::Analyze, NOW + i as u64);
        store.create_task(task, &caps).unwrap();
    }

    // Past the soft limit: normal sheds, critical is admitted.
    let normal = queued_task("acme", Command::Analyze, NOW + 10);
    assert!(matches!(store.create_task(normal, &caps), Err(StoreError::TooBusy)));

    let critical = queued_task_with_priority("acme", Priority::Critical, NOW + 11);
    assert!(store.create_task(critical, &caps).unwrap());

    // Past the hard limit: everything sheds.
    let task = queued_task_with_priority("other", Priority::High, NOW + 12);
    store.create_task(task, &caps).unwrap();
    let critical = queued_task_with_priority("late", Priority::Critical, NOW + 13);
    assert!(matches!(store.create_task(critical, &caps), Err(StoreError::TooBusy)));
}

#[test]
fn lease_serves_higher_band_first() {
    let (_dir, store) = open_store();
    let low = queued_task_with_priority("acme", Priority::Low, NOW);
    let high = queued_task_with_priority("beta", Priority::High, NOW + 5);
    store.create_task(low.clone(), &caps()).unwrap();
    store.create_task(high.clone(), &caps()).unwrap();

    let worker = WorkerId::new("w0");
    let leased = store.lease(&worker, NOW + 10, &caps()).unwrap().unwrap();
    assert_eq!(leased.id, high.id, "high band must preempt low despite FIFO age");
    assert_eq!(leased.status, TaskStatus::Leased);
    assert_eq!(leased.attempt, 1);
    assert_eq!(leased.worker, Some(worker));
}

#[test]
fn lease_is_fifo_within_band() {
    let (_dir, store) = open_store();
    let first = queued_task("a", Command::Analyze, NOW);
    let second = queued_task("b", Command::Analyze, NOW + 1);
    store.create_task(second.clone(), &caps()).unwrap();
    store.create_task(first.clone(), &caps()).unwrap();

    let leased = store.lease(&WorkerId::new("w0"), NOW + 10, &caps()).unwrap().unwrap();
    assert_eq!(leased.id, first.id);
}

#[test]
fn lease_respects_scheduled_for() {
    let (_dir, store) = open_store();
    let mut task = queued_task("acme", Command::Analyze, NOW);
    task.scheduled_for_ms = NOW + 60_000;
    store.create_task(task.clone(), &caps()).unwrap();

    assert!(store.lease(&WorkerId::new("w0"), NOW, &caps()).unwrap().is_none());
    assert!(store.lease(&WorkerId::new("w0"), NOW + 60_000, &caps()).unwrap().is_some());
}

#[test]
fn lease_respects_per_org_cap() {
    let (_dir, store) = open_store();
    for i in 0..3 {
        store.create_task(queued_task("acme", Command::Analyze, NOW + i), &caps()).unwrap();
    }
    store.create_task(queued_task("beta", Command::Analyze, NOW + 10), &caps()).unwrap();

    let w = WorkerId::new("w0");
    assert_eq!(store.lease(&w, NOW + 20, &caps()).unwrap().unwrap().org.as_str(), "acme");
    assert_eq!(store.lease(&w, NOW + 20, &caps()).unwrap().unwrap().org.as_str(), "acme");
    // acme is at its cap of 2: its third task yields to beta's younger one.
    assert_eq!(store.lease(&w, NOW + 20, &caps()).unwrap().unwrap().org.as_str(), "beta");
    assert!(store.lease(&w, NOW + 20, &caps()).unwrap().is_none());
}

#[test]
fn lease_respects_global_cap() {
    let (_dir, store) = open_store();
    let caps = QueueCaps { global_inflight: 2, per_org_inflight: 2, ..QueueCaps::default() };
    for org in ["a", "b", "c"] {
        store.create_task(queued_task(org, Command::Analyze, NOW), &caps).unwrap();
    }
    let w = WorkerId::new("w0");
    assert!(store.lease(&w, NOW + 1, &caps).unwrap().is_some());
    assert!(store.lease(&w, NOW + 1, &caps).unwrap().is_some());
    assert!(store.lease(&w, NOW + 1, &caps).unwrap().is_none());
    assert_eq!(store.inflight(), 2);
}

#[test]
fn heartbeat_extends_only_for_owner() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let w0 = WorkerId::new("w0");
    let leased = store.lease(&w0, NOW, &caps()).unwrap().unwrap();

    store.heartbeat(leased.id, &w0, NOW + 120_000, &caps()).unwrap();
    let task = store.task(&leased.id).unwrap();
    assert_eq!(task.lease_expires_at_ms, Some(NOW + 120_000 + 600_000));

    let w1 = WorkerId::new("w1");
    assert!(matches!(
        store.heartbeat(leased.id, &w1, NOW + 120_000, &caps()),
        Err(StoreError::LeaseNotHeld { .. })
    ));
}

#[test]
fn heartbeat_fails_after_expiry() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let w0 = WorkerId::new("w0");
    let leased = store.lease(&w0, NOW, &caps()).unwrap().unwrap();

    let after_expiry = NOW + 600_000;
    assert!(matches!(
        store.heartbeat(leased.id, &w0, after_expiry, &caps()),
        Err(StoreError::LeaseExpired(_))
    ));
}

#[test]
fn ack_enforces_state_machine() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let w0 = WorkerId::new("w0");
    let leased = store.lease(&w0, NOW, &caps()).unwrap().unwrap();

    // leased -> timed-out is not an edge; the CAS must refuse.
    assert!(matches!(
        store.ack(leased.id, TaskStatus::TimedOut, None, None, false, NOW + 1),
        Err(StoreError::Conflict { .. })
    ));

    store.start(leased.id, &w0, NOW + 1).unwrap();
    store.ack(leased.id, TaskStatus::TimedOut, None, None, false, NOW + 2).unwrap();

    // Terminal is absorbing.
    assert!(matches!(
        store.ack(leased.id, TaskStatus::Succeeded, None, None, true, NOW + 3),
        Err(StoreError::Conflict { .. })
    ));
}

#[test]
fn nack_schedules_retry() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let w0 = WorkerId::new("w0");
    let leased = store.lease(&w0, NOW, &caps()).unwrap().unwrap();

    store.nack(leased.id, Duration::from_secs(30), NOW + 5_000).unwrap();
    let task = store.task(&leased.id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.scheduled_for_ms, NOW + 35_000);
    assert_eq!(task.attempt, 1);
    assert!(task.lease_consistent());

    // Second lease bumps the attempt counter.
    let again = store.lease(&w0, NOW + 40_000, &caps()).unwrap().unwrap();
    assert_eq!(again.id, leased.id);
    assert_eq!(again.attempt, 2);
}

#[test]
fn reclaim_returns_expired_lease_exactly_once() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let leased = store.lease(&WorkerId::new("w0"), NOW, &caps()).unwrap().unwrap();

    let before_expiry = NOW + 1_000;
    assert!(store.reclaim_expired(before_expiry).unwrap().is_empty());

    let after_expiry = NOW + 600_000;
    assert_eq!(store.reclaim_expired(after_expiry).unwrap(), vec![leased.id]);
    assert!(store.reclaim_expired(after_expiry).unwrap().is_empty());

    let task = store.task(&leased.id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.lease_consistent());
}

#[test]
fn cancel_queued_is_immediate() {
    let (_dir, store) = open_store();
    let task = queued_task("acme", Command::Analyze, NOW);
    store.create_task(task.clone(), &caps()).unwrap();

    assert_eq!(store.request_cancel(task.id, NOW + 1).unwrap(), TaskStatus::Cancelled);
    assert_eq!(store.task(&task.id).unwrap().status, TaskStatus::Cancelled);
    // Cancelled tasks never lease.
    assert!(store.lease(&WorkerId::new("w0"), NOW + 10, &caps()).unwrap().is_none());
}

#[test]
fn cancel_inflight_sets_flag() {
    let (_dir, store) = open_store();
    store.create_task(queued_task("acme", Command::Analyze, NOW), &caps()).unwrap();
    let leased = store.lease(&WorkerId::new("w0"), NOW, &caps()).unwrap().unwrap();

    assert_eq!(store.request_cancel(leased.id, NOW + 1).unwrap(), TaskStatus::Leased);
    assert!(store.task(&leased.id).unwrap().cancel_requested);
}

#[test]
fn markers_are_set_if_absent_with_ttl() {
    let (_dir, store) = open_store();
    let ttl = Duration::from_secs(3600);

    assert!(store.set_marker_if_absent("dedup:github:d1", NOW, ttl).unwrap());
    assert!(!store.set_marker_if_absent("dedup:github:d1", NOW + 1, ttl).unwrap());
    assert!(store.marker_present("dedup:github:d1", NOW + 1));

    // After expiry the key is free again.
    let later = NOW + 3_600_000;
    assert!(!store.marker_present("dedup:github:d1", later));
    assert!(store.set_marker_if_absent("dedup:github:d1", later, ttl).unwrap());
}

#[test]
fn spend_accumulates_per_day() {
    let (_dir, store) = open_store();
    let org = OrgId::new("acme");
    assert_eq!(store.record_spend(&org, "2026-08-01", 0.25).unwrap(), 0.25);
    assert_eq!(store.record_spend(&org, "2026-08-01", 0.50).unwrap(), 0.75);
    assert!((store.spend_for(&org, "2026-08-01") - 0.75).abs() < 1e-9);
    assert_eq!(store.spend_for(&org, "2026-08-02"), 0.0);
}

#[test]
fn installations_enforce_one_active_per_pair() {
    let (_dir, store) = open_store();
    store.create_installation(installation(Provider::Github, "acme")).unwrap();
    assert!(matches!(
        store.create_installation(installation(Provider::Github, "acme")),
        Err(StoreError::AlreadyExists { .. })
    ));

    // Another provider for the same org is fine.
    store.create_installation(installation(Provider::Jira, "acme")).unwrap();

    // After revoke, a fresh install is allowed.
    let current = store.active_installation(Provider::Github, "acme").unwrap();
    store.revoke_installation(current.id, NOW).unwrap();
    store.create_installation(installation(Provider::Github, "acme")).unwrap();
}

#[test]
fn credentials_are_ciphertext_at_rest() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut inst = installation(Provider::Github, "acme");
    inst.access_token = gantry_core::Secret::new("ghs_very_secret_token");
    store.create_installation(inst).unwrap();

    // Reads come back in the clear...
    let row = store.active_installation(Provider::Github, "acme").unwrap();
    assert_eq!(row.access_token.expose(), "ghs_very_secret_token");
    assert_eq!(row.webhook_secret.as_ref().unwrap().expose(), "whsec-test");

    // ...but nothing on disk carries the plaintext.
    let wal = std::fs::read_to_string(dir.path().join("gantry.wal")).unwrap();
    assert!(!wal.contains("ghs_very_secret_token"));
    assert!(!wal.contains("whsec-test"));

    // And the sealed rows survive a reopen with the persisted key.
    drop(store);
    let store = Store::open(dir.path()).unwrap();
    let row = store.active_installation(Provider::Github, "acme").unwrap();
    assert_eq!(row.access_token.expose(), "ghs_very_secret_token");
}

#[test]
fn state_survives_reopen() {
    let dir = tempdir().unwrap();
    let task = queued_task("acme", Command::Fix, NOW);
    {
        let store = Store::open(dir.path()).unwrap();
        store.create_task(task.clone(), &caps()).unwrap();
        store.lease(&WorkerId::new("w0"), NOW, &caps()).unwrap().unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    let restored = store.task(&task.id).unwrap();
    assert_eq!(restored.status, TaskStatus::Leased);
    assert_eq!(restored.attempt, 1);
    assert_eq!(store.inflight(), 1);
}

#[test]
fn snapshot_compacts_without_changing_state() {
    let dir = tempdir().unwrap();
    let task = queued_task("acme", Command::Fix, NOW);
    {
        let store = Store::open(dir.path()).unwrap();
        store.create_task(task.clone(), &caps()).unwrap();
        store.set_marker_if_absent("dedup:github:old", NOW, Duration::from_secs(1)).unwrap();
        store.set_marker_if_absent("dedup:github:new", NOW, Duration::from_secs(3600)).unwrap();
        store.snapshot(NOW + 10_000).unwrap();
        // Post-snapshot writes land in the fresh WAL.
        store.request_cancel(task.id, NOW + 20_000).unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.task(&task.id).unwrap().status, TaskStatus::Cancelled);
    // The expired marker was pruned at snapshot time, the live one kept.
    assert!(store.marker_present("dedup:github:new", NOW + 20_000));
    assert!(!store.marker_present("dedup:github:old", NOW + 20_000));
    assert_eq!(store.stats().markers, 1);
}
