// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! End-to-end scenarios: webhook ingress through worker execution to the
//! posted result, with fake runner, provider clients, and clock.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gantry_adapters::provider::{FakeProviderClient, ProviderCall, ProviderClient};
use gantry_adapters::runner::{FakeRunner, FakeScript};
use gantry_core::test_support::installation;
use gantry_core::{
    Backoff, Clock, Command, FakeClock, Priority, Provider, Secret, TaskStatus, WorkerId,
};
use gantry_daemon::ingress::{router, signature, AppState, IngressConfig};
use gantry_engine::budget::{BudgetConfig, BudgetLedger};
use gantry_engine::hooks::{BudgetGate, DiagnosticsCapture, HookRunner, UsageAccounting};
use gantry_engine::poster::ResultPoster;
use gantry_engine::task_log::TaskLogSink;
use gantry_engine::tokens::{StaticRefresher, TokenService, TokenServiceConfig};
use gantry_engine::worker::{TimeoutTable, Worker, WorkerConfig};
use gantry_engine::workspace::{FakeWorkspaces, Workspaces};
use gantry_store::{QueueCaps, Store, TaskFilter};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const NOW: u64 = 1_785_585_600_000; // 2026-08-01T12:00:00Z
const SECRET: &str = "whsec-test";

struct Platform {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    clock: FakeClock,
    runner: FakeRunner,
    client: FakeProviderClient,
    state: AppState<FakeClock>,
    worker: Worker<FakeClock>,
}

impl Platform {
    fn new() -> Self {
        Self::with_timeouts(TimeoutTable::default())
    }

    fn with_timeouts(timeouts: TimeoutTable) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("state")).unwrap());
        let clock = FakeClock::new();
        clock.set_epoch_ms(NOW);
        store.create_installation(installation(Provider::Github, "acme")).unwrap();

        let workspaces: Arc<dyn Workspaces> =
            Arc::new(FakeWorkspaces::new(dir.path().join("ws")));
        let state = AppState::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::clone(&workspaces),
            IngressConfig::default(),
        );

        let runner = FakeRunner::new();
        let client = FakeProviderClient::new();
        let tokens = Arc::new(TokenService::new(
            Arc::clone(&store),
            Arc::new(StaticRefresher::new("tok", None)),
            clock.clone(),
            TokenServiceConfig::default(),
        ));
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        for provider in Provider::ALL {
            clients.insert(provider, Arc::new(client.clone()));
        }
        let poster = Arc::new(
            ResultPoster::new(clients, Arc::clone(&store), clock.clone()).with_backoff(Backoff {
                base: Duration::from_millis(1),
                cap: Duration::from_millis(2),
                jitter_ratio: 0.0,
                max_attempts: 3,
            }),
        );
        let budget = Arc::new(BudgetLedger::new(Arc::clone(&store), BudgetConfig::default()));
        let log_sink = Arc::new(TaskLogSink::new(dir.path().join("logs")));
        let hooks = Arc::new(HookRunner::new(vec![
            Arc::new(BudgetGate::new(BudgetConfig::default())),
            Arc::new(UsageAccounting::new(Arc::clone(&budget))),
            Arc::new(DiagnosticsCapture::new(Arc::clone(&log_sink))),
        ]));
        let worker = Worker::new(
            WorkerId::new("w0"),
            Arc::clone(&store),
            tokens,
            workspaces,
            Arc::new(runner.clone()),
            poster,
            hooks,
            budget,
            log_sink,
            clock.clone(),
            WorkerConfig {
                timeouts,
                heartbeat_every: Duration::from_millis(20),
                grace: Duration::from_millis(40),
                poll_interval: Duration::from_millis(5),
                ..WorkerConfig::default()
            },
        );

        Self { _dir: dir, store, clock, runner, client, state, worker }
    }

    async fn deliver(&self, delivery: &str, comment_id: u64, text: &str) -> (StatusCode, Value) {
        let body = json!({
            "action": "created",
            "comment": {
                "id": comment_id,
                "body": text,
                "user": { "login": "dev", "type": "User" }
            },
            "issue": { "number": 42 },
            "repository": { "full_name": "acme/widgets", "owner": { "login": "acme" } }
        })
        .to_string()
        .into_bytes();

        let sig = signature::sign(Provider::Github, &Secret::new(SECRET), None, &body);
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("x-github-event", "issue_comment")
            .header("x-github-delivery", delivery)
            .header("x-hub-signature-256", sig)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Lease the next task and run it to settlement.
    async fn work_one(&self) {
        let task = self
            .store
            .lease(&WorkerId::new("w0"), self.clock.epoch_ms(), &QueueCaps::default())
            .unwrap()
            .expect("a task should be leaseable");
        self.worker.execute(task, &CancellationToken::new()).await.unwrap();
    }

    fn task_count(&self) -> usize {
        self.store.list_tasks(&TaskFilter::default()).total
    }

    fn posted_comment_bodies(&self) -> Vec<String> {
        self.client
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Comment { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Variant with a string comment id (echoes carry our posted id).
    async fn deliver_with_comment_id(
        &self,
        delivery: &str,
        comment_id: &str,
        text: &str,
    ) -> (StatusCode, Value) {
        let body = json!({
            "action": "created",
            "comment": {
                "id": comment_id,
                "body": text,
                "user": { "login": "gantry-bot", "type": "User" }
            },
            "issue": { "number": 42 },
            "repository": { "full_name": "acme/widgets", "owner": { "login": "acme" } }
        })
        .to_string()
        .into_bytes();
        let sig = signature::sign(Provider::Github, &Secret::new(SECRET), None, &body);
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("x-github-event", "issue_comment")
            .header("x-github-delivery", delivery)
            .header("x-hub-signature-256", sig)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn scenario_1_github_analyze_end_to_end() {
    let platform = Platform::new();
    platform.runner.push_script(FakeScript::success("## Analysis\n\nThe widget is sound."));

    let (status, reply) = platform.deliver("d-9001", 9001, "@agent analyze").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["status"], "queued");

    let task_id: gantry_core::TaskId = reply["task_id"].as_str().unwrap().into();
    let queued = platform.store.task(&task_id).unwrap();
    assert_eq!(queued.command, Command::Analyze);
    assert_eq!(queued.priority, Priority::Normal);

    platform.work_one().await;

    let done = platform.store.task(&task_id).unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert!(done.posted);

    // One comment on acme/widgets#42 carrying the artifact.
    let calls = platform.client.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        ProviderCall::Comment { target, body } => {
            assert_eq!(target.repository.as_deref(), Some("acme/widgets"));
            assert_eq!(target.number, Some(42));
            assert!(body.contains("The widget is sound."));
        }
        other => panic!("expected comment, got {other:?}"),
    }

    // The posted marker was recorded under the new artifact id.
    assert!(platform.store.marker_present("posted:github:c-fake-1", platform.clock.epoch_ms()));
}

#[tokio::test]
async fn scenario_2_duplicate_delivery_is_deduplicated() {
    let platform = Platform::new();

    let (status, first) = platform.deliver("d-7", 9001, "@agent analyze").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "queued");

    // Same X-GitHub-Delivery resent within the hour.
    let (status, second) = platform.deliver("d-7", 9001, "@agent analyze").await;
    assert_eq!(status, StatusCode::OK, "the replay is acknowledged");
    assert_eq!(second["reason"], "duplicate");
    assert_eq!(platform.task_count(), 1);
}

#[tokio::test]
async fn scenario_3_bot_echo_creates_no_task() {
    let platform = Platform::new();
    platform.runner.push_script(FakeScript::success("## Analysis\n\n@agent analyze echo bait"));

    platform.deliver("d-1", 9001, "@agent analyze").await;
    platform.work_one().await;
    assert_eq!(platform.task_count(), 1);

    // The webhook for our own freshly posted comment: its comment id is
    // the artifact id the poster recorded before the HTTP call returned.
    let (status, echo) = platform
        .deliver_with_comment_id("d-echo", "c-fake-1", "## Analysis\n\n@agent analyze echo bait")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(echo["reason"], "self-generated");
    assert_eq!(platform.task_count(), 1, "only the original task exists");
}

#[tokio::test]
async fn scenario_4_budget_exhaustion_refuses_with_message() {
    let platform = Platform::new();
    let org = gantry_core::OrgId::new("acme");
    platform.store.record_spend(&org, &BudgetLedger::day_key(NOW), 100.0).unwrap();

    let (_, reply) = platform.deliver("d-1", 9001, "@agent fix").await;
    assert_eq!(reply["status"], "queued", "ingress admits; the worker enforces budget");

    platform.work_one().await;

    let task_id: gantry_core::TaskId = reply["task_id"].as_str().unwrap().into();
    let task = platform.store.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.fault.as_ref().unwrap().kind, gantry_core::ErrorKind::Permanent);
    assert_eq!(platform.runner.spawn_count(), 0);

    let bodies = platform.posted_comment_bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("Daily budget exceeded — try again tomorrow."));
}

#[tokio::test]
async fn scenario_5_timeout_posts_partial_findings() {
    let platform = Platform::with_timeouts(TimeoutTable::new(HashMap::from([(
        Command::Review,
        Duration::from_millis(80),
    )])));
    // Twelve progress events, then a stall.
    platform.runner.push_script(FakeScript::stalled(12, true));

    let (_, reply) = platform.deliver("d-1", 9001, "@agent review").await;
    let task_id: gantry_core::TaskId = reply["task_id"].as_str().unwrap().into();

    platform.work_one().await;

    let task = platform.store.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::TimedOut);

    let bodies = platform.posted_comment_bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].contains("Timed out"), "notice: {}", bodies[0]);
    assert!(bodies[0].contains("step-11"), "last phase reached: {}", bodies[0]);
    assert!(bodies[0].contains("narrowing the scope"));
}

#[tokio::test]
async fn scenario_6_crash_recovery_runs_to_completion_once() {
    let platform = Platform::new();
    platform.runner.push_script(FakeScript::success("## Recovered result"));

    let (_, reply) = platform.deliver("d-1", 9001, "@agent implement").await;
    let task_id: gantry_core::TaskId = reply["task_id"].as_str().unwrap().into();

    // A worker leases and then crashes: no start, no heartbeat, no ack.
    let crashed = platform
        .store
        .lease(&WorkerId::new("w-crashed"), NOW, &QueueCaps::default())
        .unwrap()
        .unwrap();
    assert_eq!(crashed.id, task_id);
    assert_eq!(crashed.attempt, 1);

    // Four minutes pass: lease still live, nothing to reclaim.
    platform.clock.advance(Duration::from_secs(240));
    assert!(platform.store.reclaim_expired(platform.clock.epoch_ms()).unwrap().is_empty());

    // Visibility timeout passes; the lease is reclaimed exactly once.
    platform.clock.advance(Duration::from_secs(400));
    let reclaimed = platform.store.reclaim_expired(platform.clock.epoch_ms()).unwrap();
    assert_eq!(reclaimed, vec![task_id]);

    // Another worker picks it up and finishes the job.
    platform.work_one().await;

    let task = platform.store.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempt, 2);
    assert_eq!(platform.posted_comment_bodies().len(), 1, "exactly one artifact posted");
}
