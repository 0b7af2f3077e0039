// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use crate::budget::{BudgetConfig, DAILY_BUDGET_MESSAGE};
use crate::hooks::{BudgetGate, DiagnosticsCapture, UsageAccounting};
use crate::poster::ResultPoster;
use crate::tokens::{StaticRefresher, TokenServiceConfig};
use crate::workspace::FakeWorkspaces;
use gantry_adapters::provider::{FakeProviderClient, ProviderClient};
use gantry_adapters::runner::{FakeRunner, FakeScript};
use gantry_core::test_support::{installation, queued_task};
use gantry_core::{FakeClock, Provider};
use std::sync::atomic::Ordering;

const NOW: u64 = 1_000_000;

struct Rig {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    clock: FakeClock,
    runner: FakeRunner,
    client: FakeProviderClient,
    workspaces: Arc<FakeWorkspaces>,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("state")).unwrap());
        let clock = FakeClock::new();
        clock.set_epoch_ms(NOW);
        store.create_installation(installation(Provider::Github, "acme")).unwrap();

        let workspaces = Arc::new(FakeWorkspaces::new(dir.path().join("ws")));
        Self { _dir: dir, store, clock, runner: FakeRunner::new(), client: FakeProviderClient::new(), workspaces }
    }

    fn worker(&self, hooks: Vec<Arc<dyn crate::hooks::Hook>>, config: WorkerConfig) -> Worker<FakeClock> {
        let tokens = Arc::new(TokenService::new(
            Arc::clone(&self.store),
            Arc::new(StaticRefresher::new("tok-fresh", None)),
            self.clock.clone(),
            TokenServiceConfig::default(),
        ));
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        for provider in Provider::ALL {
            clients.insert(provider, Arc::new(self.client.clone()));
        }
        let poster = Arc::new(
            ResultPoster::new(clients, Arc::clone(&self.store), self.clock.clone()).with_backoff(
                Backoff {
                    base: Duration::from_millis(1),
                    cap: Duration::from_millis(2),
                    jitter_ratio: 0.0,
                    max_attempts: 3,
                },
            ),
        );
        let budget = Arc::new(BudgetLedger::new(Arc::clone(&self.store), BudgetConfig::default()));
        let log_sink = Arc::new(TaskLogSink::new(self._dir.path().join("logs")));

        // Same hook set the daemon registers, plus the test's own.
        let mut all_hooks: Vec<Arc<dyn crate::hooks::Hook>> = vec![
            Arc::new(BudgetGate::new(BudgetConfig::default())),
            Arc::new(UsageAccounting::new(Arc::clone(&budget))),
            Arc::new(DiagnosticsCapture::new(Arc::clone(&log_sink))),
        ];
        all_hooks.extend(hooks);

        Worker::new(
            WorkerId::new("w0"),
            Arc::clone(&self.store),
            tokens,
            Arc::clone(&self.workspaces) as Arc<dyn Workspaces>,
            Arc::new(self.runner.clone()),
            poster,
            Arc::new(HookRunner::new(all_hooks)),
            budget,
            log_sink,
            self.clock.clone(),
            config,
        )
    }

    fn leased_task(&self, command: Command) -> Task {
        let task = queued_task("acme", command, NOW);
        self.store.create_task(task, &QueueCaps::default()).unwrap();
        self.store.lease(&WorkerId::new("w0"), NOW, &QueueCaps::default()).unwrap().unwrap()
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        heartbeat_every: Duration::from_millis(20),
        grace: Duration::from_millis(40),
        poll_interval: Duration::from_millis(5),
        retry_backoff: Backoff {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            jitter_ratio: 0.0,
            max_attempts: u32::MAX,
        },
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn clean_run_succeeds_and_posts_artifact() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::success("## Findings\n\nAll good."));
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Analyze);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let done = rig.store.task(&task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert!(done.posted);
    assert!(done.lease_consistent());
    let result = done.result.unwrap();
    assert!(result.summary.contains("All good"));
    assert_eq!(result.input_tokens, 1200);
    assert!((result.cost_usd - 0.04).abs() < 1e-9);

    // Exactly one outbound message, and the posted marker is durable.
    assert_eq!(rig.client.call_count(), 1);
    assert!(rig.store.marker_present("posted:github:c-fake-1", NOW + 1));

    // The workspace came and went.
    assert_eq!(rig.workspaces.acquires.load(Ordering::SeqCst), 1);
    assert_eq!(rig.workspaces.releases.load(Ordering::SeqCst), 1);

    // Org spend was recorded for the day.
    assert!(rig.store.spend_for(&task.org, &BudgetLedger::day_key(NOW)) > 0.0);
}

#[tokio::test]
async fn transient_error_requeues_with_backoff() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::error(ErrorKind::Transient, "rate limited upstream"));
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Fix);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let requeued = rig.store.task(&task.id).unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert!(requeued.lease_consistent());
    // attempt 1 -> backoff min(2^1, 300) = 2s from now.
    assert_eq!(requeued.scheduled_for_ms, NOW + 2_000);
    assert_eq!(rig.client.call_count(), 0, "transient retries are silent");

    // Workspace still released on the retry path.
    assert_eq!(rig.workspaces.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn permanent_error_fails_and_reports() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::error(ErrorKind::Permanent, "branch was deleted"));
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Review);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let failed = rig.store.task(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.fault.as_ref().unwrap().kind, ErrorKind::Permanent);
    assert_eq!(rig.client.call_count(), 1, "permanent failures report once");
}

#[tokio::test]
async fn user_error_is_never_retried() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::error(ErrorKind::User, "I need a PR number for review"));
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Review);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let failed = rig.store.task(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(rig.runner.spawn_count(), 1);
}

#[tokio::test]
async fn timeout_kills_runner_and_reports_phase() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::stalled(3, true));
    let mut config = fast_config();
    config.timeouts =
        TimeoutTable::new(HashMap::from([(Command::Review, Duration::from_millis(60))]));
    let worker = rig.worker(vec![], config);
    let task = rig.leased_task(Command::Review);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let timed_out = rig.store.task(&task.id).unwrap();
    assert_eq!(timed_out.status, TaskStatus::TimedOut);
    assert!(rig.runner.graceful_stopped(0), "graceful signal precedes any kill");

    // The notice names the phase reached and a remediation hint.
    assert_eq!(rig.client.call_count(), 1);
    let body = match &rig.client.calls()[0] {
        gantry_adapters::provider::ProviderCall::Comment { body, .. } => body.clone(),
        other => panic!("expected comment, got {other:?}"),
    };
    assert!(body.contains("step-2"), "missing phase in: {body}");
    assert!(body.contains("narrowing the scope"));
}

#[tokio::test]
async fn stubborn_runner_is_force_killed_on_timeout() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::stalled(1, false));
    let mut config = fast_config();
    config.timeouts =
        TimeoutTable::new(HashMap::from([(Command::Review, Duration::from_millis(40))]));
    let worker = rig.worker(vec![], config);
    let task = rig.leased_task(Command::Review);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    assert_eq!(rig.store.task(&task.id).unwrap().status, TaskStatus::TimedOut);
    assert!(rig.runner.graceful_stopped(0));
    assert!(rig.runner.killed(0), "grace expired, the kill must follow");
}

#[tokio::test]
async fn cancel_mid_run_acks_cancelled() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::stalled(1, true));
    let worker = Arc::new(rig.worker(vec![], fast_config()));
    let task = rig.leased_task(Command::Implement);

    let handle = {
        let worker = Arc::clone(&worker);
        let task = task.clone();
        tokio::spawn(async move { worker.execute(task, &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    rig.store.request_cancel(task.id, rig.clock.epoch_ms()).unwrap();
    handle.await.unwrap().unwrap();

    let cancelled = rig.store.task(&task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(rig.runner.graceful_stopped(0));
    assert_eq!(rig.client.call_count(), 1, "cancellation reports once");
}

#[tokio::test]
async fn shutdown_requeues_the_running_task() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::stalled(1, true));
    let worker = Arc::new(rig.worker(vec![], fast_config()));
    let task = rig.leased_task(Command::Implement);

    let shutdown = CancellationToken::new();
    let handle = {
        let worker = Arc::clone(&worker);
        let task = task.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.execute(task, &shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let requeued = rig.store.task(&task.id).unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued, "shutdown must not lose the task");
    assert_eq!(rig.client.call_count(), 0);
}

#[tokio::test]
async fn daily_budget_refuses_at_entry() {
    let rig = Rig::new();
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Fix);
    rig.store.record_spend(&task.org, &BudgetLedger::day_key(NOW), 100.0).unwrap();

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let failed = rig.store.task(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.fault.as_ref().unwrap().message, DAILY_BUDGET_MESSAGE);
    assert_eq!(rig.runner.spawn_count(), 0, "the runner must never start");

    let body = match &rig.client.calls()[0] {
        gantry_adapters::provider::ProviderCall::Comment { body, .. } => body.clone(),
        other => panic!("expected comment, got {other:?}"),
    };
    assert!(body.contains("Daily budget exceeded"));
}

#[tokio::test]
async fn task_budget_stops_an_expensive_run() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript {
        events: vec![
            RunnerEvent::Progress { phase: "work".into(), message: "...".into() },
            RunnerEvent::Usage { input_tokens: 1_000_000, output_tokens: 0, cost_usd: 2.5 },
        ],
        stall: true,
        exits_on_graceful: true,
    });
    let worker = rig.worker(vec![], fast_config());
    let task = rig.leased_task(Command::Implement);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    let failed = rig.store.task(&task.id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.fault.as_ref().unwrap().message.contains("Task budget exceeded"));
}

#[tokio::test]
async fn pre_hook_skip_acks_skipped() {
    struct SkipAll;
    #[async_trait::async_trait]
    impl crate::hooks::Hook for SkipAll {
        fn name(&self) -> &'static str {
            "skip-all"
        }
        fn points(&self) -> &'static [HookPoint] {
            &[HookPoint::PreExecution]
        }
        async fn run(&self, _: HookPoint, _: &Task, _: &HookContext) -> crate::hooks::HookDecision {
            crate::hooks::HookDecision {
                outcome: HookOutcome::Skip { reason: "already handled".into() },
                diagnostics: vec![],
            }
        }
    }

    let rig = Rig::new();
    let worker = rig.worker(vec![Arc::new(SkipAll)], fast_config());
    let task = rig.leased_task(Command::Analyze);

    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();

    assert_eq!(rig.store.task(&task.id).unwrap().status, TaskStatus::Skipped);
    assert_eq!(rig.runner.spawn_count(), 0);
}

#[tokio::test]
async fn second_lease_after_transient_runs_to_success() {
    let rig = Rig::new();
    rig.runner.push_script(FakeScript::error(ErrorKind::Transient, "flake"));
    rig.runner.push_script(FakeScript::success("## Recovered"));
    let worker = rig.worker(vec![], fast_config());

    let task = rig.leased_task(Command::Fix);
    worker.execute(task.clone(), &CancellationToken::new()).await.unwrap();
    assert_eq!(rig.store.task(&task.id).unwrap().status, TaskStatus::Queued);

    // Time passes; the task becomes available and leases again.
    let retry_at = rig.store.task(&task.id).unwrap().scheduled_for_ms;
    rig.clock.set_epoch_ms(retry_at + 1);
    let again = rig
        .store
        .lease(&WorkerId::new("w0"), retry_at + 1, &QueueCaps::default())
        .unwrap()
        .unwrap();
    assert_eq!(again.attempt, 2);

    worker.execute(again, &CancellationToken::new()).await.unwrap();
    let done = rig.store.task(&task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.attempt, 2);
}
