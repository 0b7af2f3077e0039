// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! The worker: drives one leased task from hooks through the runner to a
//! terminal state.
//!
//! A worker owns at most one running task. The lease is extended by
//! heartbeat while the runner streams events; cancellation is checked at
//! hook boundaries and at every runner event; the workspace is released on
//! every exit path.

use crate::budget::BudgetLedger;
use crate::hooks::{HookContext, HookOutcome, HookPoint, HookRunner};
use crate::poster::{terminal_message, ResultPoster};
use crate::task_log::{TaskLogEntry, TaskLogSink};
use crate::tokens::{TokenError, TokenService};
use crate::workspace::{WorkspaceError, WorkspaceLease, WorkspaceRequest, Workspaces};
use gantry_adapters::runner::{RunnerAdapter, RunnerConfig, RunnerEvent, RunnerSession};
use gantry_core::{
    Backoff, Clock, Command, ErrorKind, Fault, Task, TaskId, TaskResult, TaskStatus, WorkerId,
};
use gantry_store::{QueueCaps, Store, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-command wall-clock timeouts with config overrides.
#[derive(Debug, Clone, Default)]
pub struct TimeoutTable {
    overrides: HashMap<Command, Duration>,
}

impl TimeoutTable {
    pub fn new(overrides: HashMap<Command, Duration>) -> Self {
        Self { overrides }
    }

    pub fn timeout_for(&self, command: Command) -> Duration {
        self.overrides.get(&command).copied().unwrap_or_else(|| command.default_timeout())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub caps: QueueCaps,
    pub timeouts: TimeoutTable,
    /// Runner invocation template (`{command}`/`{workspace}` substituted).
    pub runner_command_line: String,
    /// Lease extension cadence; must stay well under the visibility
    /// timeout.
    pub heartbeat_every: Duration,
    /// Grace window between the graceful signal and the kill.
    pub grace: Duration,
    /// Idle poll interval when the queue is empty.
    pub poll_interval: Duration,
    pub retry_backoff: Backoff,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            caps: QueueCaps::default(),
            timeouts: TimeoutTable::default(),
            runner_command_line: "gantry-runner {command}".into(),
            heartbeat_every: Duration::from_secs(120),
            grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            retry_backoff: Backoff::for_task_retry(),
        }
    }
}

pub struct Worker<C: Clock> {
    pub id: WorkerId,
    store: Arc<Store>,
    tokens: Arc<TokenService<C>>,
    workspaces: Arc<dyn Workspaces>,
    runner: Arc<dyn RunnerAdapter>,
    poster: Arc<ResultPoster<C>>,
    hooks: Arc<HookRunner>,
    budget: Arc<BudgetLedger>,
    log_sink: Arc<TaskLogSink>,
    clock: C,
    config: WorkerConfig,
}

/// What the event loop decided; drives the terminal bookkeeping.
enum RunOutcome {
    Succeeded,
    Fault(Fault),
    TimedOut,
    Cancelled,
    /// Lease lost to another worker: stop silently, the owner acks.
    Abandoned,
    /// Global shutdown: nack so the task resumes after restart.
    Shutdown,
}

impl<C: Clock> Worker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        store: Arc<Store>,
        tokens: Arc<TokenService<C>>,
        workspaces: Arc<dyn Workspaces>,
        runner: Arc<dyn RunnerAdapter>,
        poster: Arc<ResultPoster<C>>,
        hooks: Arc<HookRunner>,
        budget: Arc<BudgetLedger>,
        log_sink: Arc<TaskLogSink>,
        clock: C,
        config: WorkerConfig,
    ) -> Self {
        Self { id, store, tokens, workspaces, runner, poster, hooks, budget, log_sink, clock, config }
    }

    /// Lease-execute loop until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let leased = self.store.lease(&self.id, self.clock.epoch_ms(), &self.config.caps);
            match leased {
                Ok(Some(task)) => {
                    let task_id = task.id;
                    if let Err(e) = self.execute(task, &shutdown).await {
                        tracing::error!(worker = %self.id, task = %task_id, "execute failed: {e}");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    tracing::error!(worker = %self.id, "lease failed: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Execute one leased task to a terminal state.
    pub async fn execute(
        &self,
        task: Task,
        shutdown: &CancellationToken,
    ) -> Result<(), StoreError> {
        let now = self.clock.epoch_ms();
        tracing::info!(worker = %self.id, task = %task.id, command = %task.command, attempt = task.attempt, "executing");

        if self.cancel_requested(task.id) {
            return self.finish(task.id, TaskStatus::Cancelled, None, None).await;
        }

        // Pre-execution hooks; the budget gate runs here, at worker entry.
        let ctx = HookContext {
            org_spend_today_usd: self.budget.spend_today(&task.org, now),
            now_ms: now,
            ..Default::default()
        };
        match self.hooks.run(HookPoint::PreExecution, &task, &ctx).await.outcome {
            HookOutcome::Ok => {}
            HookOutcome::Skip { reason } => {
                return self
                    .finish(task.id, TaskStatus::Skipped, None, Some(Fault::user(reason)))
                    .await;
            }
            HookOutcome::RetryAfter(delay) => {
                return self.store.nack(task.id, delay, self.clock.epoch_ms());
            }
            HookOutcome::Fail(fault) => {
                return self.finish(task.id, TaskStatus::Failed, None, Some(fault)).await;
            }
        }

        // Workspace + fresh token, then hand off to the runner.
        let lease = match self.acquire_workspace(&task).await {
            Ok(lease) => lease,
            Err(Disposition::Fail(fault)) => {
                return self.finish(task.id, TaskStatus::Failed, None, Some(fault)).await;
            }
            Err(Disposition::Retry(delay)) => {
                return self.store.nack(task.id, delay, self.clock.epoch_ms());
            }
        };

        let outcome = self.run_in_workspace(&task, &lease, shutdown).await;

        // Always release the workspace.
        if let Some(lease) = lease {
            self.workspaces.release(lease).await;
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(task = %task.id, "run failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_in_workspace(
        &self,
        task: &Task,
        lease: &Option<WorkspaceLease>,
        shutdown: &CancellationToken,
    ) -> Result<(), StoreError> {
        // Freshly issued token for the runner (the workspace acquire may
        // have consumed meaningful lifetime on a busy queue).
        let token = match self.tokens.get_token(task.provider, &task.org).await {
            Ok(token) => token,
            Err(e) => return self.dispose_token_error(task.id, e).await,
        };

        let workspace_path = match lease {
            Some(lease) => lease.path.clone(),
            None => {
                tracing::debug!(task = %task.id, "no repository context, running without checkout");
                std::env::temp_dir()
            }
        };

        self.store.start(task.id, &self.id, self.clock.epoch_ms())?;

        let runner_config = RunnerConfig::new(
            self.config.runner_command_line.clone(),
            task.command.as_str(),
            workspace_path,
        )
        .input_message(task.input.clone())
        .source_metadata(serde_json::to_value(&task.source_ref).unwrap_or_default())
        .token(token.access.clone());

        let session = match self.runner.spawn(runner_config).await {
            Ok(session) => session,
            Err(e) => {
                // Spawn failure is a worker-host problem, not the task's:
                // isolate with a long backoff and alert.
                tracing::error!(task = %task.id, "runner spawn failed: {e}");
                return self.store.nack(task.id, Duration::from_secs(300), self.clock.epoch_ms());
            }
        };

        let timeout = self.config.timeouts.timeout_for(task.command);
        let (outcome, result) = self.consume_events(task, session, timeout, shutdown).await;
        self.settle(task, outcome, result).await
    }

    /// The runner event loop: forward progress, accumulate usage, capture
    /// the artifact, heartbeat the lease, and watch for timeout, cancel,
    /// and shutdown.
    async fn consume_events(
        &self,
        task: &Task,
        mut session: RunnerSession,
        timeout: Duration,
        shutdown: &CancellationToken,
    ) -> (RunOutcome, Option<TaskResult>) {
        let mut result = TaskResult::default();
        let mut last_phase: Option<String> = None;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.heartbeat_every,
            self.config.heartbeat_every,
        );

        let outcome = loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.drain_after_stop(&mut session, &mut result).await;
                    break RunOutcome::TimedOut;
                }

                _ = shutdown.cancelled() => {
                    self.drain_after_stop(&mut session, &mut result).await;
                    break RunOutcome::Shutdown;
                }

                _ = heartbeat.tick() => {
                    let now = self.clock.epoch_ms();
                    if let Err(e) = self.store.heartbeat(task.id, &self.id, now, &self.config.caps) {
                        tracing::warn!(task = %task.id, "lost lease: {e}");
                        session.control.kill().await;
                        break RunOutcome::Abandoned;
                    }
                    if self.cancel_requested(task.id) {
                        self.drain_after_stop(&mut session, &mut result).await;
                        break RunOutcome::Cancelled;
                    }
                }

                event = session.events.recv() => {
                    if self.cancel_requested(task.id) {
                        self.drain_after_stop(&mut session, &mut result).await;
                        break RunOutcome::Cancelled;
                    }
                    match event {
                        Some(RunnerEvent::Progress { phase, message }) => {
                            self.log_sink.append(
                                task.id,
                                &TaskLogEntry {
                                    at_ms: self.clock.epoch_ms(),
                                    phase: phase.clone(),
                                    message,
                                },
                            );
                            if last_phase.as_deref() != Some(phase.as_str()) {
                                let _ = self.store.set_phase(task.id, &phase);
                                last_phase = Some(phase);
                            }
                        }
                        Some(RunnerEvent::Usage { input_tokens, output_tokens, cost_usd }) => {
                            result.add_usage(input_tokens, output_tokens, cost_usd);
                            let _ = self.store.record_usage(
                                task.id,
                                result.input_tokens,
                                result.output_tokens,
                                result.cost_usd,
                            );
                            if let Err(fault) = self.budget.check_task(result.cost_usd) {
                                self.drain_after_stop(&mut session, &mut result).await;
                                break RunOutcome::Fault(fault);
                            }
                        }
                        Some(RunnerEvent::Artifact { content, kind }) => {
                            result.summary = content;
                            result.kind = kind;
                        }
                        Some(RunnerEvent::Error { kind, message }) => {
                            break RunOutcome::Fault(Fault::new(kind, message));
                        }
                        Some(RunnerEvent::Done { exit_code }) => {
                            if exit_code == 0 {
                                break RunOutcome::Succeeded;
                            }
                            break RunOutcome::Fault(Fault::new(
                                ErrorKind::Transient,
                                format!("runner exited with code {exit_code}"),
                            ));
                        }
                        None => {
                            break RunOutcome::Fault(Fault::system("runner stream closed early"));
                        }
                    }
                }
            }
        };

        // Preserve partial artifacts and metering whatever the outcome.
        let result = if result.summary.is_empty() && result.cost_usd == 0.0 && result.input_tokens == 0
        {
            None
        } else {
            Some(result)
        };
        (outcome, result)
    }

    /// Graceful signal, bounded drain of the remaining stream, then kill.
    async fn drain_after_stop(&self, session: &mut RunnerSession, result: &mut TaskResult) {
        session.control.graceful_stop().await;
        let drained = tokio::time::timeout(self.config.grace, async {
            while let Some(event) = session.events.recv().await {
                match event {
                    RunnerEvent::Artifact { content, kind } => {
                        result.summary = content;
                        result.kind = kind;
                    }
                    RunnerEvent::Usage { input_tokens, output_tokens, cost_usd } => {
                        result.add_usage(input_tokens, output_tokens, cost_usd);
                    }
                    event if event.is_terminal() => return,
                    _ => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("runner ignored graceful stop, killing");
            session.control.kill().await;
        }
    }

    /// Map the loop outcome onto hooks, posting, and the queue operation.
    async fn settle(
        &self,
        task: &Task,
        outcome: RunOutcome,
        result: Option<TaskResult>,
    ) -> Result<(), StoreError> {
        let cost_usd = result.as_ref().map_or(0.0, |r| r.cost_usd);
        let now_ms = self.clock.epoch_ms();
        match outcome {
            RunOutcome::Succeeded => {
                // Post-execution hooks; usage accounting records the cost.
                let ctx = HookContext { cost_usd, now_ms, ..Default::default() };
                match self.hooks.run(HookPoint::PostExecution, task, &ctx).await.outcome {
                    HookOutcome::Fail(fault) => {
                        return self.finish(task.id, TaskStatus::Failed, result, Some(fault)).await;
                    }
                    HookOutcome::RetryAfter(delay) => {
                        return self.store.nack(task.id, delay, self.clock.epoch_ms());
                    }
                    _ => {}
                }
                self.finish(task.id, TaskStatus::Succeeded, result, None).await
            }

            RunOutcome::Fault(fault) => {
                let ctx = HookContext {
                    fault: Some(fault.clone()),
                    cost_usd,
                    now_ms,
                    ..Default::default()
                };
                let decision = self.hooks.run(HookPoint::OnError, task, &ctx).await;
                let fault = match decision.outcome {
                    HookOutcome::Fail(hook_fault) => hook_fault,
                    HookOutcome::RetryAfter(delay) => {
                        return self.store.nack(task.id, delay, self.clock.epoch_ms());
                    }
                    _ => fault,
                };

                match fault.kind {
                    ErrorKind::Transient => {
                        let delay = self.config.retry_backoff.delay(task.attempt);
                        tracing::info!(task = %task.id, attempt = task.attempt, "transient failure, retry in {delay:?}");
                        self.store.nack(task.id, delay, self.clock.epoch_ms())
                    }
                    ErrorKind::System => {
                        tracing::error!(task = %task.id, "system fault, isolating: {}", fault.message);
                        if task.attempt < 3 {
                            self.store.nack(task.id, Duration::from_secs(300), self.clock.epoch_ms())
                        } else {
                            self.finish(task.id, TaskStatus::Failed, result, Some(fault)).await
                        }
                    }
                    ErrorKind::User | ErrorKind::Permanent => {
                        self.finish(task.id, TaskStatus::Failed, result, Some(fault)).await
                    }
                }
            }

            RunOutcome::TimedOut => {
                let ctx = HookContext {
                    phase: self.store.task(&task.id).and_then(|t| t.phase),
                    cost_usd,
                    now_ms,
                    ..Default::default()
                };
                let _ = self.hooks.run(HookPoint::OnTimeout, task, &ctx).await;
                self.finish(task.id, TaskStatus::TimedOut, result, None).await
            }

            RunOutcome::Cancelled => {
                self.finish(task.id, TaskStatus::Cancelled, result, None).await
            }

            RunOutcome::Abandoned => Ok(()),

            RunOutcome::Shutdown => {
                self.store.nack(task.id, Duration::ZERO, self.clock.epoch_ms())
            }
        }
    }

    /// Terminal bookkeeping: ack, then deliver exactly one message to the
    /// origin. Delivery failure leaves the task terminal with
    /// `posted = false`.
    async fn finish(
        &self,
        task_id: TaskId,
        outcome: TaskStatus,
        result: Option<TaskResult>,
        fault: Option<Fault>,
    ) -> Result<(), StoreError> {
        self.store.ack(task_id, outcome, result, fault, false, self.clock.epoch_ms())?;
        let Some(task) = self.store.task(&task_id) else { return Ok(()) };

        let token = match self.tokens.get_token(task.provider, &task.org).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(task = %task_id, "cannot post result, no token: {e}");
                return Ok(());
            }
        };
        let body = terminal_message(&task);
        match self.poster.post(&task, &token.access, &body).await {
            Ok(Some(artifact_id)) => {
                tracing::info!(task = %task_id, %outcome, artifact = %artifact_id, "result posted");
            }
            Ok(None) => {}
            Err(e) => {
                // The work is done; never re-run the agent for a delivery
                // failure.
                tracing::warn!(task = %task_id, "result delivery failed: {e}");
            }
        }
        Ok(())
    }

    async fn dispose_token_error(&self, task_id: TaskId, e: TokenError) -> Result<(), StoreError> {
        match e {
            TokenError::NotFound => {
                self.finish(
                    task_id,
                    TaskStatus::Failed,
                    None,
                    Some(Fault::permanent("no active installation for this organization")),
                )
                .await
            }
            TokenError::Unauthorized(reason) => {
                self.finish(task_id, TaskStatus::Failed, None, Some(Fault::permanent(reason)))
                    .await
            }
            TokenError::Transient(_) => {
                self.store.nack(
                    task_id,
                    self.config.retry_backoff.delay(1),
                    self.clock.epoch_ms(),
                )
            }
            TokenError::Store(e) => Err(e),
        }
    }

    async fn acquire_workspace(
        &self,
        task: &Task,
    ) -> Result<Option<WorkspaceLease>, Disposition> {
        let Some(repo) = task.source_ref.repository.clone() else {
            return Ok(None);
        };
        let token = match self.tokens.get_token(task.provider, &task.org).await {
            Ok(token) => token,
            Err(TokenError::NotFound) => {
                return Err(Disposition::Fail(Fault::permanent(
                    "no active installation for this organization",
                )))
            }
            Err(TokenError::Unauthorized(reason)) => {
                return Err(Disposition::Fail(Fault::permanent(reason)))
            }
            Err(_) => return Err(Disposition::Retry(self.config.retry_backoff.delay(1))),
        };

        let request = WorkspaceRequest {
            provider: task.provider,
            org: task.org.clone(),
            repo,
            git_ref: task.source_ref.git_ref.clone().unwrap_or_else(|| "main".into()),
            pr_number: task.source_ref.number.filter(|_| task.source_ref.is_pull_request),
        };
        match self.workspaces.acquire(&request, &token).await {
            Ok(lease) => Ok(Some(lease)),
            Err(WorkspaceError::Transient(reason)) => {
                tracing::warn!(task = %task.id, "workspace transient: {reason}");
                Err(Disposition::Retry(self.config.retry_backoff.delay(task.attempt)))
            }
            Err(WorkspaceError::ResourceExhausted(reason)) => {
                tracing::warn!(task = %task.id, "workspace quota: {reason}");
                Err(Disposition::Retry(self.config.retry_backoff.delay(task.attempt)))
            }
            Err(WorkspaceError::Unauthorized(reason)) => {
                Err(Disposition::Fail(Fault::permanent(reason)))
            }
            Err(WorkspaceError::PolicyViolation(reason)) => {
                Err(Disposition::Fail(Fault::permanent(reason)))
            }
            Err(e) => Err(Disposition::Fail(Fault::system(e.to_string()))),
        }
    }

    fn cancel_requested(&self, task_id: TaskId) -> bool {
        self.store.task(&task_id).is_some_and(|t| t.cancel_requested)
    }
}

enum Disposition {
    Fail(Fault),
    Retry(Duration),
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
