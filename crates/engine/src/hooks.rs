// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Hook runner: pre/post/error/timeout extension points around task
//! execution.
//!
//! Hooks are pure with respect to the source provider — no posting, no
//! reactions; delivering results is the result poster's job. A hook that
//! overruns its budget is treated as `fail` with a "hook-timeout"
//! diagnostic.
//!
//! Three built-ins ship with the daemon: [`BudgetGate`] (pre),
//! [`UsageAccounting`] (post/error/timeout), and [`DiagnosticsCapture`]
//! (error/timeout).

use crate::budget::{BudgetConfig, BudgetLedger, DAILY_BUDGET_MESSAGE};
use crate::task_log::{TaskLogEntry, TaskLogSink};
use async_trait::async_trait;
use gantry_core::{Fault, Task};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    PreExecution,
    PostExecution,
    OnError,
    OnTimeout,
}

gantry_core::simple_display! {
    HookPoint {
        PreExecution => "pre-execution",
        PostExecution => "post-execution",
        OnError => "on-error",
        OnTimeout => "on-timeout",
    }
}

/// What a hook decided. The worker maps these onto queue operations:
/// `Skip` → ack(skipped), `RetryAfter` → nack, `Fail` → ack(failed).
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Ok,
    Skip { reason: String },
    RetryAfter(Duration),
    Fail(Fault),
}

/// A hook decision plus structured diagnostics for the task log.
#[derive(Debug, Clone, PartialEq)]
pub struct HookDecision {
    pub outcome: HookOutcome,
    pub diagnostics: Vec<String>,
}

impl HookDecision {
    pub fn ok() -> Self {
        Self { outcome: HookOutcome::Ok, diagnostics: Vec::new() }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostics.push(diagnostic.into());
        self
    }
}

/// Read-only execution context handed to hooks.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Today's recorded spend for the task's organization.
    pub org_spend_today_usd: f64,
    /// Cost accumulated by the run so far (post/error/timeout hooks).
    pub cost_usd: f64,
    /// The fault that triggered an `on-error` hook.
    pub fault: Option<Fault>,
    /// Last phase the runner reported (timeout hooks).
    pub phase: Option<String>,
    pub now_ms: u64,
}

#[async_trait]
pub trait Hook: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Which points this hook participates in.
    fn points(&self) -> &'static [HookPoint];

    async fn run(&self, point: HookPoint, task: &Task, ctx: &HookContext) -> HookDecision;
}

pub struct HookRunner {
    hooks: Vec<Arc<dyn Hook>>,
    timeout: Duration,
}

impl HookRunner {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self { hooks, timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every hook registered for `point`, in order. The first non-`Ok`
    /// decision short-circuits; diagnostics accumulate across hooks.
    pub async fn run(&self, point: HookPoint, task: &Task, ctx: &HookContext) -> HookDecision {
        let mut diagnostics = Vec::new();
        for hook in &self.hooks {
            if !hook.points().contains(&point) {
                continue;
            }
            let decision = match tokio::time::timeout(self.timeout, hook.run(point, task, ctx)).await
            {
                Ok(decision) => decision,
                Err(_) => HookDecision {
                    outcome: HookOutcome::Fail(Fault::system(format!(
                        "hook {} exceeded {}s",
                        hook.name(),
                        self.timeout.as_secs()
                    ))),
                    diagnostics: vec!["hook-timeout".into()],
                },
            };
            diagnostics.extend(decision.diagnostics.iter().cloned());
            if decision.outcome != HookOutcome::Ok {
                tracing::info!(
                    hook = hook.name(),
                    %point,
                    task = %task.id,
                    outcome = ?decision.outcome,
                    "hook short-circuited"
                );
                return HookDecision { outcome: decision.outcome, diagnostics };
            }
        }
        HookDecision { outcome: HookOutcome::Ok, diagnostics }
    }
}

// ---- built-in hooks ----

/// Pre-execution gate: refuse work for an organization over its daily
/// budget before the runner ever starts.
pub struct BudgetGate {
    config: BudgetConfig,
}

impl BudgetGate {
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Hook for BudgetGate {
    fn name(&self) -> &'static str {
        "budget-gate"
    }

    fn points(&self) -> &'static [HookPoint] {
        &[HookPoint::PreExecution]
    }

    async fn run(&self, _point: HookPoint, _task: &Task, ctx: &HookContext) -> HookDecision {
        let cap = self.config.per_org_daily_usd.min(self.config.hard_cap_usd);
        if ctx.org_spend_today_usd >= cap {
            return HookDecision {
                outcome: HookOutcome::Fail(Fault::permanent(DAILY_BUDGET_MESSAGE)),
                diagnostics: vec![format!(
                    "budget-gate: ${:.2} of ${:.2} spent today",
                    ctx.org_spend_today_usd, cap
                )],
            };
        }
        HookDecision::ok()
    }
}

/// Post/error/timeout accounting: fold the run's cost into the org's
/// daily ledger, whatever the outcome.
pub struct UsageAccounting {
    ledger: Arc<BudgetLedger>,
}

impl UsageAccounting {
    pub fn new(ledger: Arc<BudgetLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Hook for UsageAccounting {
    fn name(&self) -> &'static str {
        "usage-accounting"
    }

    fn points(&self) -> &'static [HookPoint] {
        &[HookPoint::PostExecution, HookPoint::OnError, HookPoint::OnTimeout]
    }

    async fn run(&self, _point: HookPoint, task: &Task, ctx: &HookContext) -> HookDecision {
        if ctx.cost_usd <= 0.0 {
            return HookDecision::ok();
        }
        self.ledger.record(&task.org, ctx.cost_usd, ctx.now_ms);
        HookDecision::ok()
            .with_diagnostic(format!("recorded ${:.4} for {}", ctx.cost_usd, task.org))
    }
}

/// Error/timeout diagnostics: append what went wrong to the task's log so
/// the failure is inspectable after the fact.
pub struct DiagnosticsCapture {
    sink: Arc<TaskLogSink>,
}

impl DiagnosticsCapture {
    pub fn new(sink: Arc<TaskLogSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Hook for DiagnosticsCapture {
    fn name(&self) -> &'static str {
        "diagnostics-capture"
    }

    fn points(&self) -> &'static [HookPoint] {
        &[HookPoint::OnError, HookPoint::OnTimeout]
    }

    async fn run(&self, point: HookPoint, task: &Task, ctx: &HookContext) -> HookDecision {
        let message = match (&ctx.fault, &ctx.phase) {
            (Some(fault), _) => fault.to_string(),
            (None, Some(phase)) => format!("timed out in phase {phase}"),
            (None, None) => "timed out before the first progress event".to_string(),
        };
        self.sink.append(
            task.id,
            &TaskLogEntry { at_ms: ctx.now_ms, phase: point.to_string(), message: message.clone() },
        );
        HookDecision::ok().with_diagnostic(message)
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
