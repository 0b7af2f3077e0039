// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-engine: the task execution plane.
//!
//! Token service, workspace manager, hook runner, budget ledger, result
//! poster, and the worker pool that drives a task from lease to terminal
//! state.

pub mod budget;
pub mod hooks;
pub mod pool;
pub mod poster;
pub mod task_log;
pub mod tokens;
pub mod worker;
pub mod workspace;

pub use budget::{BudgetConfig, BudgetLedger};
pub use hooks::{
    BudgetGate, DiagnosticsCapture, Hook, HookContext, HookDecision, HookOutcome, HookPoint,
    HookRunner, UsageAccounting,
};
pub use pool::WorkerPool;
pub use poster::{PostError, ResultPoster};
pub use task_log::{TaskLogEntry, TaskLogSink};
pub use tokens::{
    RefreshError, RefreshedToken, TokenError, TokenRefresher, TokenService, TokenServiceConfig,
};
pub use worker::{TimeoutTable, Worker, WorkerConfig};
pub use workspace::{
    GitWorkspaces, WorkspaceError, WorkspaceLease, WorkspaceRequest, WorkspaceStats, Workspaces,
    WorkspacesConfig,
};

#[cfg(any(test, feature = "test-support"))]
pub use tokens::StaticRefresher;
#[cfg(any(test, feature = "test-support"))]
pub use workspace::FakeWorkspaces;
