// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Shared fixtures for other crates' tests (behind `test-support`).

use crate::command::Command;
use crate::id::TaskId;
use crate::installation::{Installation, OrgId};
use crate::priority::Priority;
use crate::provider::Provider;
use crate::source::SourceRef;
use crate::task::Task;

/// A queued GitHub task for `org`, created at `now_ms`.
pub fn queued_task(org: &str, command: Command, now_ms: u64) -> Task {
    Task::new(
        TaskId::new_at(now_ms),
        crate::id::InstallationId::new_at(now_ms),
        Provider::Github,
        OrgId::new(org),
        crate::source::TaskSource::Webhook,
        command,
        format!("@agent {command}"),
        SourceRef {
            repository: Some(format!("{org}/widgets")),
            number: Some(42),
            comment_id: Some("c-9001".into()),
            git_ref: Some("main".into()),
            ..Default::default()
        },
        command.default_priority(),
        now_ms,
    )
}

/// A queued task pinned to an explicit priority.
pub fn queued_task_with_priority(org: &str, priority: Priority, now_ms: u64) -> Task {
    let mut task = queued_task(org, Command::Analyze, now_ms);
    task.priority = priority;
    task
}

/// An active installation for `org` with a webhook secret.
pub fn installation(provider: Provider, org: &str) -> Installation {
    Installation::builder()
        .provider(provider)
        .org(org)
        .access_token("tok-test")
        .webhook_secret("whsec-test")
        .build()
}
