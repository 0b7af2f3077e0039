// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Structured task origin: where the event came from and where the result
//! must be delivered.

use crate::provider::Provider;
use serde::{Deserialize, Serialize};

/// How the task entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Webhook,
    Manual,
}

crate::simple_display! {
    TaskSource {
        Webhook => "webhook",
        Manual => "manual",
    }
}

/// Structured origin metadata for a task.
///
/// Only the fields that make sense for the originating provider are set;
/// the result poster uses them to address the reply, and the ingress uses
/// `(provider, number, command)` as the in-flight dedup key for PR-scoped
/// work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// `owner/repo` for code-host events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// PR or issue number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Whether `number` names a pull request (drives merge-ref checkout)
    /// rather than a plain issue.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_pull_request: bool,
    /// Provider-assigned id of the triggering comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    /// Chat thread id (Slack thread_ts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Chat channel id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Issue-tracker ticket key (e.g. `PROJ-42`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_key: Option<String>,
    /// Error-monitor issue id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentry_issue_id: Option<String>,
    /// Git ref the work targets (PR head, branch, or sha).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

impl SourceRef {
    /// Dedup key for "one task per PR/issue per command at a time".
    ///
    /// Returns `None` when the origin has no PR/issue anchor (chat messages,
    /// error-monitor alerts), in which case no in-flight dedup applies.
    pub fn inflight_key(&self, provider: Provider, command: &str) -> Option<String> {
        let anchor = match (self.number, &self.ticket_key) {
            (Some(n), _) => n.to_string(),
            (None, Some(key)) => key.clone(),
            (None, None) => return None,
        };
        Some(format!("{provider}:{anchor}:{command}"))
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
