// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Result poster: deliver one terminal message per task to its origin.
//!
//! The posted-artifact marker is written after the provider assigns the
//! artifact id but before `post` returns, so an echo webhook can never
//! out-run the marker. Delivery failure never re-runs the agent: the
//! caller acks the task as succeeded with `posted = false`.

use gantry_adapters::provider::{CommentTarget, MessageTarget, ProviderClient, ProviderError};
use gantry_core::{format_elapsed_ms, Backoff, Clock, Provider, Secret, Task, TaskStatus};
use gantry_store::Store;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const MARKER_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum PostError {
    #[error("no client for provider {0}")]
    NoClient(Provider),
    #[error("delivery failed after retries: {0}")]
    Delivery(ProviderError),
    #[error("store: {0}")]
    Store(#[from] gantry_store::StoreError),
}

pub struct ResultPoster<C: Clock> {
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    store: Arc<Store>,
    clock: C,
    backoff: Backoff,
}

impl<C: Clock> ResultPoster<C> {
    pub fn new(
        clients: HashMap<Provider, Arc<dyn ProviderClient>>,
        store: Arc<Store>,
        clock: C,
    ) -> Self {
        Self { clients, store, clock, backoff: Backoff::for_outbound() }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver the terminal message for `task`. Returns the provider's
    /// artifact id, or `None` for origins with nowhere to post (manual
    /// tasks stay dashboard-only).
    pub async fn post(
        &self,
        task: &Task,
        token: &Secret,
        body: &str,
    ) -> Result<Option<String>, PostError> {
        if task.source == gantry_core::TaskSource::Manual {
            return Ok(None);
        }
        // Post idempotence: a task delivers at most one terminal message.
        // A crashed worker that already posted leaves this marker behind,
        // so the re-leased run does not comment twice.
        let task_key = format!("posted-task:{}:{}", task.provider, task.id);
        if self.store.marker_present(&task_key, self.clock.epoch_ms()) {
            tracing::info!(task = %task.id, "terminal message already delivered, skipping");
            return Ok(None);
        }
        let client =
            self.clients.get(&task.provider).ok_or(PostError::NoClient(task.provider))?;

        let mut attempt = 0;
        let artifact_id = loop {
            let result = match task.provider {
                Provider::Slack => {
                    let target = MessageTarget {
                        channel_id: task.source_ref.channel_id.clone().unwrap_or_default(),
                        thread_id: task.source_ref.thread_id.clone(),
                    };
                    client.post_message(token, &target, &render_blocks(task, body)).await
                }
                Provider::Jira => {
                    let target = comment_target(task);
                    client
                        .post_comment(token, &target, &render_adf(body).to_string())
                        .await
                }
                Provider::Github | Provider::Sentry => {
                    let target = comment_target(task);
                    client.post_comment(token, &target, &render_markdown(task, body)).await
                }
            };

            match result {
                Ok(id) => break id,
                Err(e) if e.is_retryable() && attempt + 1 < self.backoff.max_attempts => {
                    let delay = e.mandated_delay().unwrap_or_else(|| self.backoff.delay(attempt));
                    attempt += 1;
                    tracing::warn!(task = %task.id, attempt, "post retry in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(PostError::Delivery(e)),
            }
        };

        // Loop prevention: the markers are durable before control returns
        // to the worker, so an echo webhook that races the ack is dropped
        // and a re-leased task will not deliver twice.
        let key = format!("posted:{}:{}", task.provider, artifact_id);
        self.store.set_marker_if_absent(key, self.clock.epoch_ms(), MARKER_TTL)?;
        self.store.set_marker_if_absent(task_key, self.clock.epoch_ms(), MARKER_TTL)?;
        self.store.mark_posted(task.id, artifact_id.clone(), self.clock.epoch_ms())?;

        Ok(Some(artifact_id))
    }
}

fn comment_target(task: &Task) -> CommentTarget {
    CommentTarget {
        repository: task.source_ref.repository.clone(),
        number: task.source_ref.number,
        ticket_key: task.source_ref.ticket_key.clone(),
        issue_id: task.source_ref.sentry_issue_id.clone(),
    }
}

/// Compose the outbound message for a terminal task.
pub fn terminal_message(task: &Task) -> String {
    match task.status {
        TaskStatus::Succeeded => task
            .result
            .as_ref()
            .map(|r| r.summary.clone())
            .unwrap_or_else(|| "Done.".to_string()),
        TaskStatus::Failed => task
            .fault
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_else(|| "The task failed.".to_string()),
        TaskStatus::TimedOut => {
            let phase = task.phase.as_deref().unwrap_or("starting");
            let elapsed = match (task.started_at_ms, task.finished_at_ms) {
                (Some(start), Some(end)) => format_elapsed_ms(end.saturating_sub(start)),
                _ => "the time limit".to_string(),
            };
            let mut message = format!(
                "Timed out after {elapsed} while in phase `{phase}`. \
                 Try narrowing the scope or splitting the request."
            );
            if let Some(result) = &task.result {
                if !result.summary.is_empty() {
                    message.push_str("\n\nPartial findings:\n\n");
                    message.push_str(&result.summary);
                }
            }
            message
        }
        TaskStatus::Cancelled => "Cancelled on request.".to_string(),
        TaskStatus::Skipped => task
            .fault
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_else(|| "Skipped.".to_string()),
        other => format!("Task is {other}."),
    }
}

/// GitHub/Sentry flavor: the body plus a footer identifying the command.
fn render_markdown(task: &Task, body: &str) -> String {
    format!("{body}\n\n---\n_`{}` · task `{}`_", task.command, task.id.short(8))
}

/// Minimal Atlassian Document Format wrapper: one paragraph per line.
fn render_adf(body: &str) -> serde_json::Value {
    let paragraphs: Vec<serde_json::Value> = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            json!({
                "type": "paragraph",
                "content": [{ "type": "text", "text": line }]
            })
        })
        .collect();
    json!({
        "version": 1,
        "type": "doc",
        "content": paragraphs,
    })
}

/// Slack blocks: a section with the body, plus action buttons for the
/// follow-up verbs when the run produced an artifact.
fn render_blocks(task: &Task, body: &str) -> serde_json::Value {
    let mut blocks = vec![json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": body }
    })];
    if task.status == TaskStatus::Succeeded {
        blocks.push(json!({
            "type": "actions",
            "elements": [
                { "type": "button", "text": { "type": "plain_text", "text": "Approve" }, "value": format!("approve:{}", task.id) },
                { "type": "button", "text": { "type": "plain_text", "text": "Improve" }, "value": format!("improve:{}", task.id) },
            ]
        }));
    }
    json!({ "blocks": blocks })
}

#[cfg(test)]
#[path = "poster_tests.rs"]
mod tests;
