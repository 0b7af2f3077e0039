// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Provider payload normalization.
//!
//! Each provider's native webhook JSON (or form body, for Slack slash
//! commands) is reduced to one [`NormalizedEvent`]; everything downstream
//! — dedup, activation, task creation — is provider-agnostic.

use gantry_core::{Provider, SourceRef};
use serde_json::Value;

/// What happened, reduced to the shapes the activation rules understand.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// PR/issue/ticket comment.
    Comment { body: String, author_is_bot: bool },
    /// Ticket reassigned (issue trackers).
    AssigneeChanged { assignee: String },
    /// Ticket moved to a status (issue trackers).
    StatusChanged { status: String, labels: Vec<String> },
    /// Chat mention of the app.
    ChatMention { text: String },
    /// Chat slash command.
    SlashCommand { text: String },
    /// Error-monitor alert.
    MonitorAlert { level: String, count: u64, title: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub provider: Provider,
    /// Organization identifier used for installation lookup.
    pub org: String,
    /// Provider-assigned delivery/event id (dedup key).
    pub event_id: String,
    pub kind: EventKind,
    pub source_ref: SourceRef,
    /// Provider-assigned id of the artifact this event carries (comment
    /// id, message ts) — checked against posted markers.
    pub artifact_id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NormalizeError {
    #[error("unparseable payload: {0}")]
    Malformed(String),
    /// Parsed fine but is not an event we model (ping, delete, edit...).
    #[error("irrelevant event")]
    Irrelevant,
}

/// Extract just the organization, for installation lookup before the
/// signature check.
pub fn extract_org(provider: Provider, headers: &axum::http::HeaderMap, body: &[u8]) -> Option<String> {
    match provider {
        Provider::Slack if is_form(headers) => {
            form_field(body, "team_id")
        }
        _ => {
            let value: Value = serde_json::from_slice(body).ok()?;
            match provider {
                Provider::Github => value
                    .pointer("/repository/owner/login")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Provider::Jira => value
                    .pointer("/issue/fields/project/key")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Provider::Slack => {
                    value.get("team_id").and_then(Value::as_str).map(str::to_string)
                }
                Provider::Sentry => value
                    .pointer("/data/issue/organization/slug")
                    .or_else(|| value.pointer("/organization/slug"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        }
    }
}

pub fn normalize(
    provider: Provider,
    headers: &axum::http::HeaderMap,
    body: &[u8],
) -> Result<NormalizedEvent, NormalizeError> {
    match provider {
        Provider::Github => normalize_github(headers, body),
        Provider::Jira => normalize_jira(body),
        Provider::Slack => normalize_slack(headers, body),
        Provider::Sentry => normalize_sentry(body),
    }
}

fn parse_json(body: &[u8]) -> Result<Value, NormalizeError> {
    serde_json::from_slice(body).map_err(|e| NormalizeError::Malformed(e.to_string()))
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn normalize_github(
    headers: &axum::http::HeaderMap,
    body: &[u8],
) -> Result<NormalizedEvent, NormalizeError> {
    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !matches!(event_type, "issue_comment" | "pull_request_review_comment") {
        return Err(NormalizeError::Irrelevant);
    }
    let value = parse_json(body)?;
    if value.get("action").and_then(Value::as_str) != Some("created") {
        return Err(NormalizeError::Irrelevant);
    }

    let org = str_at(&value, "/repository/owner/login")
        .ok_or_else(|| NormalizeError::Malformed("missing repository owner".into()))?;
    let repository = str_at(&value, "/repository/full_name")
        .ok_or_else(|| NormalizeError::Malformed("missing repository".into()))?;
    let comment_body = str_at(&value, "/comment/body").unwrap_or_default().to_string();
    let comment_id = value
        .pointer("/comment/id")
        .map(json_id)
        .ok_or_else(|| NormalizeError::Malformed("missing comment id".into()))?;
    let author_is_bot = str_at(&value, "/comment/user/type") == Some("Bot");
    let number = value
        .pointer("/issue/number")
        .or_else(|| value.pointer("/pull_request/number"))
        .and_then(Value::as_u64);
    // issue_comment fires for both issues and PRs; PR comments carry an
    // `issue.pull_request` stub (or a top-level pull_request for review
    // comments).
    let is_pull_request =
        value.pointer("/issue/pull_request").is_some() || value.get("pull_request").is_some();
    // Delivery id is unique per webhook delivery and survives redelivery.
    let event_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| comment_id.clone());

    let git_ref = str_at(&value, "/pull_request/head/ref").map(str::to_string);

    Ok(NormalizedEvent {
        provider: Provider::Github,
        org: org.to_string(),
        event_id,
        kind: EventKind::Comment { body: comment_body, author_is_bot },
        source_ref: SourceRef {
            repository: Some(repository.to_string()),
            number,
            is_pull_request,
            comment_id: Some(comment_id.clone()),
            git_ref,
            ..Default::default()
        },
        artifact_id: Some(comment_id),
    })
}

fn normalize_jira(body: &[u8]) -> Result<NormalizedEvent, NormalizeError> {
    let value = parse_json(body)?;
    let webhook_event = value
        .get("webhookEvent")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::Malformed("missing webhookEvent".into()))?;

    let ticket_key = str_at(&value, "/issue/key")
        .ok_or_else(|| NormalizeError::Malformed("missing issue key".into()))?
        .to_string();
    let org = str_at(&value, "/issue/fields/project/key")
        .unwrap_or(&ticket_key)
        .to_string();
    let labels: Vec<String> = value
        .pointer("/issue/fields/labels")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let source_ref =
        SourceRef { ticket_key: Some(ticket_key.clone()), ..Default::default() };

    match webhook_event {
        "comment_created" => {
            let comment_id = value
                .pointer("/comment/id")
                .map(json_id)
                .ok_or_else(|| NormalizeError::Malformed("missing comment id".into()))?;
            let body_text = str_at(&value, "/comment/body").unwrap_or_default().to_string();
            let author_is_bot =
                str_at(&value, "/comment/author/accountType") == Some("app");
            Ok(NormalizedEvent {
                provider: Provider::Jira,
                org,
                event_id: format!("{ticket_key}:comment:{comment_id}"),
                kind: EventKind::Comment { body: body_text, author_is_bot },
                source_ref: SourceRef { comment_id: Some(comment_id.clone()), ..source_ref },
                artifact_id: Some(comment_id),
            })
        }
        "jira:issue_updated" => {
            let items = value
                .pointer("/changelog/items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let changelog_id =
                value.pointer("/changelog/id").map(json_id).unwrap_or_else(|| "0".into());
            for item in &items {
                if item.get("field").and_then(Value::as_str) == Some("assignee") {
                    let assignee =
                        item.get("to").map(json_id).unwrap_or_default();
                    return Ok(NormalizedEvent {
                        provider: Provider::Jira,
                        org,
                        event_id: format!("{ticket_key}:assignee:{changelog_id}"),
                        kind: EventKind::AssigneeChanged { assignee },
                        source_ref,
                        artifact_id: None,
                    });
                }
            }
            for item in &items {
                if item.get("field").and_then(Value::as_str) == Some("status") {
                    let status =
                        item.get("toString").and_then(Value::as_str).unwrap_or_default();
                    return Ok(NormalizedEvent {
                        provider: Provider::Jira,
                        org,
                        event_id: format!("{ticket_key}:status:{changelog_id}"),
                        kind: EventKind::StatusChanged {
                            status: status.to_string(),
                            labels,
                        },
                        source_ref,
                        artifact_id: None,
                    });
                }
            }
            Err(NormalizeError::Irrelevant)
        }
        _ => Err(NormalizeError::Irrelevant),
    }
}

fn normalize_slack(
    headers: &axum::http::HeaderMap,
    body: &[u8],
) -> Result<NormalizedEvent, NormalizeError> {
    if is_form(headers) {
        return normalize_slash_command(body);
    }
    let value = parse_json(body)?;
    if value.get("type").and_then(Value::as_str) != Some("event_callback") {
        return Err(NormalizeError::Irrelevant);
    }
    let org = value
        .get("team_id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::Malformed("missing team_id".into()))?
        .to_string();
    let event_id = value
        .get("event_id")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::Malformed("missing event_id".into()))?
        .to_string();

    if str_at(&value, "/event/type") != Some("app_mention") {
        return Err(NormalizeError::Irrelevant);
    }
    // Bot echoes carry bot_id; dropping them here backstops the posted
    // marker check.
    if value.pointer("/event/bot_id").is_some() {
        return Err(NormalizeError::Irrelevant);
    }
    let text = str_at(&value, "/event/text").unwrap_or_default().to_string();
    let channel = str_at(&value, "/event/channel").map(str::to_string);
    let ts = str_at(&value, "/event/ts").map(str::to_string);
    let thread = str_at(&value, "/event/thread_ts").map(str::to_string).or_else(|| ts.clone());

    Ok(NormalizedEvent {
        provider: Provider::Slack,
        org,
        event_id,
        kind: EventKind::ChatMention { text },
        source_ref: SourceRef { channel_id: channel, thread_id: thread, ..Default::default() },
        artifact_id: ts,
    })
}

fn normalize_slash_command(body: &[u8]) -> Result<NormalizedEvent, NormalizeError> {
    let text = String::from_utf8_lossy(body);
    let field = |name: &str| form_field_str(&text, name);

    let org = field("team_id").ok_or_else(|| NormalizeError::Malformed("missing team_id".into()))?;
    let trigger_id =
        field("trigger_id").ok_or_else(|| NormalizeError::Malformed("missing trigger_id".into()))?;
    let command_text = field("text").unwrap_or_default();

    Ok(NormalizedEvent {
        provider: Provider::Slack,
        org,
        event_id: format!("slash:{trigger_id}"),
        kind: EventKind::SlashCommand { text: command_text },
        source_ref: SourceRef { channel_id: field("channel_id"), ..Default::default() },
        artifact_id: None,
    })
}

fn normalize_sentry(body: &[u8]) -> Result<NormalizedEvent, NormalizeError> {
    let value = parse_json(body)?;
    let issue = value
        .pointer("/data/issue")
        .ok_or_else(|| NormalizeError::Malformed("missing data.issue".into()))?;
    if value.get("action").and_then(Value::as_str) != Some("created") {
        return Err(NormalizeError::Irrelevant);
    }
    let issue_id = issue.get("id").map(json_id).unwrap_or_default();
    if issue_id.is_empty() {
        return Err(NormalizeError::Malformed("missing issue id".into()));
    }
    let org = issue
        .pointer("/organization/slug")
        .or_else(|| value.pointer("/organization/slug"))
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizeError::Malformed("missing organization".into()))?
        .to_string();
    let level = issue.get("level").and_then(Value::as_str).unwrap_or("error").to_string();
    let count = issue
        .get("count")
        .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(1);
    let title = issue.get("title").and_then(Value::as_str).unwrap_or_default().to_string();

    Ok(NormalizedEvent {
        provider: Provider::Sentry,
        org,
        event_id: format!("issue:{issue_id}"),
        kind: EventKind::MonitorAlert { level, count, title },
        source_ref: SourceRef { sentry_issue_id: Some(issue_id), ..Default::default() },
        artifact_id: None,
    })
}

/// Render a JSON id (number or string) as a string key.
fn json_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_form(headers: &axum::http::HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn form_field(body: &[u8], name: &str) -> Option<String> {
    form_field_str(&String::from_utf8_lossy(body), name)
}

/// Minimal form decoding: split pairs, percent-decode, `+` as space.
fn form_field_str(body: &str, name: &str) -> Option<String> {
    for pair in body.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if key == name {
            return Some(percent_decode(parts.next().unwrap_or_default()));
        }
    }
    None
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            other => out.push(other),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
