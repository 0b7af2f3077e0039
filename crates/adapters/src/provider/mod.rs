// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Provider client interface.
//!
//! One client per provider, consumed through four verbs. The control plane
//! never sees provider REST shapes beyond these calls; wrappers live
//! outside this repo.

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeOutcome, FakeProviderClient};

use async_trait::async_trait;
use gantry_core::Secret;
use std::time::Duration;
use thiserror::Error;

/// Where a comment lands: a PR/issue (`repository` + `number`), a ticket
/// (`ticket_key`), or an error-monitor issue (`issue_id`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentTarget {
    pub repository: Option<String>,
    pub number: Option<u64>,
    pub ticket_key: Option<String>,
    pub issue_id: Option<String>,
}

/// Where a chat message lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTarget {
    pub channel_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection-level failure; always retryable.
    #[error("transport: {0}")]
    Transport(String),

    /// HTTP-level failure. 5xx and 429 are retryable; 429 may carry a
    /// server-mandated delay.
    #[error("status {status}: {message}")]
    Status { status: u16, retry_after: Option<Duration>, message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }

    /// The server-mandated minimum delay, if any (429 `Retry-After`).
    pub fn mandated_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::Status { status: 429, retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The four verbs the control plane speaks to a provider.
///
/// `post_comment` and `post_message` return the provider-assigned id of
/// the created artifact; the poster records it as the posted marker key.
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
    async fn post_comment(
        &self,
        token: &Secret,
        target: &CommentTarget,
        body: &str,
    ) -> Result<String, ProviderError>;

    async fn post_message(
        &self,
        token: &Secret,
        target: &MessageTarget,
        payload: &serde_json::Value,
    ) -> Result<String, ProviderError>;

    async fn update_status(
        &self,
        token: &Secret,
        target: &CommentTarget,
        state: &str,
        description: &str,
    ) -> Result<(), ProviderError>;

    async fn add_reaction(
        &self,
        token: &Secret,
        target: &CommentTarget,
        name: &str,
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

/// A recorded provider call (fake clients collect these for assertions).
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    Comment { target: CommentTarget, body: String },
    Message { target: MessageTarget, payload: serde_json::Value },
    Status { target: CommentTarget, state: String, description: String },
    Reaction { target: CommentTarget, name: String },
}
