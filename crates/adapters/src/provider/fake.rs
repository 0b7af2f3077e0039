// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Recording fake for provider clients.

use super::{CommentTarget, MessageTarget, ProviderCall, ProviderClient, ProviderError};
use async_trait::async_trait;
use gantry_core::Secret;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted outcome for the next calls, consumed front-to-back. When the
/// script is empty, calls succeed.
#[derive(Debug, Clone)]
pub enum FakeOutcome {
    Ok,
    Transport,
    Status { status: u16, retry_after_secs: Option<u64> },
}

#[derive(Default)]
struct FakeState {
    calls: Vec<ProviderCall>,
    script: Vec<FakeOutcome>,
}

/// A provider client that records every call and can be scripted to fail.
///
/// Posted artifact ids are `c-fake-1`, `c-fake-2`, ... in call order.
#[derive(Clone, Default)]
pub struct FakeProviderClient {
    state: Arc<Mutex<FakeState>>,
    next_id: Arc<AtomicU64>,
}

impl FakeProviderClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for upcoming calls (front is next).
    pub fn script(&self, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        self.state.lock().script.extend(outcomes);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// The artifact id the next successful post will return.
    pub fn peek_next_artifact_id(&self) -> String {
        format!("c-fake-{}", self.next_id.load(Ordering::SeqCst) + 1)
    }

    fn take_outcome(&self) -> FakeOutcome {
        let mut state = self.state.lock();
        if state.script.is_empty() {
            FakeOutcome::Ok
        } else {
            state.script.remove(0)
        }
    }

    fn record(&self, call: ProviderCall) -> Result<(), ProviderError> {
        self.state.lock().calls.push(call);
        match self.take_outcome() {
            FakeOutcome::Ok => Ok(()),
            FakeOutcome::Transport => Err(ProviderError::Transport("connection reset".into())),
            FakeOutcome::Status { status, retry_after_secs } => Err(ProviderError::Status {
                status,
                retry_after: retry_after_secs.map(Duration::from_secs),
                message: format!("http {status}"),
            }),
        }
    }

    fn next_artifact_id(&self) -> String {
        format!("c-fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ProviderClient for FakeProviderClient {
    async fn post_comment(
        &self,
        _token: &Secret,
        target: &CommentTarget,
        body: &str,
    ) -> Result<String, ProviderError> {
        self.record(ProviderCall::Comment { target: target.clone(), body: body.to_string() })?;
        Ok(self.next_artifact_id())
    }

    async fn post_message(
        &self,
        _token: &Secret,
        target: &MessageTarget,
        payload: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        self.record(ProviderCall::Message { target: target.clone(), payload: payload.clone() })?;
        Ok(self.next_artifact_id())
    }

    async fn update_status(
        &self,
        _token: &Secret,
        target: &CommentTarget,
        state: &str,
        description: &str,
    ) -> Result<(), ProviderError> {
        self.record(ProviderCall::Status {
            target: target.clone(),
            state: state.to_string(),
            description: description.to_string(),
        })
    }

    async fn add_reaction(
        &self,
        _token: &Secret,
        target: &CommentTarget,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.record(ProviderCall::Reaction { target: target.clone(), name: name.to_string() })
    }
}
