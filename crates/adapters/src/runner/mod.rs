// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! CLI runner protocol.
//!
//! The runner is an opaque subprocess that performs the agent work and
//! emits a finite, ordered event stream on stdout: any number of
//! `progress`/`usage`/`artifact` events terminated by exactly one of
//! `done` or `error`. The adapter owns process-level concerns: spawn, env
//! injection, line-framed JSON decoding, and signal-based cancellation.

mod decode;
#[cfg(any(test, feature = "test-support"))]
mod fake;
mod process;

pub use decode::LineDecoder;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRunner, FakeScript};
pub use process::ProcessRunner;

use async_trait::async_trait;
use gantry_core::{ErrorKind, Secret};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// One event from the runner's stdout stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunnerEvent {
    Progress {
        phase: String,
        message: String,
    },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    },
    Artifact {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Done {
        exit_code: i32,
    },
}

impl RunnerEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerEvent::Done { .. } | RunnerEvent::Error { .. })
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("empty runner command")]
    EmptyCommand,
}

/// Everything the adapter needs to start one agent run.
///
/// The access token and input travel via environment variables, never
/// argv: process listings must not leak credentials or user text.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Command line, whitespace-split; `{command}` and `{workspace}` are
    /// substituted.
    pub command_line: String,
    pub command: String,
    pub workspace_path: PathBuf,
    pub input_message: String,
    /// Structured origin metadata, serialized into `GANTRY_SOURCE_JSON`.
    pub source_metadata: serde_json::Value,
    pub token: Secret,
    /// Extra environment (hook-provided context, config overrides).
    pub env: Vec<(String, String)>,
}

impl RunnerConfig {
    pub fn new(command_line: impl Into<String>, command: impl Into<String>, workspace_path: PathBuf) -> Self {
        Self {
            command_line: command_line.into(),
            command: command.into(),
            workspace_path,
            input_message: String::new(),
            source_metadata: serde_json::Value::Null,
            token: Secret::new(""),
            env: Vec::new(),
        }
    }

    gantry_core::setters! {
        into {
            input_message: String,
        }
        set {
            source_metadata: serde_json::Value,
            token: Secret,
            env: Vec<(String, String)>,
        }
    }

    /// Resolve the argv: substitute placeholders and split on whitespace.
    pub fn argv(&self) -> Result<Vec<String>, RunnerError> {
        let rendered = self
            .command_line
            .replace("{command}", &self.command)
            .replace("{workspace}", &self.workspace_path.display().to_string());
        let argv: Vec<String> = rendered.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        Ok(argv)
    }
}

/// Control surface for a running agent: graceful stop, then force kill.
#[async_trait]
pub trait RunnerControl: Send + Sync {
    /// Deliver the graceful shutdown signal. The runner gets a bounded
    /// grace window before `kill`.
    async fn graceful_stop(&self);
    async fn kill(&self);
}

/// A live run: the event stream plus its control handle.
pub struct RunnerSession {
    pub events: mpsc::Receiver<RunnerEvent>,
    pub control: Arc<dyn RunnerControl>,
}

/// Adapter that starts agent runs.
#[async_trait]
pub trait RunnerAdapter: Send + Sync + 'static {
    async fn spawn(&self, config: RunnerConfig) -> Result<RunnerSession, RunnerError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
