// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Process-level runner adapter.
//!
//! Spawns the configured command inside the workspace, pipes stdout into
//! the line decoder, and forwards decoded events until a terminal event or
//! EOF. If the child exits without emitting `done`/`error`, the adapter
//! synthesizes the terminal event so the stream contract always holds.

use super::decode::LineDecoder;
use super::{RunnerAdapter, RunnerConfig, RunnerControl, RunnerError, RunnerEvent, RunnerSession};
use async_trait::async_trait;
use gantry_core::ErrorKind;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

const EVENT_CHANNEL_DEPTH: usize = 64;

pub struct ProcessRunner;

#[async_trait]
impl RunnerAdapter for ProcessRunner {
    async fn spawn(&self, config: RunnerConfig) -> Result<RunnerSession, RunnerError> {
        let argv = config.argv()?;
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => return Err(RunnerError::EmptyCommand),
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&config.workspace_path)
            .env("GANTRY_COMMAND", &config.command)
            .env("GANTRY_INPUT", &config.input_message)
            .env("GANTRY_SOURCE_JSON", config.source_metadata.to_string())
            .env("GANTRY_TOKEN", config.token.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

        if let Some(stderr) = stderr {
            tokio::spawn(pump_stderr(stderr));
        }
        tokio::spawn(pump_stdout(child, stdout, event_tx));

        Ok(RunnerSession {
            events: event_rx,
            control: Arc::new(ProcessControl { pid }),
        })
    }
}

/// Signal-based control: SIGTERM for graceful, SIGKILL for force.
struct ProcessControl {
    pid: Option<u32>,
}

impl ProcessControl {
    fn signal(&self, signal: Signal) {
        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
                tracing::debug!(pid, %signal, "signal delivery failed: {e}");
            }
        }
    }
}

#[async_trait]
impl RunnerControl for ProcessControl {
    async fn graceful_stop(&self) {
        self.signal(Signal::SIGTERM);
    }

    async fn kill(&self) {
        self.signal(Signal::SIGKILL);
    }
}

async fn pump_stdout(
    mut child: tokio::process::Child,
    stdout: Option<tokio::process::ChildStdout>,
    event_tx: mpsc::Sender<RunnerEvent>,
) {
    let mut decoder = LineDecoder::new();

    if let Some(mut stdout) = stdout {
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    for event in decoder.feed(&text) {
                        if event_tx.send(event).await.is_err() {
                            // Receiver dropped (worker gave up); reap below.
                            break;
                        }
                    }
                    if decoder.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("runner stdout read failed: {e}");
                    break;
                }
            }
        }
        if !decoder.is_finished() {
            if let Some(event) = decoder.finish() {
                let _ = event_tx.send(event).await;
            }
        }
    }

    let status = child.wait().await;
    if !decoder.is_finished() {
        // The child died silently; uphold the one-terminal-event contract.
        let event = match status {
            Ok(status) if status.success() => RunnerEvent::Done { exit_code: 0 },
            Ok(status) => RunnerEvent::Error {
                kind: ErrorKind::System,
                message: format!("runner exited without terminal event ({status})"),
            },
            Err(e) => RunnerEvent::Error {
                kind: ErrorKind::System,
                message: format!("runner wait failed: {e}"),
            },
        };
        let _ = event_tx.send(event).await;
    }
}

async fn pump_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "gantry::runner", "{line}");
    }
}
