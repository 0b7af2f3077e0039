// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Scripted fake runner for worker and scenario tests.

use super::{RunnerAdapter, RunnerConfig, RunnerControl, RunnerError, RunnerEvent, RunnerSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Script for one spawned run.
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    /// Events emitted in order.
    pub events: Vec<RunnerEvent>,
    /// When set, the runner emits its events and then hangs (never sends a
    /// terminal event) until it is signalled.
    pub stall: bool,
    /// When stalled: whether a graceful stop ends the stream (exit within
    /// the grace window) or the runner must be force-killed.
    pub exits_on_graceful: bool,
}

impl FakeScript {
    /// A clean run: progress, usage, artifact, done.
    pub fn success(artifact: &str) -> Self {
        Self {
            events: vec![
                RunnerEvent::Progress { phase: "analyze".into(), message: "reading code".into() },
                RunnerEvent::Usage { input_tokens: 1200, output_tokens: 300, cost_usd: 0.04 },
                RunnerEvent::Artifact { content: artifact.into(), kind: Some("markdown".into()) },
                RunnerEvent::Done { exit_code: 0 },
            ],
            stall: false,
            exits_on_graceful: true,
        }
    }

    /// A run that fails with the given error kind.
    pub fn error(kind: gantry_core::ErrorKind, message: &str) -> Self {
        Self {
            events: vec![RunnerEvent::Error { kind, message: message.into() }],
            stall: false,
            exits_on_graceful: true,
        }
    }

    /// Emits `progress_count` progress events then stalls forever.
    pub fn stalled(progress_count: usize, exits_on_graceful: bool) -> Self {
        let events = (0..progress_count)
            .map(|i| RunnerEvent::Progress {
                phase: format!("step-{i}"),
                message: format!("working on step {i}"),
            })
            .collect();
        Self { events, stall: true, exits_on_graceful }
    }
}

struct SpawnRecord {
    config: RunnerConfig,
    control: Arc<FakeControl>,
}

/// A runner adapter that replays scripts, one per spawn, in order.
#[derive(Clone, Default)]
pub struct FakeRunner {
    scripts: Arc<Mutex<Vec<FakeScript>>>,
    spawns: Arc<Mutex<Vec<SpawnRecord>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: FakeScript) -> Self {
        let runner = Self::default();
        runner.push_script(script);
        runner
    }

    pub fn push_script(&self, script: FakeScript) {
        self.scripts.lock().push(script);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().len()
    }

    /// The config the n-th spawn received.
    pub fn spawned_config(&self, n: usize) -> Option<RunnerConfig> {
        self.spawns.lock().get(n).map(|s| s.config.clone())
    }

    /// Whether the n-th spawn received a graceful stop.
    pub fn graceful_stopped(&self, n: usize) -> bool {
        self.spawns.lock().get(n).is_some_and(|s| s.control.graceful.load(Ordering::SeqCst))
    }

    /// Whether the n-th spawn was force-killed.
    pub fn killed(&self, n: usize) -> bool {
        self.spawns.lock().get(n).is_some_and(|s| s.control.killed.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct FakeControl {
    graceful: AtomicBool,
    killed: AtomicBool,
    notify: Notify,
}

#[async_trait]
impl RunnerControl for FakeControl {
    async fn graceful_stop(&self) {
        self.graceful.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a signal sent before the pump
        // parks is not lost.
        self.notify.notify_one();
    }

    async fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[async_trait]
impl RunnerAdapter for FakeRunner {
    async fn spawn(&self, config: RunnerConfig) -> Result<RunnerSession, RunnerError> {
        let script = {
            let mut scripts = self.scripts.lock();
            if scripts.is_empty() {
                FakeScript::success("(unscripted run)")
            } else {
                scripts.remove(0)
            }
        };

        let control = Arc::new(FakeControl::default());
        self.spawns.lock().push(SpawnRecord { config, control: Arc::clone(&control) });

        let (event_tx, event_rx) = mpsc::channel(64);
        let pump_control = Arc::clone(&control);
        tokio::spawn(async move {
            for event in script.events {
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
            if script.stall {
                loop {
                    if pump_control.killed.load(Ordering::SeqCst) {
                        // Hard kill: the stream just ends.
                        return;
                    }
                    if pump_control.graceful.load(Ordering::SeqCst) && script.exits_on_graceful {
                        let _ = event_tx
                            .send(RunnerEvent::Error {
                                kind: gantry_core::ErrorKind::Transient,
                                message: "terminated".into(),
                            })
                            .await;
                        return;
                    }
                    // A graceful signal the script ignores parks here until
                    // the kill arrives.
                    pump_control.notify.notified().await;
                }
            }
        });

        Ok(RunnerSession { events: event_rx, control })
    }
}
