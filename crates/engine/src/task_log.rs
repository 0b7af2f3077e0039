// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Append-only sink for per-task runner logs.
//!
//! Progress lines stream from the runner while a task executes; the sink
//! writes human-readable timestamped lines to:
//!   `<log_dir>/task/<task_id>.log`

use gantry_core::TaskId;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line of task activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLogEntry {
    pub at_ms: u64,
    pub phase: String,
    pub message: String,
}

impl std::fmt::Display for TaskLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}", self.at_ms, self.phase, self.message)
    }
}

/// Append-only logger for per-task activity logs.
pub struct TaskLogSink {
    log_dir: PathBuf,
}

impl TaskLogSink {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Append one entry to the task's log file.
    ///
    /// Failures are logged via tracing but do not propagate — losing a
    /// log line must not fail the task.
    pub fn append(&self, task_id: TaskId, entry: &TaskLogEntry) {
        let path = self.log_path(task_id);
        let Some(task_dir) = path.parent() else {
            return;
        };
        if let Err(e) = write_line(task_dir, &path, entry) {
            tracing::warn!(task = %task_id, error = %e, "failed to write task log");
        }
    }

    /// Return the path to a task's log file.
    pub fn log_path(&self, task_id: TaskId) -> PathBuf {
        self.log_dir.join("task").join(format!("{}.log", task_id))
    }

    /// Read the last `n` lines of a task's log (for timeout notices and
    /// operator inspection).
    pub fn tail(&self, task_id: TaskId, n: usize) -> Vec<String> {
        let Ok(content) = fs::read_to_string(self.log_path(task_id)) else {
            return Vec::new();
        };
        let lines: Vec<&str> = content.lines().collect();
        lines.iter().rev().take(n).rev().map(|s| s.to_string()).collect()
    }
}

fn write_line(task_dir: &Path, path: &Path, entry: &TaskLogEntry) -> std::io::Result<()> {
    fs::create_dir_all(task_dir)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{entry}")
}

#[cfg(test)]
#[path = "task_log_tests.rs"]
mod tests;
