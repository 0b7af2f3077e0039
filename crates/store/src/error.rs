// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Store error surface.

use gantry_core::{TaskId, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("installation not found")]
    InstallationNotFound,

    #[error("active installation already exists for {provider}/{org}")]
    AlreadyExists { provider: String, org: String },

    /// State-machine violation: the compare-and-set on status failed.
    #[error("illegal transition for {id}: {from} -> {to}")]
    Conflict { id: TaskId, from: TaskStatus, to: TaskStatus },

    #[error("lease for {id} is not held by {worker}")]
    LeaseNotHeld { id: TaskId, worker: String },

    #[error("lease for {0} expired")]
    LeaseExpired(TaskId),

    /// Queue past its soft limit; low/normal enqueues shed.
    #[error("queue is at capacity")]
    TooBusy,

    #[error("seal: {0}")]
    Crypto(String),

    #[error("wal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}
