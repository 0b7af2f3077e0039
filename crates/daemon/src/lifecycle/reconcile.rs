// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Startup reconciliation.
//!
//! After a crash the WAL may hold tasks whose workers are gone. Replay
//! already rebuilt the state; this pass returns expired leases to the
//! queue so the restarted pool picks them up, and leaves unexpired leases
//! alone (their worker may be a second live process draining).

use gantry_core::TaskId;
use gantry_store::Store;

pub struct ReconcileReport {
    pub reclaimed: Vec<TaskId>,
    pub queued: usize,
    pub inflight: usize,
}

pub fn run(store: &Store, now_ms: u64) -> ReconcileReport {
    let reclaimed = match store.reclaim_expired(now_ms) {
        Ok(reclaimed) => reclaimed,
        Err(e) => {
            tracing::error!("startup reclaim failed: {e}");
            Vec::new()
        }
    };
    let stats = store.stats();
    let report =
        ReconcileReport { reclaimed, queued: stats.queued, inflight: stats.inflight };
    tracing::info!(
        reclaimed = report.reclaimed.len(),
        queued = report.queued,
        inflight = report.inflight,
        "startup reconcile complete"
    );
    report
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
