// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! The fixed-size worker pool and its maintenance loop.
//!
//! Workers are cooperative: each runs the lease-execute loop against the
//! shared queue. The maintenance task reclaims expired leases (crash
//! recovery), evicts idle workspaces, and compacts the WAL on a cadence.

use crate::worker::Worker;
use crate::workspace::Workspaces;
use gantry_core::Clock;
use gantry_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool<C: Clock> {
    workers: Vec<Arc<Worker<C>>>,
    store: Arc<Store>,
    workspaces: Arc<dyn Workspaces>,
    clock: C,
    maintenance_every: Duration,
    snapshot_every: Duration,
}

impl<C: Clock> WorkerPool<C> {
    pub fn new(
        workers: Vec<Arc<Worker<C>>>,
        store: Arc<Store>,
        workspaces: Arc<dyn Workspaces>,
        clock: C,
    ) -> Self {
        Self {
            workers,
            store,
            workspaces,
            clock,
            maintenance_every: Duration::from_secs(30),
            snapshot_every: Duration::from_secs(300),
        }
    }

    pub fn with_maintenance_every(mut self, every: Duration) -> Self {
        self.maintenance_every = every;
        self
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Run every worker plus the maintenance loop until shutdown, then
    /// drain. Returns when all workers have stopped.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut set = tokio::task::JoinSet::new();
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            let shutdown = shutdown.clone();
            set.spawn(async move { worker.run(shutdown).await });
        }

        {
            let store = Arc::clone(&self.store);
            let workspaces = Arc::clone(&self.workspaces);
            let clock = self.clock.clone();
            let every = self.maintenance_every;
            let snapshot_every = self.snapshot_every;
            let shutdown = shutdown.clone();
            set.spawn(async move {
                maintenance_loop(store, workspaces, clock, every, snapshot_every, shutdown).await;
            });
        }

        while set.join_next().await.is_some() {}
    }

    /// One maintenance pass (exposed for the startup reconcile and tests).
    pub async fn maintain(&self) {
        maintain_once(&self.store, self.workspaces.as_ref(), &self.clock).await;
    }
}

async fn maintenance_loop<C: Clock>(
    store: Arc<Store>,
    workspaces: Arc<dyn Workspaces>,
    clock: C,
    every: Duration,
    snapshot_every: Duration,
    shutdown: CancellationToken,
) {
    let mut since_snapshot = Duration::ZERO;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown.cancelled() => return,
        }
        maintain_once(&store, workspaces.as_ref(), &clock).await;

        since_snapshot += every;
        if since_snapshot >= snapshot_every {
            since_snapshot = Duration::ZERO;
            if let Err(e) = store.snapshot(clock.epoch_ms()) {
                tracing::warn!("snapshot failed: {e}");
            }
        }
    }
}

async fn maintain_once<C: Clock>(store: &Store, workspaces: &dyn Workspaces, clock: &C) {
    let now = clock.epoch_ms();
    match store.reclaim_expired(now) {
        Ok(reclaimed) if !reclaimed.is_empty() => {
            tracing::warn!(count = reclaimed.len(), "reclaimed expired leases");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("lease reclaim failed: {e}"),
    }
    let evicted = workspaces.evict().await;
    if !evicted.is_empty() {
        tracing::info!(count = evicted.len(), "evicted idle workspaces");
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
