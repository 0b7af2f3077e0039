// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Daemon lifecycle: single-instance lock, startup, serve, drain,
//! shutdown.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error (including a bind
//! failure), 2 durable store unavailable.

pub mod reconcile;

use crate::config::Config;
use crate::ingress::{self, AppState, IngressConfig};
use async_trait::async_trait;
use fs2::FileExt;
use gantry_adapters::provider::{CommentTarget, MessageTarget, ProviderClient, ProviderError};
use gantry_adapters::runner::ProcessRunner;
use gantry_core::{
    Clock, Installation, Provider, Secret, SystemClock, WorkerId,
};
use gantry_engine::budget::BudgetLedger;
use gantry_engine::hooks::{BudgetGate, DiagnosticsCapture, HookRunner, UsageAccounting};
use gantry_engine::pool::WorkerPool;
use gantry_engine::poster::ResultPoster;
use gantry_engine::task_log::TaskLogSink;
use gantry_engine::tokens::{RefreshError, RefreshedToken, TokenRefresher, TokenService, TokenServiceConfig};
use gantry_engine::worker::{Worker, WorkerConfig};
use gantry_engine::workspace::{GitWorkspaces, Workspaces, WorkspacesConfig};
use gantry_store::Store;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_STORE: i32 = 2;

/// Exclusive daemon lock on the state directory; held for the process
/// lifetime.
pub struct InstanceLock {
    _file: File,
}

impl InstanceLock {
    pub fn acquire(state_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let file = File::create(state_dir.join("gantryd.lock"))?;
        file.try_lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

/// Placeholder refresher for deployments without an OAuth client wired
/// in: non-expiring tokens (PATs) never reach it, expiring ones fail
/// transient so the task retries instead of killing the installation.
struct PassthroughRefresher;

#[async_trait]
impl TokenRefresher for PassthroughRefresher {
    async fn refresh(&self, _installation: &Installation) -> Result<RefreshedToken, RefreshError> {
        Err(RefreshError::Transient("no provider OAuth client configured".into()))
    }
}

/// Development provider client: logs the outbound verb and fabricates
/// artifact ids. Production deployments register real clients per
/// provider.
struct DevProviderClient {
    provider: Provider,
    counter: std::sync::atomic::AtomicU64,
}

impl DevProviderClient {
    fn new(provider: Provider) -> Self {
        Self { provider, counter: std::sync::atomic::AtomicU64::new(0) }
    }

    fn mint_id(&self) -> String {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        format!("dev-{}-{n}", self.provider)
    }
}

#[async_trait]
impl ProviderClient for DevProviderClient {
    async fn post_comment(
        &self,
        _token: &Secret,
        target: &CommentTarget,
        body: &str,
    ) -> Result<String, ProviderError> {
        tracing::info!(provider = %self.provider, ?target, bytes = body.len(), "post_comment (dev)");
        Ok(self.mint_id())
    }

    async fn post_message(
        &self,
        _token: &Secret,
        target: &MessageTarget,
        _payload: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        tracing::info!(provider = %self.provider, channel = %target.channel_id, "post_message (dev)");
        Ok(self.mint_id())
    }

    async fn update_status(
        &self,
        _token: &Secret,
        _target: &CommentTarget,
        state: &str,
        _description: &str,
    ) -> Result<(), ProviderError> {
        tracing::info!(provider = %self.provider, state, "update_status (dev)");
        Ok(())
    }

    async fn add_reaction(
        &self,
        _token: &Secret,
        _target: &CommentTarget,
        name: &str,
    ) -> Result<(), ProviderError> {
        tracing::info!(provider = %self.provider, name, "add_reaction (dev)");
        Ok(())
    }
}

/// Run the daemon to completion. Returns the process exit code.
pub async fn run(config: Config) -> i32 {
    let _lock = match InstanceLock::acquire(&config.state_dir) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(dir = %config.state_dir.display(), "cannot lock state dir: {e}");
            return EXIT_STORE;
        }
    };

    let store = match Store::open(&config.state_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("cannot open durable store: {e}");
            return EXIT_STORE;
        }
    };

    let clock = SystemClock;
    reconcile::run(&store, clock.epoch_ms());

    // Composition root: every component takes its dependencies by
    // reference here; there are no ambient singletons.
    let tokens = Arc::new(TokenService::new(
        Arc::clone(&store),
        Arc::new(PassthroughRefresher),
        clock.clone(),
        TokenServiceConfig::default(),
    ));
    let workspaces: Arc<dyn Workspaces> = Arc::new(GitWorkspaces::new(
        WorkspacesConfig::new(config.workspace_root.clone()),
        Arc::clone(&store),
        clock.clone(),
    ));
    let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
    for provider in Provider::ALL {
        clients.insert(provider, Arc::new(DevProviderClient::new(provider)));
    }
    let poster = Arc::new(ResultPoster::new(clients, Arc::clone(&store), clock.clone()));
    let budget = Arc::new(BudgetLedger::new(Arc::clone(&store), config.budget));
    let log_sink = Arc::new(TaskLogSink::new(config.state_dir.join("logs")));
    let hooks = Arc::new(HookRunner::new(vec![
        Arc::new(BudgetGate::new(config.budget)),
        Arc::new(UsageAccounting::new(Arc::clone(&budget))),
        Arc::new(DiagnosticsCapture::new(Arc::clone(&log_sink))),
    ]));

    let worker_config = WorkerConfig {
        caps: config.caps,
        timeouts: config.timeouts.clone(),
        runner_command_line: config.runner_command_line.clone(),
        ..WorkerConfig::default()
    };
    let workers = (0..config.worker_count)
        .map(|i| {
            Arc::new(Worker::new(
                WorkerId::new(format!("worker-{i}")),
                Arc::clone(&store),
                Arc::clone(&tokens),
                Arc::clone(&workspaces),
                Arc::new(ProcessRunner),
                Arc::clone(&poster),
                Arc::clone(&hooks),
                Arc::clone(&budget),
                Arc::clone(&log_sink),
                clock.clone(),
                worker_config.clone(),
            ))
        })
        .collect();
    let pool = WorkerPool::new(workers, Arc::clone(&store), Arc::clone(&workspaces), clock.clone());

    let ingress_config = IngressConfig {
        caps: config.caps,
        webhook_secrets: config.webhook_secrets.clone(),
        worker_pool_size: config.worker_count,
        ..IngressConfig::default()
    };
    let app = ingress::router(AppState::new(
        Arc::clone(&store),
        clock.clone(),
        Arc::clone(&workspaces),
        ingress_config,
    ));

    let listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(bind = %config.bind, "cannot bind ingress: {e}");
            return EXIT_CONFIG;
        }
    };
    tracing::info!(bind = %config.bind, workers = config.worker_count, "gantryd up");

    let shutdown = CancellationToken::new();
    let pool_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    let server = {
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("ingress server failed: {e}");
            }
        })
    };

    tokio::select! {
        _ = server => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
        }
    }

    // Drain: stop intake and leasing, let running tasks wind down, then
    // snapshot whatever state we reached.
    shutdown.cancel();
    let drain = crate::env::drain_timeout();
    if tokio::time::timeout(drain, pool_handle).await.is_err() {
        tracing::warn!("drain timeout hit, abandoning in-flight work to lease reclaim");
    }
    if let Err(e) = store.snapshot(clock.epoch_ms()) {
        tracing::warn!("final snapshot failed: {e}");
    }
    tracing::info!("gantryd down");
    EXIT_CLEAN
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("cannot install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
