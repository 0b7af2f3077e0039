// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Typed daemon configuration, built from the environment at startup.
//!
//! Malformed values are startup errors: the process exits with code 1
//! before touching the store.

use crate::env;
use gantry_core::{Command, Secret};
use gantry_engine::budget::BudgetConfig;
use gantry_engine::worker::TimeoutTable;
use gantry_store::QueueCaps;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no state directory: set DATABASE_URL or HOME")]
    NoStateDir,
    #[error("{0} must be a file: URL or path, got {1:?}")]
    NonFileStore(&'static str, String),
    #[error("QUEUE_URL and DATABASE_URL must name the same directory")]
    SplitStores,
    #[error("{0}")]
    Invalid(String),
    #[error("invalid TASK_TIMEOUTS_JSON: {0}")]
    BadTimeouts(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// WAL + snapshot directory.
    pub state_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub bind: SocketAddr,
    pub worker_count: usize,
    pub caps: QueueCaps,
    pub timeouts: TimeoutTable,
    pub budget: BudgetConfig,
    /// Per-provider webhook secret fallbacks (installation secret wins).
    pub webhook_secrets: HashMap<&'static str, Secret>,
    pub runner_command_line: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_dir = match env::var("DATABASE_URL") {
            Some(url) => env::dir_from_url(&url)
                .ok_or_else(|| ConfigError::NonFileStore("DATABASE_URL", url.clone()))?,
            None => env::default_state_dir().ok_or(ConfigError::NoStateDir)?,
        };
        if let Some(queue_url) = env::var("QUEUE_URL") {
            let queue_dir = env::dir_from_url(&queue_url)
                .ok_or_else(|| ConfigError::NonFileStore("QUEUE_URL", queue_url.clone()))?;
            // Tasks and queue records share one WAL; split stores would
            // break the atomic lease.
            if queue_dir != state_dir {
                return Err(ConfigError::SplitStores);
            }
        }

        let workspace_root = env::var("WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("workspaces"));

        let worker_count: usize =
            env::parse_var("MAX_CONCURRENT_TASKS").map_err(ConfigError::Invalid)?.unwrap_or(10);
        let per_org: usize =
            env::parse_var("MAX_PER_ORG_TASKS").map_err(ConfigError::Invalid)?.unwrap_or(2);
        let soft_limit: usize =
            env::parse_var("QUEUE_SOFT_LIMIT").map_err(ConfigError::Invalid)?.unwrap_or(1000);

        let caps = QueueCaps {
            global_inflight: worker_count,
            per_org_inflight: per_org,
            soft_limit,
            hard_limit: soft_limit.saturating_mul(4),
            ..QueueCaps::default()
        };

        let timeouts = match env::var("TASK_TIMEOUTS_JSON") {
            Some(raw) => parse_timeouts(&raw)?,
            None => TimeoutTable::default(),
        };

        let budget = BudgetConfig {
            per_task_usd: env::parse_var("BUDGET_PER_TASK_USD")
                .map_err(ConfigError::Invalid)?
                .unwrap_or(1.0),
            per_org_daily_usd: env::parse_var("BUDGET_PER_ORG_DAILY_USD")
                .map_err(ConfigError::Invalid)?
                .unwrap_or(100.0),
            ..BudgetConfig::default()
        };

        let mut webhook_secrets = HashMap::new();
        for (provider, var_name) in [
            ("github", "GITHUB_WEBHOOK_SECRET"),
            ("jira", "JIRA_WEBHOOK_SECRET"),
            ("slack", "SLACK_WEBHOOK_SECRET"),
            ("sentry", "SENTRY_WEBHOOK_SECRET"),
        ] {
            if let Some(secret) = env::var(var_name) {
                webhook_secrets.insert(provider, Secret::new(secret));
            }
        }

        let bind: SocketAddr = match env::var("GANTRY_BIND") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid GANTRY_BIND: {raw:?}")))?,
            None => ([0, 0, 0, 0], 8080).into(),
        };

        Ok(Self {
            state_dir,
            workspace_root,
            bind,
            worker_count,
            caps,
            timeouts,
            budget,
            webhook_secrets,
            runner_command_line: env::var("GANTRY_RUNNER_CMD")
                .unwrap_or_else(|| "gantry-runner {command}".into()),
        })
    }
}

/// Parse `TASK_TIMEOUTS_JSON`: a map of command verb to seconds. Unknown
/// verbs and non-numeric values are startup errors.
fn parse_timeouts(raw: &str) -> Result<TimeoutTable, ConfigError> {
    let map: HashMap<String, u64> =
        serde_json::from_str(raw).map_err(|e| ConfigError::BadTimeouts(e.to_string()))?;
    let mut overrides = HashMap::new();
    for (verb, secs) in map {
        let command = Command::parse(&verb)
            .ok_or_else(|| ConfigError::BadTimeouts(format!("unknown command {verb:?}")))?;
        overrides.insert(command, Duration::from_secs(secs));
    }
    Ok(TimeoutTable::new(overrides))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
