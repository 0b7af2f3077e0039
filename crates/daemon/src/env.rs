// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve the state directory from a store URL (`file:` URL or bare
/// path). Non-file schemes are rejected by the config layer.
pub fn dir_from_url(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Default state directory: `GANTRY_STATE_DIR` > `XDG_STATE_HOME/gantry`
/// > `~/.local/state/gantry`.
pub fn default_state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("GANTRY_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("gantry"));
    }
    std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".local/state/gantry"))
}

pub fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("invalid value for {name}: {raw:?}")),
    }
}

/// Shutdown drain timeout (default 10s, `GANTRY_DRAIN_TIMEOUT_MS`).
pub fn drain_timeout() -> Duration {
    var("GANTRY_DRAIN_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
