// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! zstd-compressed state snapshots.
//!
//! A snapshot captures the full materialized state so the WAL can be
//! truncated. Writes go through a temp file + rename so a crash mid-write
//! leaves the previous snapshot intact.

use crate::error::StoreError;
use crate::state::MaterializedState;
use std::path::Path;

const ZSTD_LEVEL: i32 = 3;

/// Write `state` to `path` atomically.
pub fn write(path: &Path, state: &MaterializedState) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(state)
        .map_err(|e| StoreError::Corrupt { line: 0, reason: e.to_string() })?;
    let compressed = zstd::bulk::compress(&json, ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &compressed)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot, or `None` when no snapshot exists yet.
pub fn read(path: &Path) -> Result<Option<MaterializedState>, StoreError> {
    let compressed = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let json = zstd::stream::decode_all(compressed.as_slice())?;
    let state = serde_json::from_slice(&json)
        .map_err(|e| StoreError::Corrupt { line: 0, reason: e.to_string() })?;
    Ok(Some(state))
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
