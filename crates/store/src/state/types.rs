// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Materialized record types that are not core domain types.

use gantry_core::{OrgId, Provider, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Durable view of a repository workspace checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: WorkspaceId,
    pub provider: Provider,
    pub org: OrgId,
    pub repo: String,
    pub git_ref: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub last_access_ms: u64,
}

/// Per-organization daily spend, keyed by `YYYY-MM-DD`.
///
/// Totals are assigned (not incremented) by the applier, so replay is
/// idempotent. Old days are pruned at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendLedger {
    pub days: HashMap<String, f64>,
}

impl SpendLedger {
    pub fn total_for(&self, day: &str) -> f64 {
        self.days.get(day).copied().unwrap_or(0.0)
    }
}

/// A TTL marker: present means "seen" until `expires_at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub expires_at_ms: u64,
}
