// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Spend budgets: per task, per organization per day, and a hard cap.
//!
//! Enforced at worker entry (daily caps) and during the runner event loop
//! (per-task cap on accumulated usage). Days roll over at UTC midnight.

use chrono::{TimeZone, Utc};
use gantry_core::{Fault, OrgId};
use gantry_store::Store;
use std::sync::Arc;

pub const DAILY_BUDGET_MESSAGE: &str = "Daily budget exceeded — try again tomorrow.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    pub per_task_usd: f64,
    pub per_org_daily_usd: f64,
    /// Absolute ceiling; overrides any configured daily raise.
    pub hard_cap_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { per_task_usd: 1.0, per_org_daily_usd: 100.0, hard_cap_usd: 200.0 }
    }
}

pub struct BudgetLedger {
    store: Arc<Store>,
    config: BudgetConfig,
}

impl BudgetLedger {
    pub fn new(store: Arc<Store>, config: BudgetConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// UTC day key for the ledger, `YYYY-MM-DD`.
    pub fn day_key(epoch_ms: u64) -> String {
        match Utc.timestamp_millis_opt(epoch_ms as i64) {
            chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d").to_string(),
            _ => "1970-01-01".to_string(),
        }
    }

    /// Entry gate: refuse work for an organization over its daily budget.
    pub fn check_org(&self, org: &OrgId, now_ms: u64) -> Result<(), Fault> {
        let spent = self.store.spend_for(org, &Self::day_key(now_ms));
        let cap = self.config.per_org_daily_usd.min(self.config.hard_cap_usd);
        if spent >= cap {
            return Err(Fault::permanent(DAILY_BUDGET_MESSAGE));
        }
        Ok(())
    }

    /// In-flight gate: stop a run whose accumulated cost passed the
    /// per-task cap.
    pub fn check_task(&self, cost_usd: f64) -> Result<(), Fault> {
        if cost_usd > self.config.per_task_usd {
            return Err(Fault::permanent(format!(
                "Task budget exceeded (${:.2} of ${:.2}).",
                cost_usd, self.config.per_task_usd
            )));
        }
        Ok(())
    }

    /// Record a finished task's cost into the org's day total.
    pub fn record(&self, org: &OrgId, cost_usd: f64, now_ms: u64) {
        if cost_usd <= 0.0 {
            return;
        }
        if let Err(e) = self.store.record_spend(org, &Self::day_key(now_ms), cost_usd) {
            tracing::warn!(org = %org, "failed to record spend: {e}");
        }
    }

    pub fn spend_today(&self, org: &OrgId, now_ms: u64) -> f64 {
        self.store.spend_for(org, &Self::day_key(now_ms))
    }
}

#[cfg(test)]
#[path = "budget_tests.rs"]
mod tests;
