// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Priority bands for the durable queue.
//!
//! Bands are strict: the queue never serves a lower band while a higher one
//! has an eligible task. Within a band, order is FIFO by
//! `(scheduled_for, task id)`.

use serde::{Deserialize, Serialize};

/// Task priority. `Ord` sorts from most to least urgent so `Priority::ALL`
/// iterates bands in service order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All bands in service order (highest first).
    pub const ALL: [Priority; 4] =
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Whether backpressure may reject an enqueue at this priority once the
    /// queue passes its soft limit. Critical is admitted up to the hard limit.
    pub fn sheds_under_backpressure(&self) -> bool {
        matches!(self, Priority::Normal | Priority::Low)
    }
}

crate::simple_display! {
    Priority {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
}

#[cfg(test)]
#[path = "priority_tests.rs"]
mod tests;
