// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Exponential backoff with ratio jitter.
//!
//! Shared by queue nacks, token refresh, workspace fetches, and outbound
//! posting. Delay for attempt `n` (0-based) is
//! `min(base * 2^n, cap) * (1 + jitter)` with jitter drawn uniformly from
//! `[0, ratio)`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the uniform jitter ratio (0.1 = up to +10%).
    pub jitter_ratio: f64,
    /// Attempts before the caller gives up (not enforced here; callers
    /// compare against it).
    pub max_attempts: u32,
}

impl Backoff {
    /// Policy for transient task retries: 1s base doubling to a 300s cap.
    pub fn for_task_retry() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            jitter_ratio: 0.1,
            max_attempts: u32::MAX,
        }
    }

    /// Policy for token refresh: 3 attempts, base 2s.
    pub fn for_token_refresh() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter_ratio: 0.1,
            max_attempts: 3,
        }
    }

    /// Policy for outbound posting and workspace fetches: 3 attempts.
    pub fn for_outbound() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_ratio: 0.1,
            max_attempts: 3,
        }
    }

    /// Deterministic delay for `attempt` with an explicit jitter sample in
    /// `[0, 1)`. Exposed so tests can pin the sample.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let exp = attempt.min(32);
        let uncapped = self.base.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        let capped = uncapped.min(self.cap);
        capped.mul_f64(1.0 + self.jitter_ratio * sample.clamp(0.0, 1.0))
    }

    /// Delay for `attempt` with fresh random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_sample(attempt, rand::thread_rng().gen::<f64>())
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
