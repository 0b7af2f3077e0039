// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Token-bucket rate limiting for the ingress.
//!
//! Two scopes: per-organization (slow, large window) and per-endpoint
//! (fast, small burst). Buckets refill continuously from the injected
//! clock so tests can steer time.

use gantry_core::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct RateConfig {
    pub per_org_per_hour: u32,
    pub per_endpoint_per_minute: u32,
    pub burst: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self { per_org_per_hour: 100, per_endpoint_per_minute: 20, burst: 10 }
    }
}

struct Bucket {
    tokens: f64,
    last_ms: u64,
}

pub struct RateLimiter<C: Clock> {
    clock: C,
    config: RateConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(clock: C, config: RateConfig) -> Self {
        Self { clock, config, buckets: Mutex::new(HashMap::new()) }
    }

    /// One inbound request for `org` on `endpoint`; true when admitted.
    ///
    /// Both buckets are charged together so a rejected request does not
    /// half-consume.
    pub fn admit(&self, org: &str, endpoint: &str) -> bool {
        let now = self.clock.epoch_ms();
        let org_rate = f64::from(self.config.per_org_per_hour) / 3_600_000.0;
        let org_capacity = f64::from(self.config.per_org_per_hour);
        let ep_rate = f64::from(self.config.per_endpoint_per_minute) / 60_000.0;
        let ep_capacity = f64::from(self.config.burst);

        let mut buckets = self.buckets.lock();
        let org_ok = peek(&mut buckets, &format!("org:{org}"), now, org_rate, org_capacity);
        let ep_ok = peek(&mut buckets, &format!("ep:{endpoint}"), now, ep_rate, ep_capacity);
        if org_ok && ep_ok {
            take(&mut buckets, &format!("org:{org}"));
            take(&mut buckets, &format!("ep:{endpoint}"));
            true
        } else {
            false
        }
    }
}

fn peek(
    buckets: &mut HashMap<String, Bucket>,
    key: &str,
    now: u64,
    rate_per_ms: f64,
    capacity: f64,
) -> bool {
    let bucket = buckets
        .entry(key.to_string())
        .or_insert(Bucket { tokens: capacity, last_ms: now });
    let elapsed = now.saturating_sub(bucket.last_ms) as f64;
    bucket.tokens = (bucket.tokens + elapsed * rate_per_ms).min(capacity);
    bucket.last_ms = now;
    bucket.tokens >= 1.0
}

fn take(buckets: &mut HashMap<String, Bucket>, key: &str) {
    if let Some(bucket) = buckets.get_mut(key) {
        bucket.tokens -= 1.0;
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
