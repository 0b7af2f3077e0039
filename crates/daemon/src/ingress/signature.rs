// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Webhook signature verification.
//!
//! Every provider signs with HMAC-SHA256 over a provider-specific base
//! string; comparison is constant-time. Verification fails closed: a
//! missing secret or header is a rejection, never a pass-through.

use axum::http::HeaderMap;
use gantry_core::{Provider, Secret};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid,
}

/// Verify an inbound webhook body against the signing secret.
pub fn verify(
    provider: Provider,
    secret: &Secret,
    headers: &HeaderMap,
    body: &[u8],
) -> SignatureCheck {
    if secret.is_empty() {
        return SignatureCheck::Invalid;
    }
    match provider {
        Provider::Github => {
            verify_hex_header(secret, headers, "x-hub-signature-256", Some("sha256="), body)
        }
        Provider::Jira => {
            verify_hex_header(secret, headers, "x-hub-signature", Some("sha256="), body)
        }
        Provider::Sentry => {
            verify_hex_header(secret, headers, "sentry-hook-signature", None, body)
        }
        Provider::Slack => verify_slack(secret, headers, body),
    }
}

fn verify_hex_header(
    secret: &Secret,
    headers: &HeaderMap,
    header: &str,
    prefix: Option<&str>,
    base: &[u8],
) -> SignatureCheck {
    let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) else {
        return SignatureCheck::Invalid;
    };
    let presented = match prefix {
        Some(prefix) => match value.strip_prefix(prefix) {
            Some(rest) => rest,
            None => return SignatureCheck::Invalid,
        },
        None => value,
    };
    compare(secret, base, presented)
}

/// Slack v0 signing: `v0:{timestamp}:{body}` with the signature in
/// `x-slack-signature` as `v0=<hex>`.
fn verify_slack(secret: &Secret, headers: &HeaderMap, body: &[u8]) -> SignatureCheck {
    let Some(timestamp) =
        headers.get("x-slack-request-timestamp").and_then(|v| v.to_str().ok())
    else {
        return SignatureCheck::Invalid;
    };
    let Some(value) = headers.get("x-slack-signature").and_then(|v| v.to_str().ok()) else {
        return SignatureCheck::Invalid;
    };
    let Some(presented) = value.strip_prefix("v0=") else {
        return SignatureCheck::Invalid;
    };
    let mut base = Vec::with_capacity(body.len() + timestamp.len() + 4);
    base.extend_from_slice(b"v0:");
    base.extend_from_slice(timestamp.as_bytes());
    base.extend_from_slice(b":");
    base.extend_from_slice(body);
    compare(secret, &base, presented)
}

fn compare(secret: &Secret, base: &[u8], presented_hex: &str) -> SignatureCheck {
    let Ok(presented) = hex::decode(presented_hex) else {
        return SignatureCheck::Invalid;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
        return SignatureCheck::Invalid;
    };
    mac.update(base);
    let expected = mac.finalize().into_bytes();
    if expected.ct_eq(presented.as_slice()).into() {
        SignatureCheck::Valid
    } else {
        SignatureCheck::Invalid
    }
}

/// Compute the signature value a caller would present (test and replay
/// tooling).
pub fn sign(provider: Provider, secret: &Secret, timestamp: Option<&str>, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.expose().as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    match provider {
        Provider::Slack => {
            mac.update(b"v0:");
            mac.update(timestamp.unwrap_or("0").as_bytes());
            mac.update(b":");
            mac.update(body);
            format!("v0={}", hex::encode(mac.finalize().into_bytes()))
        }
        Provider::Github | Provider::Jira => {
            mac.update(body);
            format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
        }
        Provider::Sentry => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
