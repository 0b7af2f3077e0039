// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Installation and token model.
//!
//! An installation is the credential set for one (provider, organization)
//! pair. At most one active installation exists per pair; uninstalls soft-
//! delete, they never remove the row.

use crate::id::InstallationId;
use crate::provider::Provider;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Organization identifier scoped to a provider (GitHub org login, Jira
/// site, Slack team id, Sentry org slug).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for OrgId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A string that never appears in `Debug` or `Display` output.
///
/// All credential material is held in this wrapper; log statements that
/// format the containing struct see only `[redacted]`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value. Call sites must not pass the result to a
    /// log statement or embed it in a URL written to disk.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Credential set for one (provider, organization) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: InstallationId,
    pub provider: Provider,
    pub org: OrgId,
    /// Opaque access token, ciphertext at rest.
    pub access_token: Secret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Per-installation webhook signing secret; falls back to the provider
    /// default from the environment when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<Secret>,
    /// Access-token expiry, epoch milliseconds. `None` means non-expiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    pub active: bool,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Installation {
    /// Derive the token view served to workers.
    pub fn token(&self) -> Token {
        Token { access: self.access_token.clone(), expires_at_ms: self.expires_at_ms }
    }
}

crate::builder! {
    pub struct InstallationBuilder => Installation {
        into {
            org: OrgId = "acme",
            access_token: Secret = "tok-test",
        }
        set {
            provider: Provider = Provider::Github,
            scopes: Vec<String> = Vec::new(),
            active: bool = true,
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
        }
        option {
            refresh_token: Secret = None,
            webhook_secret: Secret = None,
            expires_at_ms: u64 = None,
        }
        computed {
            id: InstallationId = InstallationId::new_at(1_000_000),
        }
    }
}

/// A derived access token with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access: Secret,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl Token {
    /// Remaining lifetime at `now`, or `None` for non-expiring tokens.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at_ms.map(|at| at.saturating_sub(now_ms))
    }

    /// Whether the token still has at least `skew_ms` of life left.
    pub fn fresh_at(&self, now_ms: u64, skew_ms: u64) -> bool {
        match self.remaining_ms(now_ms) {
            Some(remaining) => remaining >= skew_ms,
            None => true,
        }
    }
}

#[cfg(test)]
#[path = "installation_tests.rs"]
mod tests;
