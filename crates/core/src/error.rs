// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Failure taxonomy carried on every error that reaches a task record.
//!
//! The kind decides retry behavior: `Transient` is retried with backoff,
//! everything else is terminal for the attempt. `System` additionally
//! raises an operator alert without taking the worker down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed command, missing context. Reported back, never retried.
    User,
    /// Network glitch, 5xx, rate limit, fetch flake. Retried with backoff.
    Transient,
    /// 4xx non-429, revoked auth, policy violation, exhausted budget.
    Permanent,
    /// Out-of-memory, disk full, violated internal invariant.
    System,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

crate::simple_display! {
    ErrorKind {
        User => "user",
        Transient => "transient",
        Permanent => "permanent",
        System => "system",
    }
}

/// A classified failure: taxonomy kind plus a human-readable message.
///
/// The message is what a user may eventually see; stack traces and internal
/// detail stay in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
