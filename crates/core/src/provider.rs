// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Source providers that raise events and receive results.

use serde::{Deserialize, Serialize};

/// The external tools a task can originate from and report back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Jira,
    Slack,
    Sentry,
}

impl Provider {
    pub const ALL: [Provider; 4] =
        [Provider::Github, Provider::Jira, Provider::Slack, Provider::Sentry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Jira => "jira",
            Provider::Slack => "slack",
            Provider::Sentry => "sentry",
        }
    }

    /// Parse a provider from its wire name. Unknown names are rejected at
    /// the ingress with a bad-request response.
    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "github" => Some(Provider::Github),
            "jira" => Some(Provider::Jira),
            "slack" => Some(Provider::Slack),
            "sentry" => Some(Provider::Sentry),
            _ => None,
        }
    }
}

crate::simple_display! {
    Provider {
        Github => "github",
        Jira => "jira",
        Slack => "slack",
        Sentry => "sentry",
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
