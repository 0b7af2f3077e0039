// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Agent command verbs.
//!
//! A command names what the agent is asked to do with the task's input.
//! Each verb carries a default priority and a default wall-clock timeout;
//! both can be overridden by configuration.

use crate::priority::Priority;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Analyze,
    Plan,
    Implement,
    Fix,
    Review,
    Test,
    Refactor,
    Improve,
    Explain,
    Approve,
    Reject,
    Help,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::Analyze,
        Command::Plan,
        Command::Implement,
        Command::Fix,
        Command::Review,
        Command::Test,
        Command::Refactor,
        Command::Improve,
        Command::Explain,
        Command::Approve,
        Command::Reject,
        Command::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Analyze => "analyze",
            Command::Plan => "plan",
            Command::Implement => "implement",
            Command::Fix => "fix",
            Command::Review => "review",
            Command::Test => "test",
            Command::Refactor => "refactor",
            Command::Improve => "improve",
            Command::Explain => "explain",
            Command::Approve => "approve",
            Command::Reject => "reject",
            Command::Help => "help",
        }
    }

    /// Parse a mention verb (`@agent <verb>`). Unknown verbs do not activate.
    pub fn parse(s: &str) -> Option<Command> {
        match s {
            "analyze" => Some(Command::Analyze),
            "plan" => Some(Command::Plan),
            "implement" => Some(Command::Implement),
            "fix" => Some(Command::Fix),
            "review" => Some(Command::Review),
            "test" => Some(Command::Test),
            "refactor" => Some(Command::Refactor),
            "improve" => Some(Command::Improve),
            "explain" => Some(Command::Explain),
            "approve" => Some(Command::Approve),
            "reject" => Some(Command::Reject),
            "help" => Some(Command::Help),
            _ => None,
        }
    }

    /// Default priority band. Human-gate verbs jump the queue; fixes beat
    /// analysis; chatter yields to everything.
    pub fn default_priority(&self) -> Priority {
        match self {
            Command::Approve | Command::Reject => Priority::Critical,
            Command::Fix | Command::Implement => Priority::High,
            Command::Analyze
            | Command::Plan
            | Command::Review
            | Command::Test
            | Command::Refactor
            | Command::Improve => Priority::Normal,
            Command::Explain | Command::Help => Priority::Low,
        }
    }

    /// Default wall-clock timeout for the CLI runner.
    pub fn default_timeout(&self) -> Duration {
        let secs = match self {
            Command::Review | Command::Test => 300,
            Command::Fix | Command::Implement => 600,
            Command::Refactor | Command::Improve => 900,
            Command::Explain => 120,
            Command::Help => 60,
            _ => 600,
        };
        Duration::from_secs(secs)
    }
}

crate::simple_display! {
    Command {
        Analyze => "analyze",
        Plan => "plan",
        Implement => "implement",
        Fix => "fix",
        Review => "review",
        Test => "test",
        Refactor => "refactor",
        Improve => "improve",
        Explain => "explain",
        Approve => "approve",
        Reject => "reject",
        Help => "help",
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
