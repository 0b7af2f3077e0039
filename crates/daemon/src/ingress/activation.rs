// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Activation rules: which normalized events become tasks.
//!
//! The rules are data, not per-provider code paths — one table consulted
//! for every event kind. An event that does not activate is acknowledged
//! and dropped.

use super::normalize::{EventKind, NormalizedEvent};
use gantry_core::Command;

#[derive(Debug, Clone)]
pub struct ActivationRules {
    /// Mention prefix in comments (`@agent <verb>`).
    pub mention: String,
    /// The agent identity that triggers on issue-tracker assignment.
    pub tracker_agent_identity: String,
    /// Label that arms status-transition triggering.
    pub tracker_trigger_label: String,
    /// Statuses that fire when the label is armed.
    pub tracker_trigger_statuses: Vec<String>,
    /// Monitor alerts activate at this event count...
    pub monitor_min_count: u64,
    /// ...or at any of these levels.
    pub monitor_fatal_levels: Vec<String>,
}

impl Default for ActivationRules {
    fn default() -> Self {
        Self {
            mention: "@agent".into(),
            tracker_agent_identity: "agent".into(),
            tracker_trigger_label: "AI-Fix".into(),
            tracker_trigger_statuses: vec!["Ready for AI".into()],
            monitor_min_count: 10,
            monitor_fatal_levels: vec!["fatal".into()],
        }
    }
}

/// A decided activation: the command to run and the task input text.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub command: Command,
    pub input: String,
}

impl ActivationRules {
    pub fn evaluate(&self, event: &NormalizedEvent) -> Option<Activation> {
        match &event.kind {
            EventKind::Comment { body, author_is_bot } => {
                if *author_is_bot {
                    return None;
                }
                let command = self.mention_verb(body)?;
                Some(Activation { command, input: body.clone() })
            }

            EventKind::AssigneeChanged { assignee } => {
                if assignee != &self.tracker_agent_identity {
                    return None;
                }
                Some(Activation { command: Command::Analyze, input: "assigned to agent".into() })
            }

            EventKind::StatusChanged { status, labels } => {
                let armed = labels.iter().any(|l| l == &self.tracker_trigger_label);
                let firing = self.tracker_trigger_statuses.iter().any(|s| s == status);
                if !(armed && firing) {
                    return None;
                }
                Some(Activation { command: Command::Fix, input: format!("moved to {status}") })
            }

            EventKind::ChatMention { text } => {
                // A mention with no recognizable verb still answers, as
                // help.
                let command = self.first_verb(text).unwrap_or(Command::Help);
                Some(Activation { command, input: text.clone() })
            }

            EventKind::SlashCommand { text } => {
                let command = self.first_verb(text).unwrap_or(Command::Help);
                Some(Activation { command, input: text.clone() })
            }

            EventKind::MonitorAlert { level, count, title } => {
                let fatal = self.monitor_fatal_levels.iter().any(|l| l == level);
                if !fatal && *count < self.monitor_min_count {
                    return None;
                }
                Some(Activation { command: Command::Analyze, input: title.clone() })
            }
        }
    }

    /// Find `@agent <verb>` in a comment body.
    fn mention_verb(&self, body: &str) -> Option<Command> {
        let mut words = body.split_whitespace();
        while let Some(word) = words.next() {
            if word == self.mention {
                return words.next().and_then(Command::parse);
            }
        }
        None
    }

    /// First recognizable verb in free text (chat).
    fn first_verb(&self, text: &str) -> Option<Command> {
        text.split_whitespace().find_map(Command::parse)
    }
}

#[cfg(test)]
#[path = "activation_tests.rs"]
mod tests;
