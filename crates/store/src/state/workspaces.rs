// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Workspace event appliers.

use super::types::WorkspaceRecord;
use super::MaterializedState;
use gantry_core::Event;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::WorkspaceRecorded { id, provider, org, repo, git_ref, path, head, last_access_ms } => {
            let record = WorkspaceRecord {
                id: *id,
                provider: *provider,
                org: org.clone(),
                repo: repo.clone(),
                git_ref: git_ref.clone(),
                path: path.clone(),
                head: head.clone(),
                last_access_ms: *last_access_ms,
            };
            // Assignment: the latest record wins, replays converge.
            state.workspaces.insert(id.as_str().to_string(), record);
        }

        Event::WorkspaceEvicted { id } => {
            state.workspaces.remove(id.as_str());
        }

        _ => {}
    }
}
