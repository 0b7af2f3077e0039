// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Installation event appliers.

use super::MaterializedState;
use gantry_core::Event;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::InstallationCreated { installation } => {
            if !state.installations.contains_key(installation.id.as_str()) {
                state
                    .installations
                    .insert(installation.id.as_str().to_string(), installation.clone());
            }
        }

        Event::InstallationTokenRefreshed { id, access_token, refresh_token, expires_at_ms, at_ms } => {
            if let Some(installation) = state.installations.get_mut(id.as_str()) {
                installation.access_token = access_token.clone();
                if refresh_token.is_some() {
                    installation.refresh_token = refresh_token.clone();
                }
                installation.expires_at_ms = *expires_at_ms;
                installation.updated_at_ms = *at_ms;
            }
        }

        Event::InstallationRevoked { id, at_ms } => {
            // Soft delete: the row stays, only the active flag drops.
            if let Some(installation) = state.installations.get_mut(id.as_str()) {
                installation.active = false;
                installation.updated_at_ms = *at_ms;
            }
        }

        _ => {}
    }
}
