// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Marker and spend event appliers.

use super::types::Marker;
use super::MaterializedState;
use gantry_core::Event;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::MarkerSet { key, expires_at_ms } => {
            // Set-if-absent, but a later expiry may extend: replays carry
            // the same expiry so applying twice is still a no-op.
            let marker = state.markers.entry(key.clone()).or_insert(Marker { expires_at_ms: 0 });
            marker.expires_at_ms = marker.expires_at_ms.max(*expires_at_ms);
        }

        Event::MarkerCleared { key } => {
            state.markers.remove(key);
        }

        Event::SpendRecorded { org, day, total_usd } => {
            let ledger = state.spend.entry(org.clone()).or_default();
            // Totals are assigned: idempotent, and monotone within a day.
            let entry = ledger.days.entry(day.clone()).or_insert(0.0);
            if *total_usd > *entry {
                *entry = *total_usd;
            }
        }

        _ => {}
    }
}
