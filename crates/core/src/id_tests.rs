// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use yare::parameterized;

#[test]
fn generated_ids_have_prefix_and_length() {
    let id = TaskId::new_at(1_700_000_000_000);
    assert!(id.as_str().starts_with("task-"));
    assert_eq!(id.as_str().len(), 22);
}

#[test]
fn generated_ids_are_unique() {
    let a = TaskId::new_at(1_700_000_000_000);
    let b = TaskId::new_at(1_700_000_000_000);
    assert_ne!(a, b);
}

#[test]
fn ids_sort_by_creation_time() {
    let early = TaskId::new_at(1_700_000_000_000);
    let late = TaskId::new_at(1_700_000_000_001);
    assert!(early < late);
    assert!(early.as_str() < late.as_str());
}

#[test]
fn suffix_strips_prefix() {
    let id = InstallationId::from_string("inst-abc123");
    assert_eq!(id.suffix(), "abc123");
}

#[test]
fn short_truncates_suffix() {
    let id = TaskId::from_string("task-abcdefgh");
    assert_eq!(id.short(4), "abcd");
    assert_eq!(id.short(100), "abcdefgh");
}

#[test]
fn from_string_round_trips() {
    let id = WorkspaceId::from_string("wksp-xyz");
    assert_eq!(id.as_str(), "wksp-xyz");
    assert_eq!(id, "wksp-xyz");
}

#[test]
fn serde_round_trip() {
    let id = TaskId::new_at(42);
    let json = serde_json::to_string(&id).unwrap();
    let back: TaskId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[parameterized(
    zero = { 0, "000000000" },
    one = { 1, "000000001" },
    thirty_six = { 36, "000000010" },
)]
fn encode_ts_is_fixed_width(ms: u64, expected: &str) {
    assert_eq!(encode_ts(ms), expected);
}

#[test]
fn encode_ts_orders_lexicographically() {
    let mut prev = encode_ts(0);
    for ms in [1, 999, 1_000, 1_700_000_000_000, u64::from(u32::MAX) * 1_000] {
        let cur = encode_ts(ms);
        assert!(prev < cur, "{prev} >= {cur}");
        prev = cur;
    }
}

#[test]
fn idbuf_borrow_matches_hash() {
    use std::collections::HashMap;
    let mut map: HashMap<TaskId, u32> = HashMap::new();
    let id = TaskId::from_string("task-lookup");
    map.insert(id, 7);
    assert_eq!(map.get("task-lookup"), Some(&7));
}

#[test]
fn short_helper_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
}
