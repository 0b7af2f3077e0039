// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use yare::parameterized;

#[parameterized(
    transport = { ProviderError::Transport("reset".into()), true },
    server_error = { ProviderError::Status { status: 502, retry_after: None, message: "bad gateway".into() }, true },
    rate_limited = { ProviderError::Status { status: 429, retry_after: Some(Duration::from_secs(7)), message: "slow down".into() }, true },
    not_found = { ProviderError::Status { status: 404, retry_after: None, message: "gone".into() }, false },
    unauthorized = { ProviderError::Status { status: 401, retry_after: None, message: "no".into() }, false },
)]
fn retryability(err: ProviderError, retryable: bool) {
    assert_eq!(err.is_retryable(), retryable);
}

#[test]
fn only_429_mandates_a_delay() {
    let rate = ProviderError::Status {
        status: 429,
        retry_after: Some(Duration::from_secs(7)),
        message: String::new(),
    };
    assert_eq!(rate.mandated_delay(), Some(Duration::from_secs(7)));

    let server = ProviderError::Status { status: 503, retry_after: Some(Duration::from_secs(7)), message: String::new() };
    assert_eq!(server.mandated_delay(), None);
}

mod fake_client {
    use super::super::fake::{FakeOutcome, FakeProviderClient};
    use super::*;

    #[tokio::test]
    async fn records_calls_and_mints_artifact_ids() {
        let client = FakeProviderClient::new();
        let token = Secret::new("t");
        let target = CommentTarget { repository: Some("acme/widgets".into()), number: Some(42), ..Default::default() };

        assert_eq!(client.peek_next_artifact_id(), "c-fake-1");
        let id = client.post_comment(&token, &target, "## Findings").await.unwrap();
        assert_eq!(id, "c-fake-1");
        assert_eq!(client.call_count(), 1);

        let id = client.post_comment(&token, &target, "more").await.unwrap();
        assert_eq!(id, "c-fake-2");
    }

    #[tokio::test]
    async fn scripted_failures_fire_in_order() {
        let client = FakeProviderClient::new();
        client.script([
            FakeOutcome::Transport,
            FakeOutcome::Status { status: 429, retry_after_secs: Some(3) },
            FakeOutcome::Ok,
        ]);
        let token = Secret::new("t");
        let target = CommentTarget::default();

        assert!(client.post_comment(&token, &target, "a").await.is_err());
        let err = client.post_comment(&token, &target, "b").await.unwrap_err();
        assert_eq!(err.mandated_delay(), Some(Duration::from_secs(3)));
        assert!(client.post_comment(&token, &target, "c").await.is_ok());
    }
}
