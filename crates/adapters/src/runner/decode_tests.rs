// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;

#[test]
fn whole_lines_decode() {
    let mut decoder = LineDecoder::new();
    let events = decoder
        .feed("{\"type\":\"progress\",\"phase\":\"plan\",\"message\":\"reading\"}\n");
    assert_eq!(
        events,
        vec![RunnerEvent::Progress { phase: "plan".into(), message: "reading".into() }]
    );
}

#[test]
fn split_lines_reassemble() {
    let mut decoder = LineDecoder::new();
    assert!(decoder.feed("{\"type\":\"usage\",\"input_tok").is_empty());
    let events = decoder.feed("ens\":5,\"output_tokens\":2,\"cost_usd\":0.01}\n");
    assert_eq!(
        events,
        vec![RunnerEvent::Usage { input_tokens: 5, output_tokens: 2, cost_usd: 0.01 }]
    );
}

#[test]
fn multiple_events_in_one_chunk() {
    let mut decoder = LineDecoder::new();
    let chunk = "{\"type\":\"progress\",\"phase\":\"a\",\"message\":\"1\"}\n{\"type\":\"done\",\"exit_code\":0}\n";
    let events = decoder.feed(chunk);
    assert_eq!(events.len(), 2);
    assert!(events[1].is_terminal());
    assert!(decoder.is_finished());
}

#[test]
fn non_json_becomes_progress_output() {
    let mut decoder = LineDecoder::new();
    let events = decoder.feed("npm WARN deprecated\n");
    assert_eq!(
        events,
        vec![RunnerEvent::Progress { phase: "output".into(), message: "npm WARN deprecated".into() }]
    );
}

#[test]
fn blank_lines_are_skipped() {
    let mut decoder = LineDecoder::new();
    assert!(decoder.feed("\n\n  \n").is_empty());
}

#[test]
fn nothing_after_terminal() {
    let mut decoder = LineDecoder::new();
    let chunk = "{\"type\":\"error\",\"kind\":\"user\",\"message\":\"bad input\"}\n{\"type\":\"done\",\"exit_code\":0}\n";
    let events = decoder.feed(chunk);
    assert_eq!(events.len(), 1, "the stream ends at the first terminal event");
    assert_eq!(
        events[0],
        RunnerEvent::Error { kind: gantry_core::ErrorKind::User, message: "bad input".into() }
    );
}

#[test]
fn finish_flushes_unterminated_tail() {
    let mut decoder = LineDecoder::new();
    assert!(decoder.feed("{\"type\":\"done\",\"exit_code\":0}").is_empty());
    assert_eq!(decoder.finish(), Some(RunnerEvent::Done { exit_code: 0 }));
}

#[test]
fn finish_on_empty_buffer_is_none() {
    let mut decoder = LineDecoder::new();
    assert_eq!(decoder.finish(), None);
}
