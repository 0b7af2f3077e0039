// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! Incremental line-framed JSON decoder for runner stdout.
//!
//! Chunks arrive at arbitrary boundaries; the decoder buffers until a
//! newline, then parses. Lines that are not valid runner events are
//! surfaced as `progress` output rather than dropped, so a runner that
//! mixes plain logging into stdout stays observable.

use super::RunnerEvent;

#[derive(Default)]
pub struct LineDecoder {
    buf: String,
    /// Set once a terminal event is produced; everything after is ignored.
    finished: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk, yielding every event completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<RunnerEvent> {
        let mut events = Vec::new();
        self.buf.push_str(chunk);
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            if let Some(event) = self.decode_line(line.trim_end()) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing unterminated line (stream EOF).
    pub fn finish(&mut self) -> Option<RunnerEvent> {
        let rest = std::mem::take(&mut self.buf);
        self.decode_line(rest.trim_end())
    }

    fn decode_line(&mut self, line: &str) -> Option<RunnerEvent> {
        if self.finished || line.is_empty() {
            return None;
        }
        let event = match serde_json::from_str::<RunnerEvent>(line) {
            Ok(event) => event,
            Err(_) => RunnerEvent::Progress { phase: "output".into(), message: line.to_string() },
        };
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }
}

#[cfg(test)]
#[path = "decode_tests.rs"]
mod tests;
