// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

use super::*;
use gantry_core::ErrorKind;
use yare::parameterized;

#[parameterized(
    progress = { r#"{"type":"progress","phase":"plan","message":"thinking"}"#, false },
    usage = { r#"{"type":"usage","input_tokens":10,"output_tokens":2,"cost_usd":0.001}"#, false },
    artifact = { r###"{"type":"artifact","content":"## Findings","kind":"markdown"}"###, false },
    error = { r#"{"type":"error","kind":"transient","message":"rate limited"}"#, true },
    done = { r#"{"type":"done","exit_code":0}"#, true },
)]
fn wire_events_decode(json: &str, terminal: bool) {
    let event: RunnerEvent = serde_json::from_str(json).unwrap();
    assert_eq!(event.is_terminal(), terminal);

    let round = serde_json::to_string(&event).unwrap();
    let back: RunnerEvent = serde_json::from_str(&round).unwrap();
    assert_eq!(event, back);
}

#[test]
fn error_kinds_cover_taxonomy() {
    for (wire, kind) in [
        ("user", ErrorKind::User),
        ("transient", ErrorKind::Transient),
        ("permanent", ErrorKind::Permanent),
        ("system", ErrorKind::System),
    ] {
        let json = format!(r#"{{"type":"error","kind":"{wire}","message":"m"}}"#);
        let event: RunnerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, RunnerEvent::Error { kind, message: "m".into() });
    }
}

#[test]
fn argv_substitutes_placeholders() {
    let config = RunnerConfig::new(
        "agent-cli run --mode {command} --dir {workspace}",
        "review",
        "/srv/ws/acme".into(),
    );
    let argv = config.argv().unwrap();
    assert_eq!(argv, vec!["agent-cli", "run", "--mode", "review", "--dir", "/srv/ws/acme"]);
}

#[test]
fn empty_command_line_is_rejected() {
    let config = RunnerConfig::new("   ", "review", "/tmp".into());
    assert!(matches!(config.argv(), Err(RunnerError::EmptyCommand)));
}

#[test]
fn token_and_input_never_reach_argv() {
    let config = RunnerConfig::new("agent-cli {command}", "fix", "/tmp".into())
        .input_message("@agent fix the bug")
        .token(gantry_core::Secret::new("ghs_secret"));
    let argv = config.argv().unwrap();
    assert!(!argv.iter().any(|a| a.contains("ghs_secret")));
    assert!(!argv.iter().any(|a| a.contains("fix the bug")));
}

mod fake_runner {
    use super::*;
    use crate::runner::{FakeRunner, FakeScript};

    #[tokio::test]
    async fn replays_script_in_order() {
        let runner = FakeRunner::with_script(FakeScript::success("## Report"));
        let config = RunnerConfig::new("agent-cli {command}", "analyze", "/tmp".into());
        let mut session = runner.spawn(config).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = session.events.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(runner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn stalled_script_exits_on_graceful() {
        let runner = FakeRunner::with_script(FakeScript::stalled(2, true));
        let config = RunnerConfig::new("agent-cli {command}", "review", "/tmp".into());
        let mut session = runner.spawn(config).await.unwrap();

        assert!(session.events.recv().await.is_some());
        assert!(session.events.recv().await.is_some());

        session.control.graceful_stop().await;
        let last = session.events.recv().await.unwrap();
        assert!(last.is_terminal());
        assert!(session.events.recv().await.is_none());
        assert!(runner.graceful_stopped(0));
        assert!(!runner.killed(0));
    }

    #[tokio::test]
    async fn stubborn_script_requires_kill() {
        let runner = FakeRunner::with_script(FakeScript::stalled(0, false));
        let config = RunnerConfig::new("agent-cli {command}", "review", "/tmp".into());
        let mut session = runner.spawn(config).await.unwrap();

        session.control.graceful_stop().await;
        session.control.kill().await;
        assert!(session.events.recv().await.is_none(), "kill ends the stream");
        assert!(runner.killed(0));
    }
}
