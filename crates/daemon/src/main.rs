// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

//! `gantryd` — the Gantry task control plane daemon.

use gantry_daemon::config::Config;
use gantry_daemon::lifecycle;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gantryd: configuration error: {e}");
            std::process::exit(lifecycle::EXIT_CONFIG);
        }
    };

    // Structured logs to stderr plus a daily file under the state dir.
    let file_appender =
        tracing_appender::rolling::daily(config.state_dir.join("logs"), "gantryd.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("gantryd: cannot start runtime: {e}");
            std::process::exit(lifecycle::EXIT_CONFIG);
        }
    };
    let code = runtime.block_on(lifecycle::run(config));
    std::process::exit(code);
}
