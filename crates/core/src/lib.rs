// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-core: shared domain types for the Gantry task control plane

pub mod macros;

pub mod backoff;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod id;
pub mod installation;
pub mod priority;
pub mod provider;
pub mod source;
pub mod task;
pub mod time_fmt;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backoff::Backoff;
pub use clock::{Clock, FakeClock, SystemClock};
pub use command::Command;
pub use error::{ErrorKind, Fault};
pub use event::Event;
pub use id::{short, InstallationId, TaskId, WorkspaceId};
pub use installation::{Installation, OrgId, Secret, Token};
pub use priority::Priority;
pub use provider::Provider;
pub use source::{SourceRef, TaskSource};
#[cfg(any(test, feature = "test-support"))]
pub use task::TaskBuilder;
pub use task::{Task, TaskResult, TaskStatus};
pub use time_fmt::format_elapsed_ms;
pub use worker::WorkerId;
