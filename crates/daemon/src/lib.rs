// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Gantry Authors

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-daemon: webhook ingress, configuration, and the composition
//! root that wires store, engine, and adapters into the `gantryd` binary.

pub mod config;
pub mod env;
pub mod ingress;
pub mod lifecycle;

pub use config::{Config, ConfigError};
pub use ingress::{AppState, IngressConfig};
