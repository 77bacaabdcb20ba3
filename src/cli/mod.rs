//! Command-line interface for qless.
//!
//! Provides commands for inspecting queues and jobs, enqueueing work,
//! tracking and config management.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
