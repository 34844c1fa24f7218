//! Command-line interface for job-dispatcher.
//!
//! Provides commands to validate a dispatcher configuration and to dispatch a
//! single job with it.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
