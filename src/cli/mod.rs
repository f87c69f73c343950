//! Command-line interface for datatagger.
//!
//! Provides the `api` and `local` tagging commands and the `format`
//! normalization command.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
