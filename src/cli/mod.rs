//! Command line interface module
//!
//! Argument parsing and the runner that wires configuration, the registry
//! directory and the sync orchestrator together for each subcommand.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
