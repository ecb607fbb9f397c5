//! CLI module for sjq - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the daemon
//! and talking to it.

pub mod commands;

pub use commands::Cli;
