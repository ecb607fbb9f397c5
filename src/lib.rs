//! sjq - a single-node batch job queue
//!
//! Clients submit shell scripts with declared process-slot and memory needs.
//! The daemon stores them, launches them when the resources are free and
//! their dependencies have succeeded, and records how they exit.

pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod scheduler;
pub mod store;

pub use error::{Result, SjqError};
