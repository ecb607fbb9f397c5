//! IPC Layer - Unix socket server for client-daemon communication
//!
//! This module provides:
//! - Message types for requests and responses
//! - Unix socket server for the daemon
//! - Client used by the CLI

pub mod client;
pub mod messages;
pub mod server;

pub use client::{IpcClient, IpcClientConfig};
pub use messages::{
    DaemonError, DaemonRequest, DaemonResponse, ErrorCode, JobIdParams, ListParams, Methods, SubmitResult,
};
pub use server::{IpcServer, IpcServerConfig, RequestHandler};
