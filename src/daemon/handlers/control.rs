//! Control request handlers
//!
//! Handles ping and daemon.* IPC methods.

use serde_json::json;

use crate::daemon::context::DaemonContext;
use crate::ipc::messages::{DaemonError, DaemonResponse};
use crate::store::JobStore;

/// Handle ping
pub fn handle_ping(id: u64) -> DaemonResponse {
    DaemonResponse::success(id, json!({"pong": true, "version": env!("CARGO_PKG_VERSION")}))
}

/// Handle daemon.status - current resource ledger
pub fn handle_daemon_status<S: JobStore>(id: u64, ctx: &DaemonContext<S>) -> DaemonResponse {
    match serde_json::to_value(ctx.ledger()) {
        Ok(value) => DaemonResponse::success(id, value),
        Err(e) => DaemonResponse::error(id, DaemonError::internal_error(e.to_string())),
    }
}

/// Handle daemon.shutdown - stop accepting and shut down
pub fn handle_daemon_shutdown<S: JobStore>(id: u64, ctx: &DaemonContext<S>) -> DaemonResponse {
    ctx.request_shutdown();
    DaemonResponse::success(id, json!({"shutting_down": true}))
}
