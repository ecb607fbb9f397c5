//! Request handlers for the daemon
//!
//! Each submodule handles a category of IPC methods:
//! - jobs: job lifecycle (submit, get, list, release)
//! - control: daemon status, shutdown and ping

pub mod control;
pub mod jobs;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::daemon::context::DaemonContext;
use crate::ipc::messages::{DaemonError, DaemonRequest, DaemonResponse, Methods};
use crate::ipc::server::RequestHandler;
use crate::store::JobStore;

pub use control::*;
pub use jobs::*;

/// Routes requests to the handler for their method
pub struct DaemonHandler<S: JobStore> {
    ctx: Arc<DaemonContext<S>>,
}

impl<S: JobStore> DaemonHandler<S> {
    pub fn new(ctx: Arc<DaemonContext<S>>) -> Self {
        Self { ctx }
    }

    /// Handle one request synchronously
    pub fn dispatch(&self, request: DaemonRequest) -> DaemonResponse {
        let DaemonRequest { id, method, params } = request;
        let ctx = self.ctx.as_ref();

        match method.as_str() {
            Methods::PING => handle_ping(id),
            Methods::JOB_SUBMIT => handle_job_submit(id, params, ctx),
            Methods::JOB_GET => handle_job_get(id, params, ctx),
            Methods::JOB_LIST => handle_job_list(id, params, ctx),
            Methods::JOB_RELEASE => handle_job_release(id, params, ctx),
            Methods::DAEMON_STATUS => handle_daemon_status(id, ctx),
            Methods::DAEMON_SHUTDOWN => handle_daemon_shutdown(id, ctx),
            other => DaemonResponse::error(id, DaemonError::method_not_found(other)),
        }
    }
}

impl<S: JobStore> RequestHandler for DaemonHandler<S> {
    fn handle(&self, request: DaemonRequest) -> impl std::future::Future<Output = DaemonResponse> + Send {
        let response = self.dispatch(request);
        async move { response }
    }
}

/// Decode method params; a missing params value reads as an empty object.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, DaemonError> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| DaemonError::invalid_params(e.to_string()))
}
