//! Job request handlers
//!
//! Handles job.* IPC methods by delegating to DaemonContext.

use serde_json::{Value, json};

use crate::daemon::context::DaemonContext;
use crate::daemon::handlers::parse_params;
use crate::domain::JobRequest;
use crate::ipc::messages::{DaemonError, DaemonResponse, JobIdParams, ListParams, SubmitResult};
use crate::store::JobStore;

fn respond<T: serde::Serialize>(id: u64, result: crate::error::Result<T>) -> DaemonResponse {
    match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => DaemonResponse::success(id, value),
        Err(e) => DaemonResponse::error(id, e.into()),
    }
}

/// Handle job.submit - admit a new job
pub fn handle_job_submit<S: JobStore>(id: u64, params: Value, ctx: &DaemonContext<S>) -> DaemonResponse {
    if ctx.is_stopping() {
        return DaemonResponse::error(id, DaemonError::shutting_down());
    }
    let request: JobRequest = match parse_params(params) {
        Ok(request) => request,
        Err(e) => return DaemonResponse::error(id, e),
    };
    respond(id, ctx.submit_job(request).map(|jobid| SubmitResult { jobid }))
}

/// Handle job.get - get a single job by ID
pub fn handle_job_get<S: JobStore>(id: u64, params: Value, ctx: &DaemonContext<S>) -> DaemonResponse {
    match parse_params::<JobIdParams>(params) {
        Ok(p) => respond(id, ctx.job(p.jobid)),
        Err(e) => DaemonResponse::error(id, e),
    }
}

/// Handle job.list - list jobs, optionally by state
pub fn handle_job_list<S: JobStore>(id: u64, params: Value, ctx: &DaemonContext<S>) -> DaemonResponse {
    match parse_params::<ListParams>(params) {
        Ok(p) => respond(id, ctx.jobs(p.state)),
        Err(e) => DaemonResponse::error(id, e),
    }
}

/// Handle job.release - release a held job
pub fn handle_job_release<S: JobStore>(id: u64, params: Value, ctx: &DaemonContext<S>) -> DaemonResponse {
    match parse_params::<JobIdParams>(params) {
        Ok(p) => match ctx.release_job(p.jobid) {
            Ok(released) => DaemonResponse::success(id, json!({"jobid": p.jobid, "released": released})),
            Err(e) => DaemonResponse::error(id, e.into()),
        },
        Err(e) => DaemonResponse::error(id, e),
    }
}
