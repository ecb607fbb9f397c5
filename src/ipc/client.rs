//! IPC client for talking to the daemon.
//!
//! One connection, one request in flight at a time: write a line, read a line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::config::default_socket_path;
use crate::domain::{JobId, JobRecord, JobRequest, JobState};
use crate::error::{Result, SjqError};
use crate::ipc::messages::{DaemonRequest, DaemonResponse, JobIdParams, ListParams, Methods, SubmitResult};
use crate::scheduler::LedgerSnapshot;

/// Configuration for IPC client.
#[derive(Debug, Clone)]
pub struct IpcClientConfig {
    /// Path to daemon Unix socket.
    pub socket_path: PathBuf,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for IpcClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout_ms: 30000,
        }
    }
}

impl IpcClientConfig {
    /// Create config with custom socket path.
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            ..Default::default()
        }
    }
}

/// IPC client for communicating with daemon.
#[derive(Debug)]
pub struct IpcClient {
    config: IpcClientConfig,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl IpcClient {
    /// Connect to the daemon.
    pub async fn connect(config: IpcClientConfig) -> Result<Self> {
        let stream = UnixStream::connect(&config.socket_path).await.map_err(|e| {
            SjqError::Ipc(format!("Failed to connect to {}: {}", config.socket_path.display(), e))
        })?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            config,
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
        })
    }

    /// Connect to the daemon at the given socket path.
    pub async fn connect_to(path: impl Into<PathBuf>) -> Result<Self> {
        Self::connect(IpcClientConfig::with_socket(path)).await
    }

    /// Get socket path.
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<DaemonResponse> {
        let id = self.next_id;
        self.next_id += 1;

        let mut json = serde_json::to_string(&DaemonRequest::new(id, method, params))?;
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| SjqError::Ipc(format!("Failed to write: {}", e)))?;

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let mut line = String::new();
        let read = tokio::time::timeout(timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| SjqError::Ipc(format!("Request {} timed out", method)))?
            .map_err(|e| SjqError::Ipc(format!("Failed to read: {}", e)))?;
        if read == 0 {
            return Err(SjqError::Ipc("Daemon closed the connection".to_string()));
        }

        let response: DaemonResponse = serde_json::from_str(line.trim())?;
        if response.id != id {
            return Err(SjqError::Ipc(format!("Response id {} does not match request {}", response.id, id)));
        }
        Ok(response)
    }

    /// Send a request and decode its result, turning daemon errors into `SjqError::Ipc`.
    pub async fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T> {
        let response = self.request(method, params).await?;
        if let Some(err) = response.error {
            return Err(SjqError::Ipc(err.message));
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.call::<Value>(Methods::PING, Value::Null).await.map(|_| ())
    }

    /// Submit a job; `None` means the daemon can never run it with its configured limits.
    pub async fn submit(&mut self, request: &JobRequest) -> Result<Option<JobId>> {
        let result: SubmitResult = self.call(Methods::JOB_SUBMIT, serde_json::to_value(request)?).await?;
        Ok(result.jobid)
    }

    pub async fn get(&mut self, jobid: JobId) -> Result<JobRecord> {
        self.call(Methods::JOB_GET, serde_json::to_value(JobIdParams { jobid })?).await
    }

    pub async fn list(&mut self, state: Option<JobState>) -> Result<Vec<JobRecord>> {
        self.call(Methods::JOB_LIST, serde_json::to_value(ListParams { state })?).await
    }

    pub async fn release(&mut self, jobid: JobId) -> Result<bool> {
        let result: Value = self.call(Methods::JOB_RELEASE, serde_json::to_value(JobIdParams { jobid })?).await?;
        Ok(result["released"].as_bool().unwrap_or(false))
    }

    pub async fn status(&mut self) -> Result<LedgerSnapshot> {
        self.call(Methods::DAEMON_STATUS, Value::Null).await
    }

    /// Ask the daemon to stop accepting requests and shut down.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.call::<Value>(Methods::DAEMON_SHUTDOWN, Value::Null).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::messages::DaemonError;
    use crate::ipc::server::{IpcServer, IpcServerConfig, RequestHandler};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    struct FixedHandler;

    impl RequestHandler for FixedHandler {
        fn handle(&self, request: DaemonRequest) -> impl std::future::Future<Output = DaemonResponse> + Send {
            async move {
                match request.method.as_str() {
                    Methods::PING => DaemonResponse::success(request.id, serde_json::json!({"pong": true})),
                    Methods::JOB_SUBMIT => DaemonResponse::success(request.id, serde_json::json!({"jobid": 7})),
                    Methods::JOB_GET => DaemonResponse::error(request.id, DaemonError::job_not_found(3)),
                    other => DaemonResponse::error(request.id, DaemonError::method_not_found(other)),
                }
            }
        }
    }

    #[test]
    fn test_client_config_with_socket() {
        let config = IpcClientConfig::with_socket("/tmp/x.sock");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.request_timeout_ms, 30000);
    }

    #[tokio::test]
    async fn test_connect_fails_without_daemon() {
        let dir = tempdir().unwrap();
        let result = IpcClient::connect_to(dir.path().join("missing.sock")).await;
        assert!(matches!(result, Err(SjqError::Ipc(_))));
    }

    #[tokio::test]
    async fn test_client_calls() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("sjq.sock");
        let server = IpcServer::bind(IpcServerConfig::default().with_socket_path(&socket_path)).unwrap();
        let stop = CancellationToken::new();
        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { server.run(Arc::new(FixedHandler), stop).await })
        };

        let mut client = IpcClient::connect_to(&socket_path).await.unwrap();
        assert_eq!(client.socket_path(), socket_path);
        client.ping().await.unwrap();
        assert_eq!(client.submit(&JobRequest::new("#!/bin/sh\n")).await.unwrap(), Some(7));

        let err = client.get(3).await.unwrap_err();
        assert!(err.to_string().contains("Job not found: 3"));

        // Ids keep advancing on the same connection
        let response = client.request("bogus", Value::Null).await.unwrap();
        assert_eq!(response.id, 4);
        assert!(!response.is_success());

        stop.cancel();
        task.await.unwrap().unwrap();
    }
}
