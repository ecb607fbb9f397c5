//! IPC Server - Unix socket server for client-daemon communication
//!
//! Provides:
//! - Unix stream socket listener
//! - One task per client connection
//! - Request routing and response sending

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SjqError};
use crate::ipc::messages::{DaemonError, DaemonRequest, DaemonResponse};

/// Configuration for the IPC server
#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            socket_path: crate::config::default_socket_path(),
        }
    }
}

impl IpcServerConfig {
    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }
}

/// Handler trait for processing requests
pub trait RequestHandler: Send + Sync {
    /// Handle a request and return a response
    fn handle(&self, request: DaemonRequest) -> impl std::future::Future<Output = DaemonResponse> + Send;
}

/// IPC Server for daemon communication
#[derive(Debug)]
pub struct IpcServer {
    config: IpcServerConfig,
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the listening socket.
    ///
    /// Fails if something already exists at the socket path: either another
    /// daemon is running or a previous one did not clean up.
    pub fn bind(config: IpcServerConfig) -> Result<Self> {
        if config.socket_path.exists() {
            return Err(SjqError::SocketExists(config.socket_path.display().to_string()));
        }

        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&config.socket_path)
            .map_err(|e| SjqError::Ipc(format!("Failed to bind socket {}: {}", config.socket_path.display(), e)))?;
        debug!("Listening on {}", config.socket_path.display());

        Ok(Self { config, listener })
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accept connections until `stop` is cancelled.
    ///
    /// Each client is served on its own task, with no cap on how many are
    /// connected at once. An accept error ends the loop
    /// and is returned to the caller. The socket file is left in place.
    pub async fn run<H: RequestHandler + 'static>(&self, handler: Arc<H>, stop: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    let (stream, _addr) = accept_result
                        .map_err(|e| SjqError::Ipc(format!("Accept failed: {}", e)))?;

                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            debug!("Client connection ended: {}", e);
                        }
                    });
                }
                _ = stop.cancelled() => {
                    debug!("IPC server stopped accepting");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle a single client connection
async fn handle_client<H: RequestHandler>(stream: UnixStream, handler: Arc<H>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            // EOF - client disconnected
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Err(e) => DaemonResponse::error(0, DaemonError::parse_error(format!("Parse error: {}", e))),
            Ok(value) => {
                // Echo the id back when there is one, even if the rest is malformed
                let id = value.get("id").and_then(|id| id.as_u64()).unwrap_or(0);
                match serde_json::from_value::<DaemonRequest>(value) {
                    Ok(request) => handler.handle(request).await,
                    Err(e) => DaemonResponse::error(id, DaemonError::invalid_request(format!("Invalid request: {}", e))),
                }
            }
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }
}
