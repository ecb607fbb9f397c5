//! Daemon Core - admission, control surface and shutdown
//!
//! The daemon is the long-running process that:
//! - Reconciles jobs interrupted by a previous run
//! - Runs the scheduling engine on its own task
//! - Serves client requests until told to stop, then shuts down in order

pub mod context;
pub mod handlers;
pub mod recovery;
pub mod signals;

use std::sync::Arc;

use log::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::ipc::{IpcServer, IpcServerConfig};
use crate::scheduler::{Launcher, TickConfig};
use crate::store::{JobStore, SqliteJobStore};

pub use context::DaemonContext;
pub use handlers::DaemonHandler;
pub use recovery::{RecoveryAction, recover_interrupted};
pub use signals::install_shutdown_handler;

/// Serve requests until the context stops accepting, then shut down.
///
/// An accept failure is treated as a shutdown trigger.
pub async fn serve<S: JobStore + 'static>(ctx: Arc<DaemonContext<S>>, server: IpcServer) {
    let handler = Arc::new(DaemonHandler::new(Arc::clone(&ctx)));

    if let Err(e) = server.run(handler, ctx.stop_token()).await {
        error!("Control surface failed: {}", e);
        ctx.request_shutdown();
    }
    drop(server);

    ctx.shutdown().await;
}

/// Run the daemon described by `config` until it is shut down.
pub async fn run(config: &Config) -> Result<()> {
    let limits = config.limits()?;
    let store = Arc::new(SqliteJobStore::open(&config.daemon.db_path)?);
    recover_interrupted(&*store)?;

    let server = IpcServer::bind(IpcServerConfig::default().with_socket_path(&config.daemon.socket_path))?;
    let launcher = Launcher::new();
    info!(
        "sjq daemon listening on {} ({} slots, {} memory, privileged: {})",
        config.daemon.socket_path.display(),
        limits.max_procs,
        limits.max_mem,
        launcher.is_privileged()
    );

    let ctx = DaemonContext::start(
        store,
        limits,
        TickConfig::from(&config.scheduler),
        launcher,
        &config.daemon.socket_path,
    );
    install_shutdown_handler(ctx.stop_token())?;

    serve(ctx, server).await;
    Ok(())
}
