//! Main entry point for the Locksmith lock server.

use std::net::SocketAddr;
use std::sync::Arc;

use locksmith_core::LockTable;
use locksmith_server::{Configuration, LockServer, metrics, startup};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let logging_config = configuration.logging_config();
    let _logging_guard = startup::init_logging(&logging_config)?;

    metrics::init_metrics();
    if configuration.metrics_enabled() {
        let addr = SocketAddr::new(
            configuration.server_address().parse()?,
            configuration.metrics_port(),
        );
        metrics::install_prometheus_exporter(addr)?;
    }

    let server_config = configuration.server_config();
    let table = Arc::new(LockTable::new(server_config.lease_timeout));

    let shutdown = startup::wait_for_shutdown_signal();
    let reaper = table.start_reaper(shutdown.subscribe());

    let server = LockServer::bind(&server_config, table.clone()).await?;
    info!(
        address = %server.local_addr()?,
        lease_timeout_ms = server_config.lease_timeout.as_millis() as u64,
        max_frame_length = server_config.max_frame_length,
        "Locksmith server started"
    );

    let result = server.serve(shutdown.clone()).await;
    shutdown.shutdown();

    if let Err(e) = reaper.await {
        error!(error = %e, "Lease reaper task failed");
    }

    let stats = table.stats();
    info!(
        locks = stats.total_locks,
        grants = stats.total_grants,
        denials = stats.total_denials,
        expired = stats.expired_locks,
        "Locksmith server stopped"
    );

    result.map_err(Into::into)
}
