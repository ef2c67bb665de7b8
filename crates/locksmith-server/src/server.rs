//! TCP listener for the lock protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use locksmith_core::LockTable;
use metrics::{counter, gauge};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::handler::RequestHandler;
use crate::startup::ShutdownSignal;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts client connections and serves each on its own task.
pub struct LockServer {
    listener: TcpListener,
    handler: RequestHandler,
    max_frame_length: usize,
}

impl LockServer {
    /// Bind the listening socket described by `config`.
    pub async fn bind(config: &ServerConfig, table: Arc<LockTable>) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.address, config.port);
        let listener = TcpListener::bind((config.address.as_str(), config.port))
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;

        info!(
            address = %listener.local_addr()?,
            lease_timeout = ?table.lease_timeout(),
            "Lock server listening"
        );

        Ok(Self {
            listener,
            handler: RequestHandler::new(table),
            max_frame_length: config.max_frame_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Accept connections until `shutdown` fires.
    ///
    /// Open connections are told to close through the same signal.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let mut shutdown_rx = shutdown.subscribe();
        if shutdown.is_shutdown() {
            return Ok(());
        }

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                            }
                            counter!("locksmith_connections_total").increment(1);
                            gauge!("locksmith_connections_active").increment(1.0);

                            let handler = self.handler.clone();
                            let connection_shutdown = shutdown.subscribe();
                            let max_frame_length = self.max_frame_length;
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(
                                    stream,
                                    peer_addr,
                                    handler,
                                    max_frame_length,
                                    connection_shutdown,
                                )
                                .await
                                {
                                    error!(peer = %peer_addr, error = %e, "Error handling connection");
                                }
                                gauge!("locksmith_connections_active").decrement(1.0);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Lock server shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }
}
