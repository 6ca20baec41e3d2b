//! TCP server accepting agent data connections.
//!
//! The server:
//! - Accepts connections on the shared port
//! - Asks the registry to admit each one (capacity-checked, atomically)
//! - Spawns an `AgentSession` per admitted connection
//! - Drops refused connections immediately, before any handshake
//! - Stops accepting when its `CancellationToken` fires
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  admit()  ┌─────────────────┐
//! │  MonitorServer  │──────────▶│  RegistryHandle │
//! │  TcpListener    │           └────────▲────────┘
//! └───────┬─────────┘                    │ frames / removal
//!         │ spawn                        │
//!         ▼                              │
//! ┌─────────────────┐                    │
//! │  AgentSession   │────────────────────┘
//! │  (per agent)    │
//! └─────────────────┘
//! ```

mod session;

pub use session::{AgentSession, SessionError};

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lookout_core::{MonitorConfig, NetworkConfig};

use crate::registry::{RegistryError, RegistryHandle};

/// Accept loop for agent data connections.
pub struct MonitorServer {
    listener: TcpListener,
    registry: RegistryHandle,
    network: NetworkConfig,
    monitor: MonitorConfig,
    cancel_token: CancellationToken,
}

impl MonitorServer {
    /// Creates a server around an already bound listener.
    pub fn new(
        listener: TcpListener,
        registry: RegistryHandle,
        network: NetworkConfig,
        monitor: MonitorConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            registry,
            network,
            monitor,
            cancel_token,
        }
    }

    /// Binds a listener on `addr`.
    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        network: NetworkConfig,
        monitor: MonitorConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self::new(listener, registry, network, monitor, cancel_token))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Io)
    }

    /// Runs the accept loop until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Monitor server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer).await,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Admits the connection or drops it.
    async fn handle_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let admission = match self.registry.admit(peer).await {
            Ok(admission) => admission,
            Err(RegistryError::RegistryFull { max }) => {
                warn!(peer = %peer, max, "Refusing connection: registry full");
                return;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "Refusing connection");
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let session = AgentSession::new(
            stream,
            peer,
            admission,
            self.registry.clone(),
            &self.network,
            self.monitor.clone(),
        );
        tokio::spawn(session.run());
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
