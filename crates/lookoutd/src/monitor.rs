//! Wiring for a complete monitor.
//!
//! [`Monitor::start`] binds the data listener and the datagram responder on
//! the same port number, then spawns the display task, the registry, the
//! accept loop and the responder. The binary and the integration tests both
//! start monitors this way.

use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use lookout_core::LookoutConfig;

use crate::display::{spawn_display, DisplaySink};
use crate::registry::{spawn_registry, RegistryHandle};
use crate::responder::{DiscoveryResponder, ResponderError};
use crate::server::{MonitorServer, ServerError};

/// Attempts at finding a port free for both TCP and UDP when the configured
/// port is 0.
const EPHEMERAL_BIND_ATTEMPTS: usize = 8;

/// A running monitor.
pub struct Monitor {
    registry: RegistryHandle,
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Responder(#[from] ResponderError),
}

impl Monitor {
    /// Binds `ip:config.network.port` for both transports and starts every
    /// monitor task.
    ///
    /// Port 0 picks a free port; the same number is then used for the
    /// datagram socket.
    pub async fn start<S: DisplaySink>(
        config: &LookoutConfig,
        ip: IpAddr,
        sink: S,
        cancel_token: CancellationToken,
    ) -> Result<Self, MonitorError> {
        let (listener, socket) = bind_shared_port(ip, config.network.port).await?;
        let local_addr = listener.local_addr().map_err(ServerError::Io)?;

        // The display task lives as long as the registry actor.
        let (display, _display_task) = spawn_display(sink);
        let registry = spawn_registry(config.monitor.clone(), display);

        let server = MonitorServer::new(
            listener,
            registry.clone(),
            config.network.clone(),
            config.monitor.clone(),
            cancel_token.clone(),
        );
        let responder = DiscoveryResponder::new(socket, registry.clone(), cancel_token.clone());

        let server_task = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "Monitor server failed");
            }
        });
        let responder_task = tokio::spawn(async move {
            if let Err(e) = responder.run().await {
                error!(error = %e, "Discovery responder failed");
            }
        });

        info!(addr = %local_addr, "Monitor started");

        Ok(Self {
            registry,
            local_addr,
            cancel_token,
            tasks: vec![server_task, responder_task],
        })
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Address of the data listener; the responder uses the same port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Stops accepting, removes every session and waits for the listener
    /// tasks to finish.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        let removed = self.registry.shutdown().await;
        info!(sessions = removed, "Monitor shutting down");

        for task in self.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Monitor task ended abnormally");
            }
        }
    }
}

async fn bind_shared_port(ip: IpAddr, port: u16) -> Result<(TcpListener, UdpSocket), MonitorError> {
    let attempts = if port == 0 { EPHEMERAL_BIND_ATTEMPTS } else { 1 };
    let mut attempt = 0;

    loop {
        attempt += 1;
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let bound = listener.local_addr().map_err(ServerError::Io)?;

        match UdpSocket::bind(bound).await {
            Ok(socket) => return Ok((listener, socket)),
            Err(source) if attempt < attempts => {
                debug!(addr = %bound, error = %source, "Datagram port taken, retrying");
            }
            Err(source) => {
                return Err(ResponderError::Bind {
                    addr: bound,
                    source,
                }
                .into())
            }
        }
    }
}
