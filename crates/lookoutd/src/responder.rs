//! Discovery and heartbeat responder.
//!
//! One long-lived task on the shared port answers:
//! - `LH_DISCOVER_REQUEST` with `LH_DISCOVER_RESPONSE`
//! - `LH_CHECK_CONNECTION` with `LH_CONNECTED`, after crediting the heartbeat
//!   to the newest session from the sender's address
//!
//! Anything else is logged and dropped. A heartbeat from an address with no
//! session still gets its reply.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lookout_protocol::token::MAX_DATAGRAM_LEN;
use lookout_protocol::{trim_padding, DiscoveryToken};

use crate::registry::RegistryHandle;

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Datagram responder for discovery and heartbeats.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
}

impl DiscoveryResponder {
    pub fn new(socket: UdpSocket, registry: RegistryHandle, cancel_token: CancellationToken) -> Self {
        Self {
            socket,
            registry,
            cancel_token,
        }
    }

    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ResponderError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ResponderError::Bind { addr, source })?;
        Ok(Self::new(socket, registry, cancel_token))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ResponderError> {
        Ok(self.socket.local_addr()?)
    }

    /// Answers datagrams until cancelled.
    pub async fn run(&self) -> Result<(), ResponderError> {
        info!(addr = %self.local_addr()?, "Discovery responder listening");
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Discovery responder shutting down");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, from)) => {
                            let datagram = buf.get(..len).unwrap_or_default();
                            self.handle_datagram(datagram, from).await;
                        }
                        Err(e) => {
                            // Transient (e.g. ICMP-induced) errors must not kill the responder.
                            warn!(error = %e, "Datagram receive failed");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let Some(token) = DiscoveryToken::parse(datagram) else {
            let text = String::from_utf8_lossy(trim_padding(datagram));
            warn!(
                from = %from,
                len = datagram.len(),
                data = %text,
                "Ignoring unrecognized datagram"
            );
            return;
        };

        match token {
            DiscoveryToken::DiscoverRequest => {
                debug!(from = %from, "Discovery request");
            }
            DiscoveryToken::CheckConnection => match self.registry.touch(from.ip()).await {
                Some(session_id) => trace!(from = %from, session_id = %session_id, "Heartbeat"),
                None => debug!(from = %from, "Heartbeat from address with no session"),
            },
            DiscoveryToken::DiscoverResponse | DiscoveryToken::Connected => {
                debug!(from = %from, token = %token, "Ignoring reply token");
            }
        }

        if let Some(reply) = token.reply() {
            if let Err(e) = self.socket.send_to(reply.as_bytes(), from).await {
                warn!(to = %from, error = %e, "Failed to send reply");
            }
        }
    }
}
