//! Monitor discovery and heartbeats.
//!
//! One datagram socket does both jobs:
//! - `discover` sends `LH_DISCOVER_REQUEST` to every target and waits for a
//!   `LH_DISCOVER_RESPONSE`, retrying until one arrives or it is cancelled
//! - `heartbeat` pings the discovered monitor with `LH_CHECK_CONNECTION`
//!   and returns once a `LH_CONNECTED` fails to come back in time

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lookout_core::LookoutConfig;
use lookout_protocol::token::MAX_DATAGRAM_LEN;
use lookout_protocol::DiscoveryToken;

use crate::interfaces::discovery_targets;

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("Failed to bind discovery socket {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("monitor {monitor} stopped answering heartbeats")]
    MonitorLost { monitor: SocketAddr },

    #[error("discovery cancelled")]
    Cancelled,
}

/// A monitor that answered discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// Responder address. The data listener shares its port.
    pub monitor: SocketAddr,
    pub responded_at: Instant,
}

pub struct DiscoveryBeacon {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    receive_timeout: Duration,
    ping_interval: Duration,
}

impl DiscoveryBeacon {
    /// Binds an ephemeral broadcast-capable socket.
    pub async fn bind(config: &LookoutConfig) -> Result<Self, BeaconError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], 0));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| BeaconError::Bind { addr, source })?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            targets: discovery_targets(config),
            receive_timeout: config.network.receive_timeout(),
            ping_interval: config.agent.ping_interval(),
        })
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    /// Broadcasts discovery requests until a monitor answers.
    ///
    /// Each round waits up to the receive timeout; silence starts another
    /// round. Only cancellation or a socket failure ends the loop early.
    pub async fn discover(
        &self,
        cancel_token: &CancellationToken,
    ) -> Result<DiscoveryRecord, BeaconError> {
        let mut round: u64 = 0;

        loop {
            if cancel_token.is_cancelled() {
                return Err(BeaconError::Cancelled);
            }
            round += 1;

            for target in &self.targets {
                let request = DiscoveryToken::DiscoverRequest.as_bytes();
                if let Err(e) = self.socket.send_to(request, *target).await {
                    warn!(target = %target, error = %e, "Failed to send discovery request");
                }
            }
            debug!(round, targets = self.targets.len(), "Discovery requests sent");

            let answer = tokio::select! {
                _ = cancel_token.cancelled() => return Err(BeaconError::Cancelled),
                answer = self.await_token(DiscoveryToken::DiscoverResponse, None) => answer?,
            };

            if let Some(monitor) = answer {
                info!(monitor = %monitor, round, "Discovered monitor");
                return Ok(DiscoveryRecord {
                    monitor,
                    responded_at: Instant::now(),
                });
            }
            debug!(round, "No monitor answered, retrying");
        }
    }

    /// Pings `monitor` every ping interval until a reply is missed.
    ///
    /// Never returns while the monitor keeps answering.
    pub async fn heartbeat(&self, monitor: SocketAddr) -> BeaconError {
        loop {
            let ping = DiscoveryToken::CheckConnection.as_bytes();
            if let Err(e) = self.socket.send_to(ping, monitor).await {
                return e.into();
            }

            match self
                .await_token(DiscoveryToken::Connected, Some(monitor))
                .await
            {
                Ok(Some(_)) => trace!(monitor = %monitor, "Heartbeat answered"),
                Ok(None) => return BeaconError::MonitorLost { monitor },
                Err(e) => return e,
            }

            sleep(self.ping_interval).await;
        }
    }

    /// Waits up to the receive timeout for `expected`, optionally only from
    /// `from`. Other datagrams are skipped without extending the deadline.
    async fn await_token(
        &self,
        expected: DiscoveryToken,
        from: Option<SocketAddr>,
    ) -> Result<Option<SocketAddr>, BeaconError> {
        let deadline = Instant::now() + self.receive_timeout;
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let (len, sender) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(result) => result?,
            };

            let token = buf.get(..len).and_then(DiscoveryToken::parse);
            let wanted_sender = from.map_or(true, |addr| addr.ip() == sender.ip());
            if token == Some(expected) && wanted_sender {
                return Ok(Some(sender));
            }
            debug!(from = %sender, ?token, expected = %expected, "Ignoring datagram");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(target: SocketAddr, receive_timeout_ms: u64) -> LookoutConfig {
        let mut config = LookoutConfig::default();
        config.agent.discovery_targets = vec![target];
        config.agent.ping_interval_ms = 20;
        config.network.receive_timeout_ms = receive_timeout_ms;
        config
    }

    /// Answers every token with its reply, like a monitor with no sessions.
    async fn fake_monitor() -> (SocketAddr, CancellationToken) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let (len, from) = tokio::select! {
                    _ = stop.cancelled() => break,
                    r = socket.recv_from(&mut buf) => r.unwrap(),
                };
                if let Some(reply) = DiscoveryToken::parse(&buf[..len]).and_then(|t| t.reply()) {
                    socket.send_to(reply.as_bytes(), from).await.unwrap();
                }
            }
        });
        (addr, cancel)
    }

    #[tokio::test]
    async fn test_discover_finds_monitor() {
        let (monitor, stop) = fake_monitor().await;
        let beacon = DiscoveryBeacon::bind(&config_for(monitor, 1_000)).await.unwrap();

        let record = beacon.discover(&CancellationToken::new()).await.unwrap();
        assert_eq!(record.monitor, monitor);
        stop.cancel();
    }

    #[tokio::test]
    async fn test_discover_retries_until_monitor_appears() {
        // Reserve a port, then leave it silent for the first rounds.
        let placeholder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = placeholder.local_addr().unwrap();
        let beacon = DiscoveryBeacon::bind(&config_for(addr, 100)).await.unwrap();

        let responder = tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            let mut buf = [0u8; 256];
            loop {
                let (len, from) = placeholder.recv_from(&mut buf).await.unwrap();
                if DiscoveryToken::parse(&buf[..len]) == Some(DiscoveryToken::DiscoverRequest) {
                    placeholder
                        .send_to(DiscoveryToken::DiscoverResponse.as_bytes(), from)
                        .await
                        .unwrap();
                    break;
                }
            }
        });

        let record = beacon.discover(&CancellationToken::new()).await.unwrap();
        assert_eq!(record.monitor, addr);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_stops_when_cancelled() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let beacon = DiscoveryBeacon::bind(&config_for(silent.local_addr().unwrap(), 50))
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            canceller.cancel();
        });

        assert!(matches!(
            beacon.discover(&cancel).await,
            Err(BeaconError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_reports_lost_monitor() {
        let (monitor, stop) = fake_monitor().await;
        let beacon = DiscoveryBeacon::bind(&config_for(monitor, 100)).await.unwrap();

        let lost = tokio::spawn(async move { beacon.heartbeat(monitor).await });
        sleep(Duration::from_millis(150)).await;
        assert!(!lost.is_finished());

        stop.cancel();
        let err = tokio::time::timeout(Duration::from_secs(2), lost)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, BeaconError::MonitorLost { monitor: m } if m == monitor));
    }
}
