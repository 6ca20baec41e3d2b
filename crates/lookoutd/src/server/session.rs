//! Per-connection agent session.
//!
//! Each admitted connection gets one `AgentSession` task that:
//! - Reads framed messages: the handshake name first, then frames
//! - Writes control commands queued by the registry
//! - Runs the liveness watchdog
//!
//! Whichever of these finishes first ends the session. The registry's
//! cancellation token ends it from the outside. Either way the task then
//! makes sure the registry entry is gone.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lookout_core::{Frame, MonitorConfig, NetworkConfig, SessionId};
use lookout_protocol::{trim_padding, ControlCommand, FrameCodec, FramedMessage, FramerError};

use crate::liveness::{saturating_millis, watchdog, LivenessClock};
use crate::registry::{Admission, RegistryError, RegistryHandle, RemovalReason};

/// Errors that end a session's read or write loop.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Framer(#[from] FramerError),

    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// The registry removed us; nothing left to do.
    Cancelled,
    /// The session ended itself and must be removed.
    Ended(RemovalReason),
}

/// Monitor side of one agent connection.
pub struct AgentSession {
    session_id: SessionId,
    peer: SocketAddr,
    stream: TcpStream,
    control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    cancel: CancellationToken,
    clock: Arc<LivenessClock>,
    registry: RegistryHandle,
    codec: FrameCodec,
    monitor: MonitorConfig,
}

impl AgentSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        admission: Admission,
        registry: RegistryHandle,
        network: &NetworkConfig,
        monitor: MonitorConfig,
    ) -> Self {
        let Admission {
            session_id,
            control_rx,
            cancel,
            clock,
        } = admission;

        Self {
            session_id,
            peer,
            stream,
            control_rx,
            cancel,
            clock,
            registry,
            codec: FrameCodec::from_config(network),
            monitor,
        }
    }

    /// Runs the session until it ends, then makes sure it is deregistered.
    pub async fn run(self) {
        let Self {
            session_id,
            peer,
            stream,
            control_rx,
            cancel,
            clock,
            registry,
            codec,
            monitor,
        } = self;

        debug!(session_id = %session_id, peer = %peer, "Session task started");

        let (reader, writer) = stream.into_split();
        let frames = FramedRead::new(reader, codec);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Outcome::Cancelled,

            result = receive_loop(session_id, frames, &registry) => match result {
                Ok(()) => {
                    info!(session_id = %session_id, "Agent closed the connection");
                    Outcome::Ended(RemovalReason::Closed)
                }
                Err(SessionError::Registry(RegistryError::SessionNotFound(_))) => Outcome::Cancelled,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Receive failed");
                    Outcome::Ended(RemovalReason::TransportError)
                }
            },

            result = control_loop(session_id, writer, control_rx) => match result {
                // Queue closed: the registry dropped our entry.
                Ok(()) => Outcome::Cancelled,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Control write failed");
                    Outcome::Ended(RemovalReason::TransportError)
                }
            },

            silence = watchdog(&clock, &monitor) => {
                info!(
                    session_id = %session_id,
                    silent_ms = saturating_millis(silence),
                    "No heartbeat, evicting"
                );
                Outcome::Ended(RemovalReason::HeartbeatTimeout)
            }
        };

        if let Outcome::Ended(reason) = outcome {
            match registry.remove(session_id, reason).await {
                Ok(()) | Err(RegistryError::SessionNotFound(_)) => {}
                Err(e) => debug!(session_id = %session_id, error = %e, "Could not deregister"),
            }
        }

        // Both socket halves drop here, closing the connection.
        debug!(session_id = %session_id, ?outcome, "Session task finished");
    }
}

/// Reads the handshake name, then forwards frames until EOF.
///
/// Unparsable headers are skipped. A clean EOF at a frame boundary returns
/// `Ok`; everything else that ends the stream is an error.
async fn receive_loop<R>(
    session_id: SessionId,
    mut frames: FramedRead<R, FrameCodec>,
    registry: &RegistryHandle,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    // Handshake: the first non-empty message is the agent's name.
    loop {
        let Some(message) = frames.next().await else {
            return Ok(());
        };
        match message? {
            FramedMessage::Unparsable { header } => {
                warn!(session_id = %session_id, header = %header, "Unparsable header during handshake");
            }
            FramedMessage::Payload(bytes) => {
                let name = String::from_utf8_lossy(trim_padding(&bytes)).into_owned();
                if name.trim().is_empty() {
                    debug!(session_id = %session_id, "Empty handshake message, waiting for a name");
                    continue;
                }
                registry.complete_handshake(session_id, name).await?;
                break;
            }
        }
    }

    while let Some(message) = frames.next().await {
        match message? {
            FramedMessage::Unparsable { header } => {
                warn!(session_id = %session_id, header = %header, "Unparsable frame header, skipping");
            }
            FramedMessage::Payload(bytes) if bytes.is_empty() => {
                debug!(session_id = %session_id, "Empty frame, skipping");
            }
            FramedMessage::Payload(bytes) => {
                registry
                    .forward_frame(session_id, Frame::from(bytes))
                    .await?;
            }
        }
    }

    Ok(())
}

/// Writes each queued control command as one raw write.
///
/// Returns `Ok` once the queue closes.
async fn control_loop(
    session_id: SessionId,
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
) -> Result<(), SessionError> {
    while let Some(cmd) = commands.recv().await {
        writer.write_all(&cmd.encode()).await?;
        debug!(session_id = %session_id, command = cmd.kind(), "Sent control command");
    }
    Ok(())
}
