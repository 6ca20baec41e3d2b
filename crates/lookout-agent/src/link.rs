//! Agent end of the data connection.
//!
//! After connecting, the link sends its display name as the first framed
//! message and then runs two loops side by side:
//! - the control loop reads raw commands and flips the streaming flag or
//!   hands notices to the [`NoticeSink`]
//! - the capture loop sends one frame per tick while the flag is set
//!
//! Either loop failing ends the link; the caller decides what happens next.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use lookout_core::LookoutConfig;
use lookout_protocol::{ControlBatch, ControlCommand, FrameCodec, FramerError};

use crate::capture::FrameCapture;
use crate::notice::NoticeSink;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),

    #[error("framing error: {0}")]
    Framer(#[from] FramerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("monitor closed the connection")]
    ConnectionClosed,
}

/// Everything one data connection needs, reusable across reconnects.
pub struct AgentLink {
    name: String,
    capture: Arc<dyn FrameCapture>,
    notices: Arc<dyn NoticeSink>,
    codec: FrameCodec,
    connect_timeout: Duration,
    capture_interval: Duration,
    control_buffer_len: usize,
}

impl AgentLink {
    pub fn new(
        config: &LookoutConfig,
        name: impl Into<String>,
        capture: Arc<dyn FrameCapture>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            name: name.into(),
            capture,
            notices,
            codec: FrameCodec::from_config(&config.network),
            connect_timeout: config.network.receive_timeout(),
            capture_interval: config.agent.capture_interval(),
            control_buffer_len: config.agent.control_buffer_len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connects to `monitor`, hands over the name and runs until the
    /// connection fails. Always starts with streaming off.
    pub async fn run(&self, monitor: SocketAddr) -> Result<(), LinkError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(monitor))
            .await
            .map_err(|_| LinkError::ConnectTimeout(monitor))?
            .map_err(|source| LinkError::Connect {
                addr: monitor,
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let mut frames = FramedWrite::new(writer, self.codec.clone());
        frames.send(self.name.as_bytes()).await?;
        info!(monitor = %monitor, name = %self.name, "Connected to monitor");

        let streaming = AtomicBool::new(false);

        tokio::select! {
            result = self.control_loop(reader, &streaming) => result,
            result = self.capture_loop(frames, &streaming) => result,
        }
    }

    async fn control_loop<R>(&self, mut reader: R, streaming: &AtomicBool) -> Result<(), LinkError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.control_buffer_len];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(LinkError::ConnectionClosed);
            }

            let batch = ControlBatch::parse(buf.get(..n).unwrap_or_default());
            for command in batch.commands {
                match command {
                    ControlCommand::Start => {
                        info!("Streaming started");
                        streaming.store(true, Ordering::Relaxed);
                    }
                    ControlCommand::Stop => {
                        info!("Streaming stopped");
                        streaming.store(false, Ordering::Relaxed);
                    }
                    ControlCommand::Notice(text) => self.notices.notice(&text),
                }
            }
            if let Some(rest) = batch.unrecognized {
                warn!(data = %rest, "Unrecognized control data");
            }
        }
    }

    async fn capture_loop<W>(
        &self,
        mut frames: FramedWrite<W, FrameCodec>,
        streaming: &AtomicBool,
    ) -> Result<(), LinkError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut ticker = interval(self.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !streaming.load(Ordering::Relaxed) {
                continue;
            }

            match self.capture.capture().await {
                Ok(frame) if frame.is_empty() => debug!("Empty capture, skipping"),
                Ok(frame) => {
                    let len = frame.len();
                    frames.send(frame).await?;
                    debug!(len, "Frame sent");
                }
                Err(e) => debug!(error = %e, "Capture failed, skipping tick"),
            }
        }
    }
}
