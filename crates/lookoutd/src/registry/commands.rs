//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError` / `ManagerError`: Errors returned by registry and operator operations
//! - `SessionEvent`: Events published by the registry for subscribers

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use lookout_core::{DomainError, Frame, SessionId, SessionView};
use lookout_protocol::ControlCommand;

use crate::liveness::LivenessClock;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request-style commands carry a oneshot `respond_to` channel. `Touch` and
/// `ForwardFrame` are fire-and-forget on the hot paths.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Admit a freshly accepted connection.
    ///
    /// Capacity check and insert happen in one step inside the actor.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at capacity
    /// - `RegistryError::ShuttingDown` after `Shutdown`
    Admit {
        peer: SocketAddr,
        respond_to: oneshot::Sender<Result<Admission, RegistryError>>,
    },

    /// Store the handshake name and move the session to `Idle`.
    CompleteHandshake {
        session_id: SessionId,
        name: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// A heartbeat arrived from `ip`. Resets the newest matching session.
    Touch {
        ip: IpAddr,
        respond_to: oneshot::Sender<Option<SessionId>>,
    },

    /// A frame was read from `session_id`. Shown only if that session holds
    /// the streaming slot at the time the actor sees it.
    ForwardFrame { session_id: SessionId, frame: Frame },

    /// Tear down a session.
    ///
    /// # Errors
    /// - `RegistryError::SessionNotFound` if it is already gone
    Remove {
        session_id: SessionId,
        reason: RemovalReason,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Operator: make `session_id` active and give it the streaming slot.
    Select {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), ManagerError>>,
    },

    /// Operator: start or stop streaming on the active session.
    ToggleStream {
        respond_to: oneshot::Sender<Result<StreamToggle, ManagerError>>,
    },

    /// Operator: push a notice to the active session.
    SendNotice {
        text: String,
        respond_to: oneshot::Sender<Result<(), ManagerError>>,
    },

    /// Remove every session and refuse further admissions.
    /// Responds with the number of sessions removed.
    Shutdown { respond_to: oneshot::Sender<usize> },

    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// All sessions in admission order.
    GetAllSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Current active selection and slot holder.
    GetSlot {
        respond_to: oneshot::Sender<SlotStatus>,
    },
}

/// What a connection task gets back when its connection is admitted.
#[derive(Debug)]
pub struct Admission {
    pub session_id: SessionId,
    /// Commands the actor wants written to the agent. Closes on removal.
    pub control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    /// Cancelled by the actor when the session is removed.
    pub cancel: CancellationToken,
    /// Reset by the discovery responder on every matching heartbeat.
    pub clock: Arc<LivenessClock>,
}

/// Result of a stream toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamToggle {
    Started(SessionId),
    Stopped(SessionId),
}

/// Snapshot of the operator selection and the streaming slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStatus {
    pub active: Option<SessionId>,
    pub streaming: Option<SessionId>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum session capacity.
    #[error("registry is full (max: {max} sessions)")]
    RegistryFull { max: usize },

    /// The requested session was not found.
    #[error("session not found: #{0}")]
    SessionNotFound(SessionId),

    /// Admissions are refused once shutdown has started.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// The handshake name was rejected.
    #[error("invalid handshake: {0}")]
    Identity(#[from] DomainError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

/// Errors from operator-facing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("no session #{0}")]
    NotFound(SessionId),

    #[error("session #{0} has not finished its handshake")]
    NotReady(SessionId),

    #[error("no active session selected")]
    NoActiveSession,

    #[error("notice is empty")]
    EmptyNotice,

    #[error("notice is too long ({len} characters, must be under {max})")]
    NoticeTooLong { len: usize, max: usize },

    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A connection was admitted.
    Registered {
        session_id: SessionId,
        address: SocketAddr,
    },

    /// Name or streaming state changed.
    ///
    /// The session view is boxed to reduce enum size variance.
    Updated { session: Box<SessionView> },

    /// A session was removed from the registry.
    Removed {
        session_id: SessionId,
        reason: RemovalReason,
    },
}

/// Reason why a session was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// No heartbeat within the eviction threshold.
    HeartbeatTimeout,

    /// Read or write on the data connection failed.
    TransportError,

    /// The agent closed the data connection.
    Closed,

    /// The monitor is shutting down.
    Shutdown,

    /// Removed on request.
    Explicit,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::TransportError => write!(f, "transport error"),
            Self::Closed => write!(f, "connection closed by agent"),
            Self::Shutdown => write!(f, "monitor shutdown"),
            Self::Explicit => write!(f, "explicitly removed"),
        }
    }
}
