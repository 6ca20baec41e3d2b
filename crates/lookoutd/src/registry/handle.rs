//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to session events. Channel errors are
//! mapped to `ChannelClosed`.

use std::net::{IpAddr, SocketAddr};

use tokio::sync::{broadcast, mpsc, oneshot};

use lookout_core::{Frame, SessionId, SessionView};

use super::commands::{
    Admission, ManagerError, RegistryCommand, RegistryError, RemovalReason, SessionEvent,
    SlotStatus, StreamToggle,
};

/// Handle for interacting with the registry actor.
///
/// Shared by the accept loop, every connection task, the discovery
/// responder and the console dispatcher.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<SessionEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a request and waits for the actor's reply.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(make(tx)).await.ok()?;
        rx.await.ok()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Admits a new connection from `peer`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    /// - `RegistryError::ShuttingDown` once shutdown has begun
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn admit(&self, peer: SocketAddr) -> Result<Admission, RegistryError> {
        self.request(|respond_to| RegistryCommand::Admit { peer, respond_to })
            .await
            .ok_or(RegistryError::ChannelClosed)?
    }

    /// Records the handshake name for a session.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if the session was removed meanwhile
    /// - `RegistryError::Identity` if the name is blank or already set
    pub async fn complete_handshake(
        &self,
        session_id: SessionId,
        name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        self.request(|respond_to| RegistryCommand::CompleteHandshake {
            session_id,
            name,
            respond_to,
        })
        .await
        .ok_or(RegistryError::ChannelClosed)?
    }

    /// Records a heartbeat from `ip`. Returns the session it was credited to.
    pub async fn touch(&self, ip: IpAddr) -> Option<SessionId> {
        self.request(|respond_to| RegistryCommand::Touch { ip, respond_to })
            .await
            .flatten()
    }

    /// Hands a received frame to the actor for display.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn forward_frame(
        &self,
        session_id: SessionId,
        frame: Frame,
    ) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::ForwardFrame { session_id, frame })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Removes a session.
    ///
    /// # Errors
    ///
    /// - `RegistryError::SessionNotFound` if it was already removed
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove(
        &self,
        session_id: SessionId,
        reason: RemovalReason,
    ) -> Result<(), RegistryError> {
        self.request(|respond_to| RegistryCommand::Remove {
            session_id,
            reason,
            respond_to,
        })
        .await
        .ok_or(RegistryError::ChannelClosed)?
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    /// Selects a session and moves the streaming slot to it.
    pub async fn select(&self, session_id: SessionId) -> Result<(), ManagerError> {
        self.request(|respond_to| RegistryCommand::Select {
            session_id,
            respond_to,
        })
        .await
        .ok_or(ManagerError::ChannelClosed)?
    }

    /// Starts or stops streaming on the active session.
    pub async fn toggle_stream(&self) -> Result<StreamToggle, ManagerError> {
        self.request(|respond_to| RegistryCommand::ToggleStream { respond_to })
            .await
            .ok_or(ManagerError::ChannelClosed)?
    }

    /// Sends a notice to the active session.
    pub async fn send_notice(&self, text: impl Into<String>) -> Result<(), ManagerError> {
        let text = text.into();
        self.request(|respond_to| RegistryCommand::SendNotice { text, respond_to })
            .await
            .ok_or(ManagerError::ChannelClosed)?
    }

    /// Removes every session and stops admitting new ones.
    ///
    /// Returns the number of sessions removed, or 0 if the actor is gone.
    pub async fn shutdown(&self) -> usize {
        self.request(|respond_to| RegistryCommand::Shutdown { respond_to })
            .await
            .unwrap_or(0)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Get a single session by ID.
    ///
    /// Returns `None` if the session doesn't exist or if communication
    /// with the actor fails.
    pub async fn get_session(&self, session_id: SessionId) -> Option<SessionView> {
        self.request(|respond_to| RegistryCommand::GetSession {
            session_id,
            respond_to,
        })
        .await
        .flatten()
    }

    /// All sessions in admission order.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn get_all_sessions(&self) -> Vec<SessionView> {
        self.request(|respond_to| RegistryCommand::GetAllSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn slot_status(&self) -> SlotStatus {
        self.request(|respond_to| RegistryCommand::GetSlot { respond_to })
            .await
            .unwrap_or_default()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
