//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of the session collection, the
//! streaming slot, and the operator's active selection. Every command runs to
//! completion before the next one starts, so admission, removal and slot
//! transfer are atomic with respect to each other.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lookout_core::{AgentIdentity, Frame, MonitorConfig, SessionId, SessionState, SessionView};
use lookout_protocol::ControlCommand;

use super::commands::{
    Admission, ManagerError, RegistryCommand, RegistryError, RemovalReason, SessionEvent,
    SlotStatus, StreamToggle,
};
use crate::display::DisplayUpdate;
use crate::liveness::LivenessClock;

// ============================================================================
// Session Entry
// ============================================================================

/// Registry-side state of one agent connection.
struct SessionEntry {
    identity: AgentIdentity,
    state: SessionState,
    connected_at: DateTime<Utc>,
    clock: Arc<LivenessClock>,
    control: mpsc::UnboundedSender<ControlCommand>,
    cancel: CancellationToken,
}

impl SessionEntry {
    fn view(&self, id: SessionId) -> SessionView {
        SessionView {
            id,
            address: self.identity.address(),
            display_name: self.identity.display_name(),
            state: self.state,
            connected_at: self.connected_at,
            heartbeat_age_ms: u64::try_from(self.clock.elapsed().as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    /// Queues a command for the connection's writer.
    ///
    /// A closed queue means the connection is already going away; its
    /// removal will follow, so the command is dropped.
    fn send(&self, id: SessionId, cmd: ControlCommand) {
        let kind = cmd.kind();
        if self.control.send(cmd).is_err() {
            debug!(session_id = %id, command = kind, "Control queue closed, command dropped");
        } else {
            debug!(session_id = %id, command = kind, "Queued control command");
        }
    }
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all session state.
///
/// Sessions are keyed by `SessionId`, which increases with every admission,
/// so iterating the map yields admission order.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    config: MonitorConfig,

    sessions: BTreeMap<SessionId, SessionEntry>,

    /// Last id handed out.
    next_id: u64,

    /// The session allowed to stream, if any.
    slot: Option<SessionId>,

    /// The session the operator last selected.
    active: Option<SessionId>,

    /// Set by `Shutdown`; no admissions afterwards.
    closed: bool,

    /// Event publisher for presentation subscribers
    event_publisher: broadcast::Sender<SessionEvent>,

    /// Queue feeding the display task
    display: mpsc::UnboundedSender<DisplayUpdate>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        config: MonitorConfig,
        event_publisher: broadcast::Sender<SessionEvent>,
        display: mpsc::UnboundedSender<DisplayUpdate>,
    ) -> Self {
        Self {
            receiver,
            config,
            sessions: BTreeMap::new(),
            next_id: 0,
            slot: None,
            active: None,
            closed: false,
            event_publisher,
            display,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(capacity = self.config.capacity, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        // Whatever is left gets torn down so connection tasks stop.
        let remaining = self.handle_shutdown();
        info!(sessions = remaining, "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Admit { peer, respond_to } => {
                let result = self.handle_admit(peer);
                // On a dropped receiver the Admission is dropped too, which
                // leaves a session nobody serves. Undo it.
                if let Err(Ok(admission)) = respond_to.send(result) {
                    let _ = self.handle_remove(admission.session_id, RemovalReason::Explicit);
                }
            }
            RegistryCommand::CompleteHandshake {
                session_id,
                name,
                respond_to,
            } => {
                let result = self.handle_complete_handshake(session_id, &name);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Touch { ip, respond_to } => {
                let _ = respond_to.send(self.handle_touch(ip));
            }
            RegistryCommand::ForwardFrame { session_id, frame } => {
                self.handle_forward_frame(session_id, frame);
            }
            RegistryCommand::Remove {
                session_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_remove(session_id, reason);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Select {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_select(session_id));
            }
            RegistryCommand::ToggleStream { respond_to } => {
                let _ = respond_to.send(self.handle_toggle_stream());
            }
            RegistryCommand::SendNotice { text, respond_to } => {
                let _ = respond_to.send(self.handle_send_notice(text));
            }
            RegistryCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(self.handle_shutdown());
            }
            RegistryCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let view = self
                    .sessions
                    .get(&session_id)
                    .map(|entry| entry.view(session_id));
                let _ = respond_to.send(view);
            }
            RegistryCommand::GetAllSessions { respond_to } => {
                let views = self
                    .sessions
                    .iter()
                    .map(|(id, entry)| entry.view(*id))
                    .collect();
                let _ = respond_to.send(views);
            }
            RegistryCommand::GetSlot { respond_to } => {
                let _ = respond_to.send(SlotStatus {
                    active: self.active,
                    streaming: self.slot,
                });
            }
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    fn handle_admit(&mut self, peer: SocketAddr) -> Result<Admission, RegistryError> {
        if self.closed {
            return Err(RegistryError::ShuttingDown);
        }

        if self.sessions.len() >= self.config.capacity {
            warn!(
                peer = %peer,
                current = self.sessions.len(),
                max = self.config.capacity,
                "Registry is full, rejecting connection"
            );
            return Err(RegistryError::RegistryFull {
                max: self.config.capacity,
            });
        }

        self.next_id += 1;
        let session_id = SessionId::new(self.next_id);
        let clock = Arc::new(LivenessClock::new());
        let cancel = CancellationToken::new();
        let (control, control_rx) = mpsc::unbounded_channel();

        self.sessions.insert(
            session_id,
            SessionEntry {
                identity: AgentIdentity::new(peer),
                state: SessionState::Handshaking,
                connected_at: Utc::now(),
                clock: Arc::clone(&clock),
                control,
                cancel: cancel.clone(),
            },
        );

        info!(
            session_id = %session_id,
            peer = %peer,
            total = self.sessions.len(),
            "Session admitted"
        );
        self.publish(SessionEvent::Registered {
            session_id,
            address: peer,
        });

        Ok(Admission {
            session_id,
            control_rx,
            cancel,
            clock,
        })
    }

    fn handle_complete_handshake(
        &mut self,
        session_id: SessionId,
        name: &str,
    ) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(RegistryError::SessionNotFound(session_id))?;

        entry.identity.set_display_name(name)?;
        entry.state = SessionState::Idle;

        info!(
            session_id = %session_id,
            name = %entry.identity.display_name(),
            "Handshake complete"
        );
        self.publish_update(session_id);
        Ok(())
    }

    /// Resets the liveness clock of the newest session from `ip`.
    ///
    /// Several sessions can share an address (an agent that reconnected
    /// before its old session was evicted); the newest is the live one.
    fn handle_touch(&mut self, ip: IpAddr) -> Option<SessionId> {
        let (id, entry) = self
            .sessions
            .iter()
            .rev()
            .find(|(_, entry)| entry.identity.ip() == ip)?;
        entry.clock.reset();
        trace!(session_id = %id, ip = %ip, "Heartbeat");
        Some(*id)
    }

    fn handle_forward_frame(&mut self, session_id: SessionId, frame: Frame) {
        if self.slot != Some(session_id) || !self.sessions.contains_key(&session_id) {
            trace!(session_id = %session_id, len = frame.len(), "Discarding frame from non-streaming session");
            return;
        }
        if self.display.send(DisplayUpdate::Show(frame)).is_err() {
            debug!("Display queue closed");
        }
    }

    fn handle_remove(
        &mut self,
        session_id: SessionId,
        reason: RemovalReason,
    ) -> Result<(), RegistryError> {
        let Some(mut entry) = self.sessions.remove(&session_id) else {
            debug!(session_id = %session_id, reason = %reason, "Session already removed");
            return Err(RegistryError::SessionNotFound(session_id));
        };

        // Stops the read loop, the writer and the watchdog; dropping `entry`
        // closes the control queue.
        entry.cancel.cancel();
        entry.state = SessionState::Disconnected;

        if self.slot == Some(session_id) {
            self.slot = None;
            self.clear_display();
        }
        if self.active == Some(session_id) {
            self.active = None;
        }

        info!(
            session_id = %session_id,
            name = %entry.identity.display_name(),
            reason = %reason,
            remaining = self.sessions.len(),
            "Session removed"
        );
        self.publish(SessionEvent::Removed { session_id, reason });
        Ok(())
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    fn handle_select(&mut self, session_id: SessionId) -> Result<(), ManagerError> {
        let entry = self
            .sessions
            .get(&session_id)
            .ok_or(ManagerError::NotFound(session_id))?;
        if !entry.state.is_selectable() {
            return Err(ManagerError::NotReady(session_id));
        }

        self.active = Some(session_id);
        self.transfer_slot(Some(session_id));
        Ok(())
    }

    fn handle_toggle_stream(&mut self) -> Result<StreamToggle, ManagerError> {
        let active = self.active.ok_or(ManagerError::NoActiveSession)?;

        match self.slot {
            Some(holder) => {
                self.transfer_slot(None);
                self.clear_display();
                Ok(StreamToggle::Stopped(holder))
            }
            None => {
                self.transfer_slot(Some(active));
                Ok(StreamToggle::Started(active))
            }
        }
    }

    fn handle_send_notice(&mut self, text: String) -> Result<(), ManagerError> {
        if text.trim().is_empty() {
            return Err(ManagerError::EmptyNotice);
        }
        let len = text.chars().count();
        if len >= self.config.notice_max_chars {
            return Err(ManagerError::NoticeTooLong {
                len,
                max: self.config.notice_max_chars,
            });
        }

        let active = self.active.ok_or(ManagerError::NoActiveSession)?;
        let entry = self
            .sessions
            .get(&active)
            .ok_or(ManagerError::NotFound(active))?;

        info!(session_id = %active, chars = len, "Sending notice");
        entry.send(active, ControlCommand::Notice(text));
        Ok(())
    }

    /// Removes every session. Returns how many there were.
    fn handle_shutdown(&mut self) -> usize {
        self.closed = true;

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        let count = ids.len();
        for id in ids {
            let _ = self.handle_remove(id, RemovalReason::Shutdown);
        }
        self.active = None;

        if count > 0 {
            info!(sessions = count, "Registry shut down");
        }
        count
    }

    // ========================================================================
    // Streaming slot
    // ========================================================================

    /// Moves the streaming slot to `target`.
    ///
    /// The previous holder is sent `Stop` before the new holder is sent
    /// `Start`, and the slot is updated after both are queued. Both go through
    /// per-connection FIFO queues, so the agents see them in that order too.
    fn transfer_slot(&mut self, target: Option<SessionId>) {
        if self.slot == target {
            return;
        }

        if let Some(previous) = self.slot {
            if let Some(entry) = self.sessions.get_mut(&previous) {
                entry.send(previous, ControlCommand::Stop);
                entry.state = SessionState::Idle;
            }
            self.publish_update(previous);
        }

        if let Some(next) = target {
            if let Some(entry) = self.sessions.get_mut(&next) {
                entry.send(next, ControlCommand::Start);
                entry.state = SessionState::Streaming;
            }
            self.publish_update(next);
        }

        info!(from = ?self.slot.map(|id| id.get()), to = ?target.map(|id| id.get()), "Streaming slot moved");
        self.slot = target;
    }

    fn clear_display(&self) {
        if self.display.send(DisplayUpdate::Clear).is_err() {
            debug!("Display queue closed");
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn publish_update(&self, session_id: SessionId) {
        if let Some(entry) = self.sessions.get(&session_id) {
            self.publish(SessionEvent::Updated {
                session: Box::new(entry.view(session_id)),
            });
        }
    }

    /// Publishes an event. No subscribers is not an error.
    fn publish(&self, event: SessionEvent) {
        let _ = self.event_publisher.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    struct Fixture {
        actor: RegistryActor,
        display: mpsc::UnboundedReceiver<DisplayUpdate>,
        events: broadcast::Receiver<SessionEvent>,
    }

    fn fixture(capacity: usize) -> Fixture {
        let (_cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, events) = broadcast::channel(64);
        let (display_tx, display) = mpsc::unbounded_channel();
        let config = MonitorConfig {
            capacity,
            ..MonitorConfig::default()
        };
        Fixture {
            actor: RegistryActor::new(cmd_rx, config, event_tx, display_tx),
            display,
            events,
        }
    }

    fn peer(last: u8, port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last], port))
    }

    fn admit_named(actor: &mut RegistryActor, addr: SocketAddr, name: &str) -> Admission {
        let admission = actor.handle_admit(addr).unwrap();
        actor
            .handle_complete_handshake(admission.session_id, name)
            .unwrap();
        admission
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ControlCommand>) -> Vec<ControlCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_admit_assigns_increasing_ids() {
        let mut fx = fixture(10);
        let a = fx.actor.handle_admit(peer(1, 1000)).unwrap();
        let b = fx.actor.handle_admit(peer(2, 1000)).unwrap();
        assert!(a.session_id < b.session_id);
        assert!(matches!(
            fx.events.try_recv(),
            Ok(SessionEvent::Registered { .. })
        ));
    }

    #[test]
    fn test_admit_respects_capacity() {
        let mut fx = fixture(2);
        let _a = fx.actor.handle_admit(peer(1, 1000)).unwrap();
        let _b = fx.actor.handle_admit(peer(2, 1000)).unwrap();
        let err = fx.actor.handle_admit(peer(3, 1000)).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryFull { max: 2 }));
        assert_eq!(fx.actor.sessions.len(), 2);
    }

    #[test]
    fn test_handshake_moves_to_idle() {
        let mut fx = fixture(10);
        let adm = fx.actor.handle_admit(peer(1, 1000)).unwrap();
        assert_eq!(
            fx.actor.sessions[&adm.session_id].state,
            SessionState::Handshaking
        );

        fx.actor
            .handle_complete_handshake(adm.session_id, "alice")
            .unwrap();
        let view = fx.actor.sessions[&adm.session_id].view(adm.session_id);
        assert_eq!(view.display_name, "alice");
        assert_eq!(view.state, SessionState::Idle);
    }

    #[test]
    fn test_select_requires_handshake() {
        let mut fx = fixture(10);
        let adm = fx.actor.handle_admit(peer(1, 1000)).unwrap();
        assert_eq!(
            fx.actor.handle_select(adm.session_id),
            Err(ManagerError::NotReady(adm.session_id))
        );
        assert_eq!(
            fx.actor.handle_select(SessionId::new(99)),
            Err(ManagerError::NotFound(SessionId::new(99)))
        );
    }

    #[test]
    fn test_slot_transfer_stops_before_starting() {
        let mut fx = fixture(10);
        let mut a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        let mut b = admit_named(&mut fx.actor, peer(2, 1000), "bob");

        fx.actor.handle_select(a.session_id).unwrap();
        assert_eq!(drain(&mut a.control_rx), vec![ControlCommand::Start]);
        assert_eq!(fx.actor.slot, Some(a.session_id));

        fx.actor.handle_select(b.session_id).unwrap();
        assert_eq!(drain(&mut a.control_rx), vec![ControlCommand::Stop]);
        assert_eq!(drain(&mut b.control_rx), vec![ControlCommand::Start]);
        assert_eq!(fx.actor.slot, Some(b.session_id));
        assert_eq!(fx.actor.sessions[&a.session_id].state, SessionState::Idle);
        assert_eq!(
            fx.actor.sessions[&b.session_id].state,
            SessionState::Streaming
        );

        // Reselecting the holder is a no-op.
        fx.actor.handle_select(b.session_id).unwrap();
        assert!(drain(&mut b.control_rx).is_empty());
    }

    #[test]
    fn test_toggle_stream() {
        let mut fx = fixture(10);
        assert_eq!(
            fx.actor.handle_toggle_stream(),
            Err(ManagerError::NoActiveSession)
        );

        let mut a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        fx.actor.handle_select(a.session_id).unwrap();
        drain(&mut a.control_rx);

        assert_eq!(
            fx.actor.handle_toggle_stream(),
            Ok(StreamToggle::Stopped(a.session_id))
        );
        assert_eq!(drain(&mut a.control_rx), vec![ControlCommand::Stop]);
        assert_eq!(fx.display.try_recv(), Ok(DisplayUpdate::Clear));
        assert_eq!(fx.actor.slot, None);

        assert_eq!(
            fx.actor.handle_toggle_stream(),
            Ok(StreamToggle::Started(a.session_id))
        );
        assert_eq!(drain(&mut a.control_rx), vec![ControlCommand::Start]);
    }

    #[test]
    fn test_frames_only_from_slot_holder() {
        let mut fx = fixture(10);
        let a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        let b = admit_named(&mut fx.actor, peer(2, 1000), "bob");
        fx.actor.handle_select(a.session_id).unwrap();

        fx.actor
            .handle_forward_frame(b.session_id, Frame::from(vec![2u8; 8]));
        assert_eq!(fx.display.try_recv(), Err(TryRecvError::Empty));

        fx.actor
            .handle_forward_frame(a.session_id, Frame::from(vec![1u8; 8]));
        assert_eq!(
            fx.display.try_recv(),
            Ok(DisplayUpdate::Show(Frame::from(vec![1u8; 8])))
        );
    }

    #[test]
    fn test_notice_validation() {
        let mut fx = fixture(10);
        assert_eq!(
            fx.actor.handle_send_notice("hello".into()),
            Err(ManagerError::NoActiveSession)
        );

        let mut a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        fx.actor.handle_select(a.session_id).unwrap();
        drain(&mut a.control_rx);

        assert_eq!(
            fx.actor.handle_send_notice("   ".into()),
            Err(ManagerError::EmptyNotice)
        );
        assert_eq!(
            fx.actor.handle_send_notice("x".repeat(200)),
            Err(ManagerError::NoticeTooLong { len: 200, max: 200 })
        );

        fx.actor.handle_send_notice("x".repeat(199)).unwrap();
        fx.actor
            .handle_send_notice("Pencils down".into())
            .unwrap();
        assert_eq!(
            drain(&mut a.control_rx),
            vec![
                ControlCommand::Notice("x".repeat(199)),
                ControlCommand::Notice("Pencils down".into()),
            ]
        );
    }

    #[test]
    fn test_remove_slot_holder_clears_once() {
        let mut fx = fixture(10);
        let a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        fx.actor.handle_select(a.session_id).unwrap();

        fx.actor
            .handle_remove(a.session_id, RemovalReason::HeartbeatTimeout)
            .unwrap();
        assert!(a.cancel.is_cancelled());
        assert_eq!(fx.actor.slot, None);
        assert_eq!(fx.actor.active, None);
        assert_eq!(fx.display.try_recv(), Ok(DisplayUpdate::Clear));

        // A second removal is reported, not repeated.
        assert!(matches!(
            fx.actor
                .handle_remove(a.session_id, RemovalReason::TransportError),
            Err(RegistryError::SessionNotFound(_))
        ));
        assert_eq!(fx.display.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_touch_resets_newest_matching_session() {
        let mut fx = fixture(10);
        let _old = fx.actor.handle_admit(peer(1, 1000)).unwrap();
        let new = fx.actor.handle_admit(peer(1, 2000)).unwrap();
        let _other = fx.actor.handle_admit(peer(2, 1000)).unwrap();

        let ip: IpAddr = [192, 168, 1, 1].into();
        assert_eq!(fx.actor.handle_touch(ip), Some(new.session_id));
        assert_eq!(fx.actor.handle_touch([10, 0, 0, 1].into()), None);
    }

    #[test]
    fn test_shutdown_removes_everything() {
        let mut fx = fixture(10);
        let a = admit_named(&mut fx.actor, peer(1, 1000), "alice");
        let b = fx.actor.handle_admit(peer(2, 1000)).unwrap();
        fx.actor.handle_select(a.session_id).unwrap();

        assert_eq!(fx.actor.handle_shutdown(), 2);
        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
        assert!(fx.actor.sessions.is_empty());
        assert_eq!(fx.display.try_recv(), Ok(DisplayUpdate::Clear));
        assert_eq!(fx.display.try_recv(), Err(TryRecvError::Empty));

        assert!(matches!(
            fx.actor.handle_admit(peer(3, 1000)),
            Err(RegistryError::ShuttingDown)
        ));
    }
}
