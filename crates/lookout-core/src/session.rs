//! Session domain entities and value objects.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identifier of one agent data connection.
///
/// Assigned by the monitor from a per-process counter when a connection is
/// admitted, so ordering by id is admission order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    /// Accepts `3` as well as `#3`, the form the console prints.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::ParseError {
                field: "session id".to_string(),
                reason: format!("{trimmed:?}: {e}"),
            })
    }
}

// ============================================================================
// Agent Identity
// ============================================================================

/// Who is on the other end of a data connection.
///
/// The display name is assigned once, at handshake. Until then the agent is
/// shown by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    address: SocketAddr,
    display_name: Option<String>,
}

impl AgentIdentity {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            display_name: None,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Address used to match heartbeat datagrams against this agent.
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    /// The handshake name, or the address text if the agent has not sent one.
    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => self.address.ip().to_string(),
        }
    }

    #[must_use]
    pub fn is_named(&self) -> bool {
        self.display_name.is_some()
    }

    /// Assigns the handshake name.
    ///
    /// Surrounding whitespace is dropped. Fails if the name is blank or was
    /// already assigned.
    pub fn set_display_name(&mut self, name: &str) -> DomainResult<()> {
        if let Some(current) = &self.display_name {
            return Err(DomainError::IdentityAlreadySet {
                current: current.clone(),
            });
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::EmptyDisplayName);
        }
        self.display_name = Some(name.to_string());
        Ok(())
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a monitor-side session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connection accepted, waiting for the agent's name.
    #[default]
    Handshaking,

    /// Named and connected, not streaming.
    Idle,

    /// Holds the streaming slot.
    Streaming,

    /// Connection torn down. Only ever seen on the final snapshot.
    Disconnected,
}

impl SessionState {
    /// Returns the display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Handshaking => "handshaking",
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the session can be given the streaming slot.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Idle | Self::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Session View (presentation snapshot)
// ============================================================================

/// Read-only snapshot of a session for the console and event subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub address: SocketAddr,
    pub display_name: String,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
    /// Milliseconds since the last heartbeat when the snapshot was taken.
    pub heartbeat_age_ms: u64,
}

impl SessionView {
    /// One console line, e.g. `#3  alice  192.168.1.20:50122  streaming`.
    pub fn summary(&self) -> String {
        format!(
            "#{}  {}  {}  {}  (heartbeat {} ms ago)",
            self.id, self.display_name, self.address, self.state, self.heartbeat_age_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.1.20:50122".parse().unwrap()
    }

    #[test]
    fn test_session_id_parse() {
        assert_eq!("3".parse::<SessionId>().unwrap(), SessionId::new(3));
        assert_eq!(" #12 ".parse::<SessionId>().unwrap(), SessionId::new(12));
        assert!("alice".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_orders_by_admission() {
        assert!(SessionId::new(1) < SessionId::new(2));
    }

    #[test]
    fn test_identity_defaults_to_address_text() {
        let identity = AgentIdentity::new(addr());
        assert_eq!(identity.display_name(), "192.168.1.20");
        assert!(!identity.is_named());
    }

    #[test]
    fn test_identity_name_set_once() {
        let mut identity = AgentIdentity::new(addr());
        identity.set_display_name("  alice ").unwrap();
        assert_eq!(identity.display_name(), "alice");

        let err = identity.set_display_name("mallory").unwrap_err();
        assert_eq!(
            err,
            DomainError::IdentityAlreadySet {
                current: "alice".to_string()
            }
        );
        assert_eq!(identity.display_name(), "alice");
    }

    #[test]
    fn test_identity_rejects_blank_name() {
        let mut identity = AgentIdentity::new(addr());
        assert_eq!(
            identity.set_display_name(" \t"),
            Err(DomainError::EmptyDisplayName)
        );
        assert!(!identity.is_named());
    }

    #[test]
    fn test_state_labels_and_selectability() {
        assert_eq!(SessionState::Handshaking.label(), "handshaking");
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert!(SessionState::Idle.is_selectable());
        assert!(SessionState::Streaming.is_selectable());
        assert!(!SessionState::Handshaking.is_selectable());
        assert!(!SessionState::Disconnected.is_selectable());
    }

    #[test]
    fn test_view_summary() {
        let view = SessionView {
            id: SessionId::new(3),
            address: addr(),
            display_name: "alice".to_string(),
            state: SessionState::Idle,
            connected_at: Utc::now(),
            heartbeat_age_ms: 250,
        };
        let line = view.summary();
        assert!(line.starts_with("#3  alice"));
        assert!(line.contains("idle"));
        assert!(line.contains("250 ms"));
    }
}
