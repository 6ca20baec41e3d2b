//! Lookout Core - Shared types for the LAN screen monitor
//!
//! This crate provides the domain types and configuration shared between
//! the monitor (`lookoutd`) and the agent (`lookout-agent`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod frame;
pub mod session;

// Re-exports for convenience
pub use config::{
    AgentConfig, ConfigError, LookoutConfig, MonitorConfig, NetworkConfig, Overrides,
};
pub use error::{DomainError, DomainResult};
pub use frame::Frame;
pub use session::{AgentIdentity, SessionId, SessionState, SessionView};
