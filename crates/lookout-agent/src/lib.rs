//! Lookout Agent - finds a monitor and streams captures to it on request
//!
//! This crate provides the agent side of Lookout:
//! - `beacon` - discovery broadcasts and the heartbeat loop
//! - `interfaces` - broadcast addresses of the local interfaces
//! - `link` - the data connection: handshake, control reads, capture sends
//! - `agent` - the supervisor that sequences discover → connect → run
//! - `capture`, `identity`, `notice` - collaborator traits and shipped impls
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - A lost monitor restarts discovery instead of ending the process

pub mod agent;
pub mod beacon;
pub mod capture;
pub mod identity;
pub mod interfaces;
pub mod link;
pub mod notice;

pub use agent::Agent;
pub use beacon::{BeaconError, DiscoveryBeacon, DiscoveryRecord};
pub use capture::{CaptureError, FileCapture, FrameCapture};
pub use identity::{FixedIdentity, IdentityProvider, SystemIdentity};
pub use link::{AgentLink, LinkError};
pub use notice::{LogNotice, NoticeSink};
