//! Lookout Monitor - session registry, agent server and discovery responder
//!
//! This crate provides the monitor side of Lookout:
//! - `registry` - actor owning sessions, the streaming slot and the selection
//! - `server` - TCP accept loop and per-agent `AgentSession`s
//! - `liveness` - heartbeat clock and eviction watchdog
//! - `responder` - discovery/heartbeat datagram responder
//! - `display` - display collaborator queue and sinks
//! - `console` - operator commands and their dispatcher
//! - `monitor` - wiring all of the above on one port
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        lookoutd                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  MonitorServer  │────▶│       RegistryActor         │    │
//! │  │  (TCP, port N)  │     │ (sessions, slot, selection) │    │
//! │  └────────┬────────┘     └───────▲──────────────┬──────┘    │
//! │           │ spawn                │ touch        │ show/clear│
//! │           ▼                      │              ▼           │
//! │  ┌─────────────────┐     ┌───────┴───────┐ ┌────────────┐   │
//! │  │  AgentSession   │     │   Discovery   │ │  Display   │   │
//! │  │  (per agent)    │     │   Responder   │ │   task     │   │
//! │  └─────────────────┘     │  (UDP, port N)│ └────────────┘   │
//! │                          └───────────────┘                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod console;
pub mod display;
pub mod liveness;
pub mod monitor;
pub mod registry;
pub mod responder;
pub mod server;

pub use monitor::{Monitor, MonitorError};
