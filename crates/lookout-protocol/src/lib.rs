//! Lookout Protocol - Wire protocol between monitor and agents
//!
//! Three pieces, all ASCII-compatible with existing deployments:
//! - `token` - discovery and heartbeat datagrams
//! - `framing` - length-prefixed agent→monitor messages (`FrameCodec`)
//! - `control` - raw monitor→agent commands (`ControlCommand`)

pub mod control;
pub mod framing;
pub mod token;

pub use control::{ControlBatch, ControlCommand};
pub use framing::{parse_length_header, FrameCodec, FramedMessage, FramerError};
pub use token::{trim_padding, DiscoveryToken};
