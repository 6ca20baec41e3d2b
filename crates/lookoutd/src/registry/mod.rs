//! Session registry using Actor pattern.
//!
//! The registry is the single owner of monitor-side session state: the
//! session collection, the streaming slot and the operator's selection. It
//! receives commands via a tokio mpsc channel, so every operation is atomic
//! with respect to every other.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │  AgentSession   │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! │  Responder      │     │                 │     └──────────────────┘
//! │  Console        │     │ BTreeMap<Id,    │     ┌──────────────────┐
//! └─────────────────┘     │  SessionEntry>  │────▶│  Display task    │
//!    RegistryCommand      │ slot / active   │     └──────────────────┘
//!    (mpsc channel)       └─────────────────┘
//! ```

use tokio::sync::{broadcast, mpsc};

use lookout_core::MonitorConfig;

use crate::display::DisplayUpdate;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{
    Admission, ManagerError, RegistryCommand, RegistryError, RemovalReason, SessionEvent,
    SlotStatus, StreamToggle,
};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// `display` receives show/clear updates for the streaming slot holder.
///
/// # Example
///
/// ```no_run
/// use lookout_core::MonitorConfig;
/// use lookoutd::display::{spawn_display, NullSink};
/// use lookoutd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let (display, _task) = spawn_display(NullSink);
///     let handle = spawn_registry(MonitorConfig::default(), display);
///     let sessions = handle.get_all_sessions().await;
/// }
/// ```
pub fn spawn_registry(
    config: MonitorConfig,
    display: mpsc::UnboundedSender<DisplayUpdate>,
) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, config, event_tx.clone(), display);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
