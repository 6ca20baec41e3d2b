//! Agent supervisor loop.
//!
//! ```text
//!        ┌──────────────┐
//!   ┌───▶│   discover   │  (retries until a monitor answers)
//!   │    └──────┬───────┘
//!   │           ▼
//!   │    ┌──────────────┐
//!   │    │ link.run  ∥  │  first to finish ends the round
//!   │    │ heartbeat    │
//!   │    └──────┬───────┘
//!   │           ▼
//!   └──── restart delay
//! ```
//!
//! A monitor that stops answering heartbeats, a dropped data connection and
//! a refused connect all lead to the same place: a fresh discovery. Only the
//! cancellation token ends the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lookout_core::LookoutConfig;

use crate::beacon::{BeaconError, DiscoveryBeacon};
use crate::capture::FrameCapture;
use crate::identity::IdentityProvider;
use crate::link::AgentLink;
use crate::notice::NoticeSink;

/// Pause between a lost session and the next discovery round.
pub const RESTART_DELAY: Duration = Duration::from_millis(250);

pub struct Agent {
    beacon: DiscoveryBeacon,
    link: AgentLink,
    cancel_token: CancellationToken,
}

impl Agent {
    /// Binds the discovery socket and resolves the display name.
    ///
    /// `agent.display_name` wins when set; command-line names reach it
    /// through [`LookoutConfig::apply_overrides`]. `identity` is the
    /// fallback for stations with no configured name.
    pub async fn bind(
        config: &LookoutConfig,
        identity: &dyn IdentityProvider,
        capture: Arc<dyn FrameCapture>,
        notices: Arc<dyn NoticeSink>,
        cancel_token: CancellationToken,
    ) -> Result<Self, BeaconError> {
        let name = config
            .agent
            .display_name
            .clone()
            .unwrap_or_else(|| identity.display_name());

        let beacon = DiscoveryBeacon::bind(config).await?;
        debug!(targets = ?beacon.targets(), name = %name, "Agent ready");

        Ok(Self {
            beacon,
            link: AgentLink::new(config, name, capture, notices),
            cancel_token,
        })
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    /// Runs discover → connect → stream rounds until cancelled.
    pub async fn run(&self) {
        info!(name = %self.name(), "Agent started");

        while !self.cancel_token.is_cancelled() {
            let record = match self.beacon.discover(&self.cancel_token).await {
                Ok(record) => record,
                Err(BeaconError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Discovery failed");
                    self.pause().await;
                    continue;
                }
            };

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,

                lost = self.beacon.heartbeat(record.monitor) => {
                    warn!(monitor = %record.monitor, error = %lost, "Monitor lost, rediscovering");
                }

                result = self.link.run(record.monitor) => match result {
                    Ok(()) => info!(monitor = %record.monitor, "Link closed, rediscovering"),
                    Err(e) => warn!(monitor = %record.monitor, error = %e, "Link failed, rediscovering"),
                },
            }

            self.pause().await;
        }

        info!("Agent stopped");
    }

    async fn pause(&self) {
        tokio::select! {
            _ = self.cancel_token.cancelled() => {}
            _ = sleep(RESTART_DELAY) => {}
        }
    }
}
