//! Runtime configuration shared by the monitor and the agent.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! [network]
//! port = 5353
//!
//! [monitor]
//! capacity = 40
//! eviction_threshold_ms = 15000
//!
//! [agent]
//! discovery_targets = ["10.0.4.1:5353"]
//! ```
//!
//! Durations are written in milliseconds and read back through the
//! `Duration` accessors.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Defaults
// ============================================================================

/// Shared port for discovery/heartbeat datagrams and the data listener.
pub const DEFAULT_PORT: u16 = 53;

/// Datagram receive timeout for discovery and heartbeat replies.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 10_000;

/// Size of the ASCII length header in front of every agent message.
pub const DEFAULT_HEADER_SIZE: usize = 32;

/// Largest frame payload accepted from an agent (32 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Maximum number of concurrently registered sessions.
pub const DEFAULT_CAPACITY: usize = 100;

pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 100;
pub const DEFAULT_WATCHDOG_GRACE_MS: u64 = 1_000;
pub const DEFAULT_EVICTION_THRESHOLD_MS: u64 = 11_000;

/// Notices must be shorter than this many characters.
pub const DEFAULT_NOTICE_MAX_CHARS: usize = 200;

pub const DEFAULT_PING_INTERVAL_MS: u64 = 500;
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 100;

/// Bounded read used by the agent to pick up control commands.
pub const DEFAULT_CONTROL_BUFFER_LEN: usize = 1024;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "LOOKOUT_CONFIG";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

/// Settings both sides must agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub port: u16,
    pub receive_timeout_ms: u64,
    pub header_size: usize,
    pub max_frame_len: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            header_size: DEFAULT_HEADER_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl NetworkConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Monitor-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub capacity: usize,
    pub watchdog_interval_ms: u64,
    pub watchdog_grace_ms: u64,
    pub eviction_threshold_ms: u64,
    pub notice_max_chars: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            watchdog_grace_ms: DEFAULT_WATCHDOG_GRACE_MS,
            eviction_threshold_ms: DEFAULT_EVICTION_THRESHOLD_MS,
            notice_max_chars: DEFAULT_NOTICE_MAX_CHARS,
        }
    }
}

impl MonitorConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog_grace_ms)
    }

    pub fn eviction_threshold(&self) -> Duration {
        Duration::from_millis(self.eviction_threshold_ms)
    }
}

/// Agent-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub ping_interval_ms: u64,
    pub capture_interval_ms: u64,
    pub control_buffer_len: usize,
    /// Explicit discovery destinations. Empty means "every interface
    /// broadcast address on the shared port".
    pub discovery_targets: Vec<SocketAddr>,
    /// Overrides the login name sent at handshake.
    pub display_name: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            capture_interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            control_buffer_len: DEFAULT_CONTROL_BUFFER_LEN,
            discovery_targets: Vec::new(),
            display_name: None,
        }
    }
}

impl AgentConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}

// ============================================================================
// Command-line overrides
// ============================================================================

/// Values given on the command line. Each one that is set replaces what
/// the config file said.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub port: Option<u16>,
    pub display_name: Option<String>,
    pub discovery_targets: Vec<SocketAddr>,
}

// ============================================================================
// Top-level config
// ============================================================================

/// Complete configuration as read from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LookoutConfig {
    pub network: NetworkConfig,
    pub monitor: MonitorConfig,
    pub agent: AgentConfig,
}

impl LookoutConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads configuration from the first source that exists.
    ///
    /// Order: `explicit` path, `$LOOKOUT_CONFIG`, the per-user config file,
    /// then built-in defaults. An explicit or environment path that cannot
    /// be read is an error; a missing per-user file is not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load(&path);
            }
            debug!(path = %path.display(), "No config file, using defaults");
        }

        Ok(Self::default())
    }

    /// Layers command-line values over the loaded file.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.network.port = port;
        }
        if let Some(name) = overrides.display_name {
            self.agent.display_name = Some(name);
        }
        if !overrides.discovery_targets.is_empty() {
            self.agent.discovery_targets = overrides.discovery_targets;
        }
    }

    /// Checks the invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.header_size == 0 {
            return Err(ConfigError::Invalid("network.header_size must be > 0".into()));
        }
        // The header must be able to hold the largest accepted length.
        let max_digits = self.network.max_frame_len.to_string().len();
        if self.network.header_size < max_digits {
            return Err(ConfigError::Invalid(format!(
                "network.header_size ({}) cannot hold a {}-digit length",
                self.network.header_size, max_digits
            )));
        }
        if self.network.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.receive_timeout_ms must be > 0".into(),
            ));
        }
        if self.monitor.capacity == 0 {
            return Err(ConfigError::Invalid("monitor.capacity must be > 0".into()));
        }
        if self.monitor.watchdog_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.watchdog_interval_ms must be > 0".into(),
            ));
        }
        if self.agent.ping_interval_ms == 0 || self.agent.capture_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "agent intervals must be > 0".into(),
            ));
        }
        if self.monitor.eviction_threshold_ms <= self.agent.ping_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "monitor.eviction_threshold_ms ({}) must exceed agent.ping_interval_ms ({})",
                self.monitor.eviction_threshold_ms, self.agent.ping_interval_ms
            )));
        }
        if self.agent.control_buffer_len == 0 {
            return Err(ConfigError::Invalid(
                "agent.control_buffer_len must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Per-user config file location (`~/.config/lookout/config.toml` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lookout").join("config.toml"))
}
