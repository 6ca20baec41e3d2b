//! Agent display name sent at handshake.

use tracing::debug;

/// Last resort when neither a login name nor a host name is available.
pub const FALLBACK_NAME: &str = "agent";

/// Environment variables holding the login name, in lookup order.
const LOGIN_VARS: [&str; 3] = ["USER", "USERNAME", "LOGNAME"];

pub trait IdentityProvider: Send + Sync {
    fn display_name(&self) -> String;
}

/// Login name from the environment, falling back to the host name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn display_name(&self) -> String {
        if let Some(name) = login_name() {
            return name;
        }
        if let Some(name) = host_name() {
            debug!(name = %name, "No login name, using host name");
            return name;
        }
        FALLBACK_NAME.to_string()
    }
}

fn login_name() -> Option<String> {
    LOGIN_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn host_name() -> Option<String> {
    let name = nix::unistd::gethostname().ok()?.into_string().ok()?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// A name chosen up front (config or command line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIdentity(String);

impl FixedIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl IdentityProvider for FixedIdentity {
    fn display_name(&self) -> String {
        self.0.clone()
    }
}
