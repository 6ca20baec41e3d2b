//! Where discovery requests are sent.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tracing::{debug, warn};

use lookout_core::LookoutConfig;

/// Broadcast address of every interface that is up and not loopback.
///
/// Duplicates (several addresses on one subnet) are collapsed.
pub fn broadcast_addresses() -> nix::Result<Vec<Ipv4Addr>> {
    let mut found = Vec::new();

    for ifaddr in getifaddrs()? {
        if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
            || !ifaddr.flags.contains(InterfaceFlags::IFF_UP)
        {
            continue;
        }
        let Some(broadcast) = ifaddr.broadcast.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };

        let ip = broadcast.ip();
        debug!(interface = %ifaddr.interface_name, broadcast = %ip, "Found broadcast address");
        if !found.contains(&ip) {
            found.push(ip);
        }
    }

    Ok(found)
}

/// Destinations for discovery requests.
///
/// Configured targets win. Otherwise every interface broadcast address on
/// the shared port, or the limited broadcast address if none is found.
pub fn discovery_targets(config: &LookoutConfig) -> Vec<SocketAddr> {
    if !config.agent.discovery_targets.is_empty() {
        return config.agent.discovery_targets.clone();
    }

    let port = config.network.port;
    let broadcasts = broadcast_addresses().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to list network interfaces");
        Vec::new()
    });

    if broadcasts.is_empty() {
        return vec![SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))];
    }

    broadcasts
        .into_iter()
        .map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, port)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_targets_win() {
        let mut config = LookoutConfig::default();
        let target: SocketAddr = "127.0.0.1:5353".parse().unwrap();
        config.agent.discovery_targets = vec![target];
        assert_eq!(discovery_targets(&config), vec![target]);
    }

    #[test]
    fn test_default_targets_use_shared_port() {
        let mut config = LookoutConfig::default();
        config.network.port = 4242;
        let targets = discovery_targets(&config);
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|t| t.port() == 4242));
        assert!(targets.iter().all(|t| !t.ip().is_loopback()));
    }
}
