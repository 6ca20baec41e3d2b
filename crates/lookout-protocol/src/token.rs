//! Discovery and heartbeat datagram tokens.

use std::fmt;

pub const DISCOVER_REQUEST: &str = "LH_DISCOVER_REQUEST";
pub const DISCOVER_RESPONSE: &str = "LH_DISCOVER_RESPONSE";
pub const CHECK_CONNECTION: &str = "LH_CHECK_CONNECTION";
pub const CONNECTED: &str = "LH_CONNECTED";

/// Largest datagram either side expects to receive.
pub const MAX_DATAGRAM_LEN: usize = 1500;

/// The fixed vocabulary carried by discovery/heartbeat datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryToken {
    /// Agent → broadcast: is there a monitor?
    DiscoverRequest,
    /// Monitor → agent: here I am.
    DiscoverResponse,
    /// Agent → monitor heartbeat ping.
    CheckConnection,
    /// Monitor → agent heartbeat reply.
    Connected,
}

impl DiscoveryToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscoverRequest => DISCOVER_REQUEST,
            Self::DiscoverResponse => DISCOVER_RESPONSE,
            Self::CheckConnection => CHECK_CONNECTION,
            Self::Connected => CONNECTED,
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Decodes a received datagram.
    ///
    /// Padding is trimmed from both ends, then the token must match exactly.
    /// Returns `None` for anything outside the vocabulary.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        match trim_padding(datagram) {
            b if b == DISCOVER_REQUEST.as_bytes() => Some(Self::DiscoverRequest),
            b if b == DISCOVER_RESPONSE.as_bytes() => Some(Self::DiscoverResponse),
            b if b == CHECK_CONNECTION.as_bytes() => Some(Self::CheckConnection),
            b if b == CONNECTED.as_bytes() => Some(Self::Connected),
            _ => None,
        }
    }

    /// The reply the monitor sends for this token, if any.
    pub fn reply(&self) -> Option<Self> {
        match self {
            Self::DiscoverRequest => Some(Self::DiscoverResponse),
            Self::CheckConnection => Some(Self::Connected),
            Self::DiscoverResponse | Self::Connected => None,
        }
    }
}

impl fmt::Display for DiscoveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strips NUL bytes, spaces and other control characters from both ends.
///
/// Peers pad fixed-size buffers with zeros, so every text comparison on the
/// wire goes through this first.
pub fn trim_padding(bytes: &[u8]) -> &[u8] {
    let is_pad = |b: &u8| *b <= b' ';
    let start = bytes.iter().position(|b| !is_pad(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_pad(b)).map_or(start, |i| i + 1);
    bytes.get(start..end).unwrap_or_default()
}
