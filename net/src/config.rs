//! Configuration for the transport layer.

use std::{net::Ipv6Addr, time::Duration};

/// The well-known overlay multicast group, `ff12::1234`.
pub const MULTICAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff12, 0, 0, 0, 0, 0, 0, 0x1234);

/// Default discovery port.
pub const DEFAULT_MULTICAST_PORT: u16 = 5432;

/// Default peer-link port.
pub const DEFAULT_PEER_PORT: u16 = 6543;

/// Transport configuration.
///
/// Controls ports, link limits and the various real-time windows the
/// protocol runs on.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Multicast group the discovery socket joins.
    pub multicast_group: Ipv6Addr,

    /// Port of the discovery socket.
    pub multicast_port: u16,

    /// Port the peer-link listener binds (0 = ephemeral, tests only).
    pub peer_port: u16,

    /// Maximum number of concurrent peer links.
    pub max_links: usize,

    /// Timeout for an outbound connect.
    pub connect_timeout: Duration,

    /// Accept window while bootstrapping into an existing overlay.
    pub accept_window: Duration,

    /// Accept window while waiting for a healing connection.
    pub heal_window: Duration,

    /// Window for the single reconnect attempt after a link drops.
    pub reconnect_window: Duration,

    /// Socket poll granularity; every tick-level poll blocks at most
    /// this long.
    pub poll_timeout: Duration,

    /// Maximum size of one frame on a peer link.
    pub max_frame_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            multicast_group: MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            peer_port: DEFAULT_PEER_PORT,
            max_links: 3,
            connect_timeout: Duration::from_secs(7),
            accept_window: Duration::from_secs(2),
            heal_window: Duration::from_secs(3),
            reconnect_window: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(1),
            max_frame_size: 1_048_576, // 1 MB
        }
    }
}

impl NetConfig {
    /// Config for local tests: ephemeral ports and short windows.
    pub fn dev_default() -> Self {
        Self {
            multicast_port: 0,
            peer_port: 0,
            connect_timeout: Duration::from_millis(200),
            accept_window: Duration::from_millis(100),
            heal_window: Duration::from_millis(100),
            reconnect_window: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let cfg = NetConfig::default();
        assert_eq!(cfg.multicast_group.to_string(), "ff12::1234");
        assert_eq!(cfg.multicast_port, 5432);
        assert_eq!(cfg.peer_port, 6543);
        assert_eq!(cfg.max_links, 3);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(7));
    }
}
