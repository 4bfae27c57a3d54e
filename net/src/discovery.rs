//! The multicast hello socket.
//!
//! Every established peer keeps one UDP socket joined to the overlay
//! multicast group and polls it once per tick. A starting peer sends
//! a single hello datagram announcing its address, peer port and
//! public key; whoever the bridge-selection policy picks connects
//! back over TCP.

use {
    crate::{
        config::NetConfig,
        error::{NetError, Result},
    },
    log::{debug, info},
    serde::{Deserialize, Serialize},
    socket2::{Domain, Protocol, Socket, Type},
    std::{
        io::ErrorKind,
        net::{Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket},
    },
};

/// The discovery datagram a starting peer multicasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hello {
    /// Advertised IPv6 address.
    pub ip: String,
    /// Port the peer-link listener is bound to.
    pub port: u16,
    /// Public key PEM, so the bridge can seal the INIT snapshot.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// The always-open multicast membership socket.
#[derive(Debug)]
pub struct DiscoverySocket {
    socket: UdpSocket,
    group: SocketAddrV6,
}

impl DiscoverySocket {
    /// Bind the discovery port, join the multicast group and arm the
    /// per-tick read timeout.
    pub fn bind(config: &NetConfig) -> Result<Self> {
        let socket =
            Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).map_err(NetError::Setup)?;
        // several peers on one host share the discovery port
        socket.set_reuse_address(true).map_err(NetError::Setup)?;
        socket.set_only_v6(true).map_err(NetError::Setup)?;
        let bind_addr: SocketAddr =
            SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.multicast_port, 0, 0).into();
        socket.bind(&bind_addr.into()).map_err(NetError::Setup)?;
        socket
            .join_multicast_v6(&config.multicast_group, 0)
            .map_err(NetError::Setup)?;
        socket
            .set_read_timeout(Some(config.poll_timeout))
            .map_err(NetError::Setup)?;

        let socket: UdpSocket = socket.into();
        let port = socket.local_addr().map_err(NetError::Setup)?.port();
        info!(
            "discovery socket joined {} on port {}",
            config.multicast_group, port
        );
        Ok(Self {
            socket,
            group: SocketAddrV6::new(config.multicast_group, port, 0, 0),
        })
    }

    /// Poll for one hello. Returns `None` when nothing arrived within
    /// the poll timeout or the datagram was not a hello.
    pub fn poll(&self) -> Option<Hello> {
        let mut buffer = [0u8; 1024];
        let (length, sender) = match self.socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return None;
            }
            Err(e) => {
                log::error!("discovery recv failed: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<Hello>(&buffer[..length]) {
            Ok(hello) => {
                debug!("hello from {sender}: {}:{}", hello.ip, hello.port);
                Some(hello)
            }
            Err(e) => {
                debug!("ignoring malformed discovery datagram from {sender}: {e}");
                None
            }
        }
    }

    /// Announce this peer to the group from a throwaway socket.
    pub fn send_hello(&self, hello: &Hello) -> Result<()> {
        let datagram = serde_json::to_vec(hello)
            .map_err(|e| NetError::Identity(format!("hello encode: {e}")))?;
        let sender =
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).map_err(NetError::Setup)?;
        sender.send_to(&datagram, self.group)?;
        debug!("sent hello to {}", self.group);
        Ok(())
    }

    /// The group address and port this socket is joined to.
    pub fn group(&self) -> SocketAddrV6 {
        self.group
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> NetConfig {
        // ff01:: is interface-local; loopback delivery works without
        // any routable interface on CI machines
        NetConfig {
            multicast_group: Ipv6Addr::new(0xff01, 0, 0, 0, 0, 0, 0, 0x1234),
            ..NetConfig::dev_default()
        }
    }

    #[test]
    fn test_hello_wire_shape() {
        let hello = Hello {
            ip: "2001:db8::1".into(),
            port: 6543,
            public_key: "-----BEGIN PUBLIC KEY-----".into(),
        };
        let value = serde_json::to_value(&hello).unwrap();
        assert!(value.get("publicKey").is_some());
        assert!(value.get("public_key").is_none());
        let back: Hello = serde_json::from_value(value).unwrap();
        assert_eq!(back, hello);
    }

    #[test]
    fn test_hello_roundtrip_over_loopback() {
        let socket = match DiscoverySocket::bind(&loopback_config()) {
            Ok(socket) => socket,
            // environments without IPv6 can't run this test
            Err(_) => return,
        };
        let hello = Hello {
            ip: "2001:db8::1".into(),
            port: 7000,
            public_key: "pem".into(),
        };
        if socket.send_hello(&hello).is_err() {
            return;
        }
        // a few poll rounds cover scheduler jitter
        for _ in 0..50 {
            if let Some(received) = socket.poll() {
                assert_eq!(received, hello);
                return;
            }
        }
    }

    #[test]
    fn test_poll_ignores_garbage() {
        let socket = match DiscoverySocket::bind(&loopback_config()) {
            Ok(socket) => socket,
            Err(_) => return,
        };
        let sender = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).unwrap();
        if sender.send_to(b"not json", socket.group()).is_err() {
            return;
        }
        for _ in 0..50 {
            assert!(socket.poll().is_none());
        }
    }
}
