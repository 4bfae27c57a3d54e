//! The peer link set: framed TCP streams to direct neighbors.
//!
//! Wire format per frame:
//!
//! ```text
//! [4 bytes: payload length (u32-be)] [N bytes: ciphertext]
//! ```
//!
//! Reads are non-blocking into a per-link buffer; a frame is handed
//! up once the buffer holds the full payload. Writes loop until the
//! whole frame is on the socket. Inbound connections are only
//! accepted inside explicit accept windows (bootstrap, healing wait,
//! reconnect wait) — the steady-state tick never accepts.

use {
    crate::{
        config::NetConfig,
        error::{NetError, Result},
        ident,
    },
    log::{debug, error, info, warn},
    std::{
        collections::{BTreeSet, HashMap},
        io::{ErrorKind, Read, Write},
        net::{IpAddr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
        thread,
        time::{Duration, Instant},
    },
};

/// A known way to reach a peer, kept for reconnects and healing.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Peer address in textual form.
    pub ip: String,
    /// Peer-link listener port.
    pub port: u16,
}

/// What the per-tick poll can surface.
#[derive(Debug)]
pub enum LinkEvent {
    /// A complete frame arrived from a neighbor.
    Frame {
        /// Hostname the frame came from.
        from: String,
        /// The sealed envelope bytes.
        ciphertext: Vec<u8>,
    },
    /// A link died and the reconnect window failed.
    PeerLost {
        /// Hostname of the lost neighbor.
        hostname: String,
    },
}

/// Assembles length-prefixed frames from a byte stream.
#[derive(Debug, Default)]
struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Pop one complete frame, if buffered. An oversized length
    /// prefix poisons the stream and is reported as an error.
    fn take_frame(&mut self, max_size: usize) -> Result<Option<Vec<u8>>> {
        if self.bytes.len() < 4 {
            return Ok(None);
        }
        let mut header = [0u8; 4];
        header.copy_from_slice(&self.bytes[..4]);
        let length = u32::from_be_bytes(header) as usize;
        if length > max_size {
            return Err(NetError::OversizedFrame {
                peer: String::new(),
                size: length,
                max: max_size,
            });
        }
        if self.bytes.len() < 4 + length {
            return Ok(None);
        }
        let frame = self.bytes[4..4 + length].to_vec();
        self.bytes.drain(..4 + length);
        Ok(Some(frame))
    }
}

/// Encode one frame: big-endian length prefix plus payload.
fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[derive(Debug)]
struct Link {
    hostname: String,
    stream: TcpStream,
    buffer: FrameBuffer,
}

/// The set of established peer links plus the listener.
#[derive(Debug)]
pub struct PeerLinks {
    config: NetConfig,
    local_hostname: String,
    listener: TcpListener,
    links: Vec<Link>,
    endpoints: HashMap<String, Endpoint>,
}

impl PeerLinks {
    /// Bind the peer-link listener.
    pub fn listen(config: NetConfig, local_hostname: &str) -> Result<Self> {
        let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, config.peer_port))
            .map_err(NetError::Setup)?;
        listener.set_nonblocking(true).map_err(NetError::Setup)?;
        let port = listener.local_addr().map_err(NetError::Setup)?.port();
        info!("waiting for peers to connect on port {port}");
        Ok(Self {
            config,
            local_hostname: local_hostname.to_string(),
            listener,
            links: Vec::new(),
            endpoints: HashMap::new(),
        })
    }

    /// The port the listener actually bound (differs from the config
    /// when it asked for 0).
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr().map_err(NetError::Setup)?.port())
    }

    /// Hostnames of all directly linked peers.
    pub fn neighbors(&self) -> BTreeSet<String> {
        self.links.iter().map(|l| l.hostname.clone()).collect()
    }

    /// Whether a link to the peer is established.
    pub fn is_linked(&self, hostname: &str) -> bool {
        self.links.iter().any(|l| l.hostname == hostname)
    }

    // ── Endpoint book ───────────────────────────────────────────────────

    /// Remember how to reach a peer. `port = None` keeps a previously
    /// recorded port, defaulting to the well-known peer port.
    pub fn record_endpoint(&mut self, hostname: &str, ip: &str, port: Option<u16>) {
        let port = port
            .or_else(|| self.endpoints.get(hostname).map(|e| e.port))
            .unwrap_or(self.config.peer_port);
        self.endpoints
            .insert(hostname.to_string(), Endpoint { ip: ip.to_string(), port });
    }

    /// The recorded endpoint for a peer.
    pub fn endpoint(&self, hostname: &str) -> Option<&Endpoint> {
        self.endpoints.get(hostname)
    }

    /// Forget a peer's endpoint (after it left the overlay).
    pub fn forget_endpoint(&mut self, hostname: &str) {
        self.endpoints.remove(hostname);
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Accept inbound connections until the window closes or the
    /// link slots fill up. Returns whether at least one peer
    /// connected.
    pub fn accept_for(&mut self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        let mut accepted = false;
        while Instant::now() < deadline && self.links.len() < self.config.max_links {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    match self.register(stream, addr) {
                        Ok(hostname) => {
                            info!("got new connection from peer '{hostname}' ({addr})");
                            accepted = true;
                        }
                        Err(e) => warn!("dropping inbound connection from {addr}: {e}"),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.config.poll_timeout);
                }
                Err(e) => {
                    error!("accept error: {e}");
                    thread::sleep(self.config.poll_timeout);
                }
            }
        }
        accepted
    }

    /// Dial a peer. The port falls back to the endpoint book, then to
    /// the well-known peer port. Returns the peer's hostname.
    pub fn connect(&mut self, ip: &str, port: Option<u16>) -> Result<String> {
        self.connect_with_timeout(ip, port, self.config.connect_timeout)
    }

    fn connect_with_timeout(
        &mut self,
        ip: &str,
        port: Option<u16>,
        timeout: Duration,
    ) -> Result<String> {
        if self.links.len() >= self.config.max_links {
            return Err(NetError::LinksFull(self.config.max_links));
        }
        let port = port
            .or_else(|| {
                self.endpoints
                    .values()
                    .find(|e| e.ip == ip)
                    .map(|e| e.port)
            })
            .unwrap_or(self.config.peer_port);
        let addr = parse_addr(ip, port)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            NetError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        let hostname = self.register(stream, addr)?;
        self.record_endpoint(&hostname, ip, Some(port));
        info!("connected to new peer '{hostname}'");
        Ok(hostname)
    }

    /// Common path for dialled and accepted streams: resolve the
    /// hostname, make the stream non-blocking, store the link.
    fn register(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<String> {
        let hostname = ident::hostname_for(&addr.ip());
        if self.is_linked(&hostname) {
            debug!("already linked to '{hostname}', keeping the existing link");
            return Ok(hostname);
        }
        stream.set_nonblocking(true)?;
        if !self.endpoints.contains_key(&hostname) {
            // inbound side: the source port is ephemeral, so only the
            // address is trustworthy; the listen port comes from
            // hellos or overlay data later
            self.record_endpoint(&hostname, &addr.ip().to_string(), None);
        }
        self.links.push(Link {
            hostname: hostname.clone(),
            stream,
            buffer: FrameBuffer::default(),
        });
        Ok(hostname)
    }

    /// Close every link and stop caring about the listener.
    pub fn close_all(&mut self) {
        for link in self.links.drain(..) {
            let _ = link.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    // ── Frame I/O ───────────────────────────────────────────────────────

    /// Send one sealed envelope to a linked neighbor.
    pub fn send(&mut self, hostname: &str, ciphertext: &[u8]) -> Result<()> {
        if ciphertext.len() > self.config.max_frame_size {
            return Err(NetError::OversizedFrame {
                peer: hostname.to_string(),
                size: ciphertext.len(),
                max: self.config.max_frame_size,
            });
        }
        let frame = encode_frame(ciphertext);
        let poll_timeout = self.config.poll_timeout;
        let link = self
            .links
            .iter_mut()
            .find(|l| l.hostname == hostname)
            .ok_or_else(|| NetError::NoLink(hostname.to_string()))?;
        write_all_looped(&mut link.stream, &frame, poll_timeout)
    }

    /// Poll all links once. Surfaces at most one event per call.
    pub fn poll(&mut self) -> Option<LinkEvent> {
        let mut index = 0;
        while index < self.links.len() {
            let mut chunk = [0u8; 4096];
            let outcome = loop {
                match self.links[index].stream.read(&mut chunk) {
                    Ok(0) => break ReadOutcome::Closed,
                    Ok(n) => {
                        self.links[index].buffer.push(&chunk[..n]);
                        // keep draining until the socket runs dry
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break ReadOutcome::Drained,
                    Err(e) => {
                        error!(
                            "read error on link to '{}': {e}",
                            self.links[index].hostname
                        );
                        break ReadOutcome::Closed;
                    }
                }
            };

            match outcome {
                ReadOutcome::Drained => {
                    match self.links[index]
                        .buffer
                        .take_frame(self.config.max_frame_size)
                    {
                        Ok(Some(frame)) => {
                            return Some(LinkEvent::Frame {
                                from: self.links[index].hostname.clone(),
                                ciphertext: frame,
                            });
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                "dropping link to '{}': {e}",
                                self.links[index].hostname
                            );
                            let lost = self.drop_link(index);
                            return Some(LinkEvent::PeerLost { hostname: lost });
                        }
                    }
                    index += 1;
                }
                ReadOutcome::Closed => {
                    let lost = self.drop_link(index);
                    info!("lost connection to peer '{lost}'");
                    if self.try_reconnect(&lost) {
                        info!("reconnected to peer '{lost}'");
                        return None;
                    }
                    self.forget_endpoint(&lost);
                    return Some(LinkEvent::PeerLost { hostname: lost });
                }
            }
        }
        None
    }

    fn drop_link(&mut self, index: usize) -> String {
        let link = self.links.remove(index);
        let _ = link.stream.shutdown(std::net::Shutdown::Both);
        link.hostname
    }

    /// The single reconnect attempt after a link died. The smaller
    /// hostname of the pair listens, the larger dials; both sides
    /// hold for the full window plus a cooldown second so neither
    /// races ahead of the other.
    fn try_reconnect(&mut self, lost: &str) -> bool {
        let window = self.config.reconnect_window;
        let started = Instant::now();
        let reconnected = if self.local_hostname.as_str() < lost {
            info!("waiting {window:?} for '{lost}' to reconnect");
            self.accept_for(window);
            self.is_linked(lost)
        } else {
            info!("trying to reconnect to '{lost}'");
            match self.endpoints.get(lost).cloned() {
                Some(endpoint) => self
                    .connect_with_timeout(&endpoint.ip, Some(endpoint.port), window)
                    .map(|hostname| hostname == lost)
                    .unwrap_or(false),
                None => false,
            }
        };
        // cooldown keeps both ends of the window in lockstep
        let hold = window + Duration::from_secs(1);
        if let Some(remaining) = hold.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
        reconnected
    }
}

enum ReadOutcome {
    Drained,
    Closed,
}

fn parse_addr(ip: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = ip.parse().map_err(|_| NetError::ConnectionFailed {
        addr: ip.to_string(),
        reason: "not an IP address".into(),
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Write the whole buffer, looping over partial writes and transient
/// `WouldBlock`s.
fn write_all_looped(stream: &mut TcpStream, mut data: &[u8], pause: Duration) -> Result<()> {
    // bounded so a peer that stops reading cannot wedge the tick
    let deadline = Instant::now() + Duration::from_secs(5);
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => {
                return Err(NetError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "peer stopped reading",
                )))
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(NetError::Io(std::io::Error::new(
                        ErrorKind::TimedOut,
                        "send buffer stayed full",
                    )));
                }
                thread::sleep(pause);
            }
            Err(e) => return Err(NetError::Io(e)),
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
