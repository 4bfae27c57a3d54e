//! A deterministic multi-node harness.
//!
//! Each node is a real [`Client`] with sockets bound to ephemeral
//! ports and multicast disabled; envelopes are delivered by hand
//! instead of over links, so every interleaving a test wants can be
//! forced exactly.
//!
//! Two envelope-numbering streams exist per node and must not
//! collide:
//!
//! - the node's own factory, used when a test calls
//!   `process_command_line` (ids start at `<host>-1`);
//! - the harness stream for envelopes it fabricates on the node's
//!   behalf, which starts at `<host>-100`.

use {
    crossbeam_channel::{bounded, Receiver, Sender},
    meshtalk_core::{Client, ClientOptions, Console},
    meshtalk_net::NetConfig,
    meshtalk_proto::{Command, Envelope},
    serde_json::{json, Value},
    std::time::{SystemTime, UNIX_EPOCH},
};

/// RSA size for harness nodes; small keys keep the suite fast.
pub const TEST_KEY_BITS: usize = 512;

/// Where the harness numbering stream starts.
const HARNESS_SEQ_BASE: u64 = 100;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One harness-controlled peer.
pub struct TestNode {
    /// The node's overlay identity.
    pub hostname: String,
    /// The client under test.
    pub client: Client,
    /// Console output, for asserting user-visible lines.
    pub console: Receiver<String>,
    /// The command queue feeding the client.
    pub commands: Sender<String>,
    harness_seq: u64,
    originated: u64,
}

impl TestNode {
    fn new(index: usize) -> Self {
        let hostname = format!("{}.lan", (b'a' + index as u8) as char);
        let nickname = format!("Node{}", (b'A' + index as u8) as char);
        let ip = format!("2001:db8::{}", index + 1);

        let (console, console_rx) = Console::channel(false);
        let (command_tx, command_rx) = bounded(16);
        let options = ClientOptions {
            nickname: Some(nickname),
            hostname: Some(hostname.clone()),
            ip: Some(ip),
            rsa_bits: TEST_KEY_BITS,
            multicast: false,
        };
        let mut client = Client::new(NetConfig::dev_default(), options, command_rx, console, None)
            .expect("harness client construction");
        client.bootstrap().expect("harness bootstrap");

        Self {
            hostname,
            client,
            console: console_rx,
            commands: command_tx,
            harness_seq: HARNESS_SEQ_BASE,
            originated: 0,
        }
    }

    /// Next id in the harness stream for this node.
    pub fn next_harness_id(&mut self) -> String {
        self.harness_seq += 1;
        format!("{}-{}", self.hostname, self.harness_seq)
    }

    /// Run a command on the node and return the id its factory gave
    /// the resulting proposal.
    pub fn originate(&mut self, line: &str) -> String {
        self.client.process_command_line(line);
        self.originated += 1;
        format!("{}-{}", self.hostname, self.originated)
    }

    /// Throw away buffered console output.
    pub fn drain_console(&self) {
        while self.console.try_recv().is_ok() {}
    }

    /// Collect all buffered console output.
    pub fn console_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.console.try_recv() {
            lines.push(line);
        }
        lines
    }
}

/// A set of nodes sharing one overlay view.
pub struct Mesh {
    /// All nodes, index 0 = `a.lan`.
    pub nodes: Vec<TestNode>,
}

impl Mesh {
    /// Build `count` nodes connected in a line `a - b - c - ...`.
    pub fn line(count: usize) -> Self {
        let hostnames: Vec<String> = (0..count)
            .map(|i| format!("{}.lan", (b'a' + i as u8) as char))
            .collect();
        let edges: Vec<(String, String)> = hostnames
            .windows(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Self::with_edges(count, &edges)
    }

    /// Build `count` nodes with an explicit edge list.
    pub fn with_edges(count: usize, edges: &[(String, String)]) -> Self {
        assert!(count <= 26, "hostnames are single letters");
        let mut nodes: Vec<TestNode> = (0..count).map(TestNode::new).collect();

        // gather every node's announcement data, then install the
        // world into each node as one ADDCONNECTION flood would
        let roster: Vec<(String, String, String, String)> = nodes
            .iter()
            .map(|node| {
                (
                    node.hostname.clone(),
                    node.client.nicknames().get(&node.hostname).unwrap().to_string(),
                    node.client.addrs().get(&node.hostname).unwrap().to_string(),
                    node.client
                        .keys()
                        .public_pem(&node.hostname)
                        .unwrap()
                        .to_string(),
                )
            })
            .collect();

        for node in &mut nodes {
            let mut new_peers = serde_json::Map::new();
            for (hostname, nickname, ip, pem) in &roster {
                if hostname == &node.hostname {
                    continue;
                }
                new_peers.insert(
                    hostname.clone(),
                    json!({ "ip": ip, "name": nickname, "publicKey": pem }),
                );
            }
            let connections: Vec<Value> = edges.iter().map(|(a, b)| json!([a, b])).collect();
            let envelope = Envelope {
                id: "seed.lan-1".to_string(),
                origin: "seed.lan".to_string(),
                timestamp: unix_now(),
                proposal: false,
                command: Command::AddConnection,
                payload: json!({ "connections": connections, "newPeers": new_peers }),
                received_from: None,
            };
            node.client.handle_peer_envelope(envelope);
            node.drain_console();
        }
        Self { nodes }
    }

    /// Index of a node by hostname.
    fn index_of(&self, hostname: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.hostname == hostname)
            .unwrap_or_else(|| panic!("no node {hostname}"))
    }

    /// Borrow a node by hostname.
    pub fn node(&mut self, hostname: &str) -> &mut TestNode {
        let index = self.index_of(hostname);
        &mut self.nodes[index]
    }

    /// Deliver an envelope to every node except its origin, as a
    /// completed flood would.
    pub fn deliver(&mut self, envelope: &Envelope) {
        for node in &mut self.nodes {
            if node.hostname == envelope.origin {
                continue;
            }
            let mut copy = envelope.clone();
            copy.received_from = Some(envelope.origin.clone());
            node.client.handle_peer_envelope(copy);
        }
    }

    /// Originate a proposal at `origin` through its command line and
    /// flood the matching envelope to everyone else. Returns the
    /// proposal id.
    pub fn propose(&mut self, origin: &str, line: &str, command: Command, target: &str) -> String {
        let id = {
            let node = self.node(origin);
            node.originate(line)
        };
        let envelope = Envelope {
            id: id.clone(),
            origin: origin.to_string(),
            timestamp: unix_now(),
            proposal: true,
            command,
            payload: json!({ "target": target }),
            received_from: None,
        };
        self.deliver(&envelope);
        id
    }

    /// Flood a confirmation from `confirmer` for `proposal_id`.
    pub fn confirm(&mut self, confirmer: &str, proposal_id: &str) {
        let id = self.node(confirmer).next_harness_id();
        let envelope = Envelope {
            id,
            origin: confirmer.to_string(),
            timestamp: unix_now(),
            proposal: true,
            command: Command::Confirmation,
            payload: json!(proposal_id),
            received_from: None,
        };
        self.deliver(&envelope);
    }

    /// Flood a reject from `rejecter` for `proposal_id`.
    pub fn reject(&mut self, rejecter: &str, proposal_id: &str) {
        let id = self.node(rejecter).next_harness_id();
        let envelope = Envelope {
            id,
            origin: rejecter.to_string(),
            timestamp: unix_now(),
            proposal: true,
            command: Command::Reject,
            payload: json!(proposal_id),
            received_from: None,
        };
        self.deliver(&envelope);
    }

    /// Flood a REMOVEPEER for `lost` from `reporter`.
    pub fn remove_peer(&mut self, reporter: &str, lost: &str) {
        let id = self.node(reporter).next_harness_id();
        let envelope = Envelope {
            id,
            origin: reporter.to_string(),
            timestamp: unix_now(),
            proposal: false,
            command: Command::RemovePeer,
            payload: json!(lost),
            received_from: Some(lost.to_string()),
        };
        // everyone applies it except the lost peer itself, which is
        // gone and never sees the flood
        for node in &mut self.nodes {
            if node.hostname == lost {
                continue;
            }
            let mut copy = envelope.clone();
            if node.hostname != reporter {
                copy.received_from = Some(reporter.to_string());
            }
            node.client.handle_peer_envelope(copy);
        }
    }

    /// Assert that every node agrees with `check`.
    pub fn assert_all<F: Fn(&Client) -> bool>(&self, what: &str, check: F) {
        for node in &self.nodes {
            assert!(check(&node.client), "{what} failed at {}", node.hostname);
        }
    }
}
