//! Peer records, graph mutations and the routing pass.
//!
//! Peers are held in a plain `Vec` and looked up by linear scan — the
//! overlay never exceeds a few dozen peers and the simplicity keeps
//! the mutation/recompute cycle obvious. Every mutation re-runs the
//! next-hop pass, so `next_hop` is always current for readers.

use {
    crate::Result,
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
};

/// A peer as seen by the routing pass.
///
/// `distance` and `previous` are transient products of the last
/// Dijkstra run; only `hostname` and `neighbors` are identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Unique peer identity.
    pub hostname: String,
    /// Direct overlay links. Kept symmetric by [`Topology::set_connection`].
    pub neighbors: BTreeSet<String>,
    /// First hop on a shortest path from the center, `None` when
    /// unreachable. The center and its neighbors point at themselves.
    pub next_hop: Option<String>,
    /// Hop count from the center (`u32::MAX` = unreachable).
    pub distance: u32,
    /// Predecessor on the shortest path.
    pub previous: Option<String>,
}

impl Peer {
    fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            neighbors: BTreeSet::new(),
            next_hop: None,
            distance: u32::MAX,
            previous: None,
        }
    }

    /// Number of direct links.
    pub fn degree(&self) -> usize {
        self.neighbors.len()
    }
}

/// Wire form of one peer: identity and edges, no routing state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerWire {
    /// Peer identity.
    pub hostname: String,
    /// Direct overlay links.
    pub neighbors: BTreeSet<String>,
}

/// The overlay graph with a distinguished local peer.
#[derive(Debug)]
pub struct Topology {
    center: String,
    peers: Vec<Peer>,
}

impl Topology {
    /// Create a topology containing only the center peer.
    pub fn new(center: impl Into<String>) -> Self {
        let mut topology = Self {
            center: center.into(),
            peers: Vec::new(),
        };
        let center = topology.center.clone();
        topology.add_peer(&center);
        topology
    }

    /// The local peer this instance routes for.
    pub fn center(&self) -> &str {
        &self.center
    }

    /// Number of peers, including the center.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Look up a peer.
    pub fn peer(&self, hostname: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.hostname == hostname)
    }

    /// Iterator over all peers.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// First hop towards `hostname`, `None` for unknown or
    /// unreachable peers.
    pub fn next_hop(&self, hostname: &str) -> Option<&str> {
        self.peer(hostname)?.next_hop.as_deref()
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Add a peer with no links. Idempotent.
    pub fn add_peer(&mut self, hostname: &str) {
        if self.peer(hostname).is_none() {
            self.peers.push(Peer::new(hostname));
        }
        self.calculate_next_hops();
    }

    /// Remove a peer and every edge touching it.
    pub fn remove_peer(&mut self, hostname: &str) {
        let Some(index) = self.peers.iter().position(|p| p.hostname == hostname) else {
            return;
        };
        let removed = self.peers.remove(index);
        for neighbor in &removed.neighbors {
            if let Some(peer) = self.peer_mut(neighbor) {
                peer.neighbors.remove(hostname);
            }
        }
        self.calculate_next_hops();
    }

    /// Add or remove the undirected edge between two known peers.
    /// Unknown endpoints make this a no-op.
    pub fn set_connection(&mut self, a: &str, b: &str, connected: bool) {
        if self.peer(a).is_none() || self.peer(b).is_none() {
            return;
        }
        if connected {
            self.peer_mut(a).expect("checked above").neighbors.insert(b.to_string());
            self.peer_mut(b).expect("checked above").neighbors.insert(a.to_string());
        } else {
            self.peer_mut(a).expect("checked above").neighbors.remove(b);
            self.peer_mut(b).expect("checked above").neighbors.remove(a);
        }
        self.calculate_next_hops();
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// The hops from the center to `hostname`, inclusive at both
    /// ends. Unknown, unreachable and self targets yield just
    /// `[hostname]`.
    pub fn shortest_path(&self, hostname: &str) -> Vec<String> {
        let mut path = vec![hostname.to_string()];
        let Some(peer) = self.peer(hostname) else {
            return path;
        };
        if peer.hostname == self.center || peer.previous.is_none() {
            return path;
        }

        let mut cursor = peer.previous.as_deref();
        while let Some(hop) = cursor {
            if hop == self.center {
                break;
            }
            path.push(hop.to_string());
            cursor = self.peer(hop).and_then(|p| p.previous.as_deref());
        }
        path.push(self.center.clone());
        path.reverse();
        path
    }

    /// Destination → next hop for every known peer.
    pub fn routing_table(&self) -> BTreeMap<String, Option<String>> {
        self.peers
            .iter()
            .map(|p| (p.hostname.clone(), p.next_hop.clone()))
            .collect()
    }

    /// All edges as sorted pairs, each undirected edge once. Used by
    /// plots and tests.
    pub fn edges(&self) -> BTreeSet<(String, String)> {
        let mut edges = BTreeSet::new();
        for peer in &self.peers {
            for neighbor in &peer.neighbors {
                let (a, b) = if peer.hostname < *neighbor {
                    (peer.hostname.clone(), neighbor.clone())
                } else {
                    (neighbor.clone(), peer.hostname.clone())
                };
                edges.insert((a, b));
            }
        }
        edges
    }

    // ── Wire snapshot ───────────────────────────────────────────────────

    /// Snapshot identity and edges for the INIT payload.
    pub fn to_wire(&self) -> Vec<PeerWire> {
        self.peers
            .iter()
            .map(|p| PeerWire {
                hostname: p.hostname.clone(),
                neighbors: p.neighbors.clone(),
            })
            .collect()
    }

    /// Replace the graph with a snapshot, keeping the center. Edges
    /// naming unknown peers are dropped.
    pub fn load_wire(&mut self, wire: &[PeerWire]) {
        self.peers.clear();
        let center = self.center.clone();
        self.add_peer(&center);

        for record in wire {
            if record.hostname.is_empty() {
                continue;
            }
            self.add_peer(&record.hostname);
        }
        for record in wire {
            for neighbor in &record.neighbors {
                self.set_connection(&record.hostname, neighbor, true);
            }
        }
    }

    /// Decode and load a snapshot from its JSON value.
    pub fn load_json(&mut self, value: &serde_json::Value) -> Result<()> {
        let wire: Vec<PeerWire> = serde_json::from_value(value.clone())?;
        self.load_wire(&wire);
        Ok(())
    }

    // ── Routing pass ────────────────────────────────────────────────────

    /// Unit-weight Dijkstra from the center, then a walk-back pass
    /// caching the first hop per destination.
    ///
    /// Relaxation uses `<=`, so among equal-length paths the
    /// predecessor encountered last in iteration order wins; any
    /// shortest path is a correct answer.
    fn calculate_next_hops(&mut self) {
        let center = self.center.clone();
        let mut queue: BTreeSet<String> = BTreeSet::new();
        for peer in &mut self.peers {
            peer.distance = if peer.hostname == center { 0 } else { u32::MAX };
            peer.previous = None;
            queue.insert(peer.hostname.clone());
        }

        while !queue.is_empty() {
            // peer in the queue with minimum distance
            let mut current: Option<(String, u32)> = None;
            for hostname in &queue {
                let distance = self.peer(hostname).expect("queued peers exist").distance;
                match current {
                    Some((_, best)) if distance > best => {}
                    _ => current = Some((hostname.clone(), distance)),
                }
            }
            let (hostname, distance) = current.expect("queue is non-empty");
            queue.remove(&hostname);
            if distance == u32::MAX {
                // the rest of the queue is unreachable
                break;
            }

            let neighbors = self
                .peer(&hostname)
                .expect("queued peers exist")
                .neighbors
                .clone();
            for neighbor in neighbors {
                let candidate = distance.saturating_add(1);
                let peer = self.peer_mut(&neighbor).expect("neighbors are symmetric");
                if candidate <= peer.distance {
                    peer.distance = candidate;
                    peer.previous = Some(hostname.clone());
                }
            }
        }

        // walk the predecessor chains back to the first hop
        let snapshot: Vec<(String, u32, Option<String>)> = self
            .peers
            .iter()
            .map(|p| (p.hostname.clone(), p.distance, p.previous.clone()))
            .collect();
        for (hostname, distance, previous) in snapshot {
            let next_hop = if distance == u32::MAX {
                None
            } else if previous.is_none() || previous.as_deref() == Some(center.as_str()) {
                // the center itself, or a direct neighbor
                Some(hostname.clone())
            } else {
                let mut cursor = previous;
                loop {
                    match cursor {
                        Some(ref hop) => {
                            let hop_previous =
                                self.peer(hop).and_then(|p| p.previous.clone());
                            if hop_previous.as_deref() == Some(center.as_str()) {
                                break Some(hop.clone());
                            }
                            if hop_previous.is_none() {
                                break None;
                            }
                            cursor = hop_previous;
                        }
                        None => break None,
                    }
                }
            };
            if let Some(peer) = self.peer_mut(&hostname) {
                if next_hop.is_none() {
                    peer.previous = None;
                }
                peer.next_hop = next_hop;
            }
        }
    }

    pub(crate) fn peer_mut(&mut self, hostname: &str) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.hostname == hostname)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a topology from an edge list; first hostname is the center.
    pub(crate) fn build(center: &str, peers: &[&str], edges: &[(&str, &str)]) -> Topology {
        let mut topology = Topology::new(center);
        for peer in peers {
            topology.add_peer(peer);
        }
        for (a, b) in edges {
            topology.set_connection(a, b, true);
        }
        topology
    }

    #[test]
    fn test_neighbors_stay_symmetric() {
        let mut t = build("a", &["b", "c"], &[("a", "b"), ("b", "c")]);
        for peer in t.peers() {
            for neighbor in &peer.neighbors {
                assert!(t.peer(neighbor).unwrap().neighbors.contains(&peer.hostname));
            }
        }
        t.remove_peer("b");
        assert!(t.peer("a").unwrap().neighbors.is_empty());
        assert!(t.peer("c").unwrap().neighbors.is_empty());
    }

    #[test]
    fn test_direct_neighbors_route_to_themselves() {
        let t = build("a", &["b", "c"], &[("a", "b"), ("a", "c")]);
        assert_eq!(t.next_hop("b"), Some("b"));
        assert_eq!(t.next_hop("c"), Some("c"));
        assert_eq!(t.next_hop("a"), Some("a"));
    }

    #[test]
    fn test_next_hop_over_a_chain() {
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d")],
        );
        assert_eq!(t.next_hop("c"), Some("b"));
        assert_eq!(t.next_hop("d"), Some("b"));
    }

    #[test]
    fn test_unreachable_peers_have_no_hop() {
        let t = build("a", &["b", "c"], &[("a", "b")]);
        assert_eq!(t.next_hop("c"), None);
        assert!(t.peer("c").unwrap().previous.is_none());
    }

    #[test]
    fn test_tied_paths_yield_some_shortest_path() {
        // a - b - d and a - c - d are both length 2
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        let hop = t.next_hop("d").unwrap();
        assert!(hop == "b" || hop == "c");
        let path = t.shortest_path("d");
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], "a");
        assert_eq!(path[2], "d");
    }

    #[test]
    fn test_shortest_path_endpoints() {
        let t = build("a", &["b", "c"], &[("a", "b"), ("b", "c")]);
        assert_eq!(t.shortest_path("c"), vec!["a", "b", "c"]);
        assert_eq!(t.shortest_path("b"), vec!["a", "b"]);
        // self, unknown and unreachable targets collapse to one entry
        assert_eq!(t.shortest_path("a"), vec!["a"]);
        assert_eq!(t.shortest_path("zz"), vec!["zz"]);
    }

    #[test]
    fn test_routing_updates_on_edge_removal() {
        let mut t = build(
            "a",
            &["b", "c"],
            &[("a", "b"), ("b", "c"), ("a", "c")],
        );
        assert_eq!(t.next_hop("c"), Some("c"));
        t.set_connection("a", "c", false);
        assert_eq!(t.next_hop("c"), Some("b"));
    }

    #[test]
    fn test_wire_snapshot_roundtrip() {
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")],
        );
        let wire = t.to_wire();
        let mut restored = Topology::new("a");
        restored.load_wire(&wire);
        assert_eq!(restored.edges(), t.edges());
        assert_eq!(restored.peer_count(), t.peer_count());
        // routing state is recomputed, not carried
        assert_eq!(restored.next_hop("c"), t.next_hop("c"));
    }

    #[test]
    fn test_load_wire_replaces_existing_state() {
        let mut t = build("a", &["x"], &[("a", "x")]);
        let fresh = build("a", &["b"], &[("a", "b")]);
        t.load_wire(&fresh.to_wire());
        assert!(t.peer("x").is_none());
        assert_eq!(t.next_hop("b"), Some("b"));
    }

    #[test]
    fn test_add_peer_is_idempotent() {
        let mut t = Topology::new("a");
        t.add_peer("b");
        t.add_peer("b");
        assert_eq!(t.peer_count(), 2);
    }
}
