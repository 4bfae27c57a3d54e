//! Bridge selection, fracture repair and underconnection policy.
//!
//! All three policies rank peers by `(degree, hostname)` ascending,
//! so every peer computes the same ranking from the same graph and
//! exactly one endpoint of any repair edge ever dials. The fracture
//! repair additionally gates on the component that contains the
//! globally smallest hostname — that component simulates the repair
//! and dials, everyone else opens an accept window and waits.

use {
    crate::graph::Topology,
    log::debug,
    std::collections::BTreeSet,
};

impl Topology {
    /// Rank the given hostnames by `(degree, hostname)` ascending.
    fn ranked(&self, hostnames: &[String]) -> Vec<String> {
        let mut ranked: Vec<(usize, String)> = hostnames
            .iter()
            .filter_map(|h| self.peer(h).map(|p| (p.degree(), h.clone())))
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, h)| h).collect()
    }

    fn all_hostnames(&self) -> Vec<String> {
        self.peers().map(|p| p.hostname.clone()).collect()
    }

    // ── Bridge selection ────────────────────────────────────────────────

    /// The peers that must connect to a newcomer announced over
    /// multicast: the lowest-ranked peer, plus the second-lowest once
    /// the overlay holds four or more peers (so the newcomer starts
    /// with degree 2).
    pub fn bridge_peers(&self) -> Vec<String> {
        if self.peer_count() == 0 {
            return Vec::new();
        }
        let ranked = self.ranked(&self.all_hostnames());
        let mut bridges = vec![ranked[0].clone()];
        if self.peer_count() >= 4 {
            bridges.push(ranked[1].clone());
        }
        bridges
    }

    // ── Fracture repair ─────────────────────────────────────────────────

    /// Whether any peer became unreachable from the center.
    pub fn is_fractured(&self) -> bool {
        self.peers().any(|p| p.next_hop.is_none())
    }

    /// The peers the *center* must dial to heal a fracture. Empty
    /// when the center's side does not repair (wait for inbound
    /// connections instead).
    ///
    /// Simulates Rmin–Umin edges recursively until the graph is whole
    /// again, then rolls the simulation back; the caller establishes
    /// the real connections and floods them as ADDCONNECTION.
    pub fn connection_targets(&mut self) -> Vec<String> {
        self.connection_targets_within(&BTreeSet::new())
    }

    fn connection_targets_within(&mut self, component: &BTreeSet<String>) -> Vec<String> {
        let mut reachable = Vec::new();
        let mut unreachable = Vec::new();
        for peer in self.peers() {
            if peer.next_hop.is_none() {
                unreachable.push(peer.hostname.clone());
            } else if component.is_empty() || component.contains(&peer.hostname) {
                reachable.push(peer.hostname.clone());
            }
        }
        if unreachable.is_empty() || reachable.is_empty() {
            return Vec::new();
        }

        // only the component holding the globally smallest hostname acts
        let smallest = self
            .peers()
            .map(|p| p.hostname.clone())
            .min()
            .expect("graph is non-empty");
        if !reachable.contains(&smallest) {
            debug!("fracture repair is owned by the component of {smallest}");
            return Vec::new();
        }

        let r_min = self.ranked(&reachable)[0].clone();
        let u_min = self.ranked(&unreachable)[0].clone();
        debug!("simulating repair edge {r_min} - {u_min}");

        self.set_connection(&r_min, &u_min, true);
        let mut targets = Vec::new();
        if self.center() == r_min {
            targets.push(u_min.clone());
        }
        if self.is_fractured() {
            // three or more components: keep repairing from the same side
            let same_side: BTreeSet<String> = reachable.iter().cloned().collect();
            targets.extend(self.connection_targets_within(&same_side));
        }
        self.set_connection(&r_min, &u_min, false);

        targets
    }

    // ── Underconnection ─────────────────────────────────────────────────

    /// Whether the overlay is big enough for the minimum-degree-2
    /// rule (five peers) and some peer still hangs on a single link.
    pub fn is_underconnected(&self) -> bool {
        if self.peer_count() < 5 {
            return false;
        }
        self.peers().any(|p| p.degree() == 1)
    }

    /// The peer the center should dial to fix an underconnection:
    /// the rank-1 peer connects to the rank-0 peer, and only the
    /// center acts when it is that rank-1 peer.
    pub fn underconnection_target(&self) -> Option<String> {
        let ranked = self.ranked(&self.all_hostnames());
        if ranked.len() < 2 {
            return None;
        }
        if ranked[1] == self.center() {
            Some(ranked[0].clone())
        } else {
            None
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn build(center: &str, peers: &[&str], edges: &[(&str, &str)]) -> Topology {
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
    fn test_single_bridge_below_four_peers() {
        let t = build("a", &["b", "c"], &[("a", "b"), ("b", "c")]);
        // degrees: a=1, b=2, c=1 → rank (1,"a"), (1,"c"), (2,"b")
        assert_eq!(t.bridge_peers(), vec!["a"]);
    }

    #[test]
    fn test_two_bridges_at_four_peers() {
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")],
        );
        // all degree 2 → hostname breaks the tie
        assert_eq!(t.bridge_peers(), vec!["a", "b"]);
    }

    #[test]
    fn test_bridge_rank_prefers_low_degree() {
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("a", "d"), ("b", "c")],
        );
        // degrees: a=3, b=2, c=2, d=1
        assert_eq!(t.bridge_peers(), vec!["d", "b"]);
    }

    #[test]
    fn test_square_survives_one_removal() {
        // S5: square a-b-c-d with diagonal a-d; removing b leaves
        // everything reachable through d
        let mut t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")],
        );
        t.remove_peer("b");
        assert!(!t.is_fractured());
        assert_eq!(t.next_hop("c"), Some("d"));
    }

    #[test]
    fn test_fracture_detected_after_split() {
        // S5 continued: dropping a-d as well strands {c, d}
        let mut t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")],
        );
        t.remove_peer("b");
        t.set_connection("a", "d", false);
        assert!(t.is_fractured());
        assert_eq!(t.next_hop("c"), None);
        assert_eq!(t.next_hop("d"), None);
    }

    #[test]
    fn test_center_in_smallest_component_dials() {
        let mut t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")],
        );
        t.remove_peer("b");
        t.set_connection("a", "d", false);
        // a is alone; c-d are the other side. a holds the globally
        // smallest hostname, is Rmin, and must dial Umin = c
        // (degrees: c=1, d=1, tie broken by name).
        assert_eq!(t.connection_targets(), vec!["c"]);
        // the simulation rolled itself back
        assert!(t.is_fractured());
        assert_eq!(t.peer("a").unwrap().degree(), 0);
    }

    #[test]
    fn test_other_component_waits() {
        let mut t = build(
            "c",
            &["a", "d"],
            &[("c", "d")],
        );
        // center c sees {c, d} reachable, {a} unreachable; the
        // globally smallest hostname a is on the other side, so this
        // side waits for the inbound connection
        assert!(t.is_fractured());
        assert!(t.connection_targets().is_empty());
    }

    #[test]
    fn test_three_way_fracture_recurses() {
        // components {a}, {b}, {c} — a repairs towards both
        let mut t = build("a", &["b", "c"], &[]);
        assert!(t.is_fractured());
        let targets = t.connection_targets();
        assert_eq!(targets, vec!["b", "c"]);
    }

    #[test]
    fn test_underconnection_needs_five_peers() {
        let t = build(
            "a",
            &["b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")],
        );
        assert!(!t.is_underconnected());
    }

    #[test]
    fn test_underconnection_detects_degree_one() {
        let mut t = build(
            "a",
            &["b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a"), ("a", "e")],
        );
        assert!(t.is_underconnected());
        t.set_connection("e", "c", true);
        assert!(!t.is_underconnected());
    }

    #[test]
    fn test_underconnection_only_rank_one_acts() {
        let t = build(
            "b",
            &["a", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a"), ("a", "e")],
        );
        // degrees: e=1, a=3, b=2, c=2, d=2 → rank: e(1), b(2), c(2), d(2), a(3)
        // center b is rank 1 → it dials rank 0 = e
        assert_eq!(t.underconnection_target(), Some("e".to_string()));

        let t = build(
            "c",
            &["a", "b", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a"), ("a", "e")],
        );
        // center c is rank 2 → not its move
        assert_eq!(t.underconnection_target(), None);
    }

    #[test]
    fn test_three_way_fracture_other_side_waits() {
        let mut t = build("b", &["a", "c"], &[]);
        assert!(t.is_fractured());
        // smallest hostname a is its own component elsewhere
        assert!(t.connection_targets().is_empty());
    }
}
