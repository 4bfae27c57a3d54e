//! Graph invariants under randomised mutation sequences.

use {meshtalk_topology::Topology, proptest::prelude::*};

const PEERS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

/// One random mutation against the graph.
#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
    Connect(usize, usize),
    Disconnect(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..PEERS.len()).prop_map(Op::Add),
        (0..PEERS.len()).prop_map(Op::Remove),
        (0..PEERS.len(), 0..PEERS.len()).prop_map(|(a, b)| Op::Connect(a, b)),
        (0..PEERS.len(), 0..PEERS.len()).prop_map(|(a, b)| Op::Disconnect(a, b)),
    ]
}

fn apply(topology: &mut Topology, op: &Op) {
    match op {
        Op::Add(i) => topology.add_peer(PEERS[*i]),
        Op::Remove(i) => {
            // the center never removes itself
            if PEERS[*i] != topology.center() {
                topology.remove_peer(PEERS[*i]);
            }
        }
        Op::Connect(a, b) => {
            if a != b {
                topology.set_connection(PEERS[*a], PEERS[*b], true);
            }
        }
        Op::Disconnect(a, b) => topology.set_connection(PEERS[*a], PEERS[*b], false),
    }
}

proptest! {
    /// Invariant 1: neighbors are symmetric after any mutation mix.
    #[test]
    fn neighbors_stay_symmetric(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut topology = Topology::new("a");
        for op in &ops {
            apply(&mut topology, op);
        }
        for peer in topology.peers() {
            for neighbor in &peer.neighbors {
                let other = topology.peer(neighbor);
                prop_assert!(other.is_some(), "{neighbor} named but missing");
                prop_assert!(
                    other.unwrap().neighbors.contains(&peer.hostname),
                    "{} -> {neighbor} is one-way",
                    peer.hostname
                );
            }
        }
    }

    /// Reachability and next hops agree: a peer has a next hop
    /// exactly when a path from the center exists.
    #[test]
    fn next_hops_match_reachability(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut topology = Topology::new("a");
        for op in &ops {
            apply(&mut topology, op);
        }
        for peer in topology.peers() {
            let path = topology.shortest_path(&peer.hostname);
            if peer.next_hop.is_some() && peer.hostname != topology.center() {
                prop_assert_eq!(path.first().map(String::as_str), Some(topology.center()));
                prop_assert_eq!(path.last().map(String::as_str), Some(peer.hostname.as_str()));
                // the cached hop is the first step of the path
                prop_assert_eq!(
                    peer.next_hop.as_deref(),
                    Some(path[1].as_str())
                );
            } else if peer.hostname != topology.center() {
                prop_assert_eq!(path.len(), 1, "unreachable peers have no path");
            }
        }
    }

    /// The wire snapshot reproduces the edge set exactly.
    #[test]
    fn snapshot_preserves_edges(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let mut topology = Topology::new("a");
        for op in &ops {
            apply(&mut topology, op);
        }
        let mut restored = Topology::new("a");
        restored.load_wire(&topology.to_wire());
        prop_assert_eq!(restored.edges(), topology.edges());
    }
}
