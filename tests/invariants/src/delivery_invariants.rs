//! Delivery invariants: at-most-once per origin, monotone ordering,
//! and mutual exclusion of conflicting proposals.

use {
    meshtalk_proto::{Command, Envelope, MessageLedger},
    proptest::prelude::*,
    serde_json::json,
    std::collections::HashMap,
};

const NOW: u64 = 1_700_000_000;
const ORIGINS: [&str; 3] = ["a.lan", "b.lan", "c.lan"];

fn proposal(origin: &str, n: u64, command: Command, target: &str) -> Envelope {
    Envelope {
        id: format!("{origin}-{n}"),
        origin: origin.to_string(),
        timestamp: NOW,
        proposal: true,
        command,
        payload: json!({ "target": target }),
        received_from: None,
    }
}

proptest! {
    /// Invariant 5: for any stream of (origin, counter) pairs with
    /// repeats, each id passes at most once, and acceptance order is
    /// strictly increasing per origin.
    #[test]
    fn delivery_is_at_most_once_and_monotone(
        stream in proptest::collection::vec((0..ORIGINS.len(), 1u64..20), 1..100)
    ) {
        let mut ledger = MessageLedger::new();
        let mut highest: HashMap<&str, u64> = HashMap::new();
        let mut accepted: HashMap<&str, Vec<u64>> = HashMap::new();

        for (origin_index, counter) in stream {
            let origin = ORIGINS[origin_index];
            let id = format!("{origin}-{counter}");
            let duplicate = ledger.check_received(&id, NOW);
            let expected_duplicate = highest.get(origin).map(|h| counter <= *h).unwrap_or(false);
            prop_assert_eq!(duplicate, expected_duplicate, "id {}", id);
            if !duplicate {
                highest.insert(origin, counter);
                accepted.entry(origin).or_default().push(counter);
            }
        }
        for (origin, counters) in accepted {
            let mut sorted = counters.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(&counters, &sorted, "origin {} out of order", origin);
        }
    }

    /// Invariant 4: of two proposals conflicting per the blocking
    /// table, the second never enters the ledger while the first is
    /// live — so at most one can ever collect confirmations.
    #[test]
    fn conflicting_proposals_exclude_each_other(
        pair in prop_oneof![
            Just((Command::Nick, Command::Nick)),
            Just((Command::Create, Command::Create)),
            Just((Command::Create, Command::Join)),
            Just((Command::Leave, Command::Join)),
            Just((Command::Join, Command::Leave)),
        ],
        target in "[a-z]{1,8}",
    ) {
        let (first, second) = pair;
        let mut ledger = MessageLedger::new();

        let p1 = proposal("a.lan", 1, first, &target);
        let p2 = proposal("b.lan", 1, second, &target);

        prop_assert!(!ledger.is_blocked(&p1, NOW));
        prop_assert!(ledger.add_proposal(p1, NOW));
        prop_assert!(ledger.is_blocked(&p2, NOW), "{:?} not blocked by {:?}", second, first);

        // a different target is never blocked
        let other = proposal("b.lan", 2, second, "elsewhere");
        prop_assert!(!ledger.is_blocked(&other, NOW));
    }

    /// Confirmation counting is idempotent per confirming origin.
    #[test]
    fn confirmations_count_each_origin_once(
        confirmers in proptest::collection::vec(0..ORIGINS.len(), 1..30)
    ) {
        let mut ledger = MessageLedger::new();
        ledger.add_proposal(proposal("a.lan", 1, Command::Nick, "Zed"), NOW);

        let mut expected: std::collections::HashSet<usize> = Default::default();
        for confirmer in confirmers {
            expected.insert(confirmer);
            let count = ledger.add_confirmation("a.lan-1", ORIGINS[confirmer], NOW);
            prop_assert_eq!(count, expected.len());
        }
    }
}
