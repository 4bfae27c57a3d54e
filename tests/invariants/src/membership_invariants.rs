//! Membership invariants: admin ∈ members, injective nicknames.

use {
    meshtalk_core::{GroupRegistry, NicknameRegistry},
    proptest::prelude::*,
    std::collections::HashSet,
};

const HOSTS: [&str; 5] = ["a.lan", "b.lan", "c.lan", "d.lan", "e.lan"];
const GROUPS: [&str; 3] = ["chat", "ops", "dev"];

#[derive(Debug, Clone)]
enum Op {
    Create(usize, usize),
    Join(usize, usize),
    Leave(usize, usize),
    Drop(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..GROUPS.len(), 0..HOSTS.len()).prop_map(|(g, h)| Op::Create(g, h)),
        (0..GROUPS.len(), 0..HOSTS.len()).prop_map(|(g, h)| Op::Join(g, h)),
        (0..GROUPS.len(), 0..HOSTS.len()).prop_map(|(g, h)| Op::Leave(g, h)),
        (0..HOSTS.len()).prop_map(Op::Drop),
    ]
}

proptest! {
    /// Invariant 2: for every group with members, the admin is one
    /// of them; empty groups do not survive the sweep.
    #[test]
    fn admin_is_always_a_member(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let mut registry = GroupRegistry::new();
        for op in &ops {
            match op {
                Op::Create(g, h) => {
                    registry.create(GROUPS[*g], HOSTS[*h]);
                }
                Op::Join(g, h) => {
                    if let Some(group) = registry.get_mut(GROUPS[*g]) {
                        group.add_member(HOSTS[*h]);
                    }
                }
                Op::Leave(g, h) => {
                    if let Some(group) = registry.get_mut(GROUPS[*g]) {
                        group.remove_member(HOSTS[*h]);
                    }
                }
                Op::Drop(h) => {
                    registry.remove_from_all(HOSTS[*h]);
                }
            }
            registry.remove_empty();

            for group in registry.iter() {
                prop_assert!(!group.is_empty(), "empty group '{}' survived", group.name());
                prop_assert!(
                    group.is_member(group.admin()),
                    "admin '{}' outside group '{}'",
                    group.admin(),
                    group.name()
                );
            }
        }
    }

    /// Invariant 3: the nickname map stays injective under random
    /// add/remove/rename traffic.
    #[test]
    fn nicknames_stay_injective(
        ops in proptest::collection::vec(
            (0..HOSTS.len(), "[A-Za-z0-9]{1,9}", prop::bool::ANY),
            1..60,
        )
    ) {
        let mut registry = NicknameRegistry::new();
        for (host, nickname, remove) in &ops {
            if *remove {
                registry.remove(HOSTS[*host]);
            } else if registry.reverse(nickname).is_none() {
                // renames go through the same collision gate the
                // proposal machine enforces
                if !registry.rename(HOSTS[*host], nickname) {
                    registry.add(HOSTS[*host], nickname);
                }
            }

            let mut seen = HashSet::new();
            for (_, nickname) in registry.iter() {
                prop_assert!(seen.insert(nickname.clone()), "duplicate nickname {nickname}");
            }
        }
    }
}
