//! Groups and their registry.
//!
//! A group always has an admin, and the admin is always a member.
//! When the admin leaves, the lexicographically smallest remaining
//! member takes over; a group whose last member leaves is deleted by
//! the registry sweep.

use {
    serde::{Deserialize, Serialize},
    std::collections::BTreeSet,
};

/// One chat group.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    admin: String,
    topic: String,
    members: BTreeSet<String>,
    changed_admin: bool,
}

/// Wire form of a group, as carried in the INIT snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupWire {
    /// Current admin hostname.
    pub admin: String,
    /// Current topic, empty until set.
    pub topic: String,
    /// Member hostnames.
    pub members: BTreeSet<String>,
}

impl Group {
    fn new(name: &str, admin: &str) -> Self {
        Self {
            name: name.to_string(),
            admin: admin.to_string(),
            topic: String::new(),
            members: BTreeSet::new(),
            changed_admin: false,
        }
    }

    /// The group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current admin.
    pub fn admin(&self) -> &str {
        &self.admin
    }

    /// The current topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Replace the topic.
    pub fn set_topic(&mut self, topic: &str) {
        self.topic = topic.to_string();
    }

    /// The member set.
    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    /// Whether the hostname is a member.
    pub fn is_member(&self, hostname: &str) -> bool {
        self.members.contains(hostname)
    }

    /// Whether the group has no members left.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the last removal promoted a new admin.
    pub fn changed_admin(&self) -> bool {
        self.changed_admin
    }

    /// Add a member.
    pub fn add_member(&mut self, hostname: &str) {
        self.members.insert(hostname.to_string());
    }

    /// Remove a member, promoting the smallest remaining member when
    /// the admin left.
    pub fn remove_member(&mut self, hostname: &str) {
        self.members.remove(hostname);
        if !self.members.is_empty() && hostname == self.admin {
            self.admin = self
                .members
                .iter()
                .next()
                .expect("members is non-empty")
                .clone();
            self.changed_admin = true;
        } else {
            self.changed_admin = false;
        }
    }
}

/// All groups known to this peer.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: Vec<Group>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a group.
    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Look up a group mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.name == name)
    }

    /// Create a group with the admin as first member. `None` when the
    /// name is taken.
    pub fn create(&mut self, name: &str, admin: &str) -> Option<&mut Group> {
        if self.get(name).is_some() {
            return None;
        }
        let mut group = Group::new(name, admin);
        group.add_member(admin);
        self.groups.push(group);
        self.groups.last_mut()
    }

    /// Remove a member from every group it is in; returns the names
    /// of the groups it left.
    pub fn remove_from_all(&mut self, hostname: &str) -> Vec<String> {
        let mut left = Vec::new();
        for group in &mut self.groups {
            if group.is_member(hostname) {
                group.remove_member(hostname);
                left.push(group.name.clone());
            }
        }
        left
    }

    /// Delete every empty group; returns their names.
    pub fn remove_empty(&mut self) -> Vec<String> {
        let removed: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.is_empty())
            .map(|g| g.name.clone())
            .collect();
        self.groups.retain(|g| !g.is_empty());
        removed
    }

    /// All group names, in creation order.
    pub fn names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    /// Iterate over all groups.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Snapshot as `[[name, {admin, topic, members}], ...]`.
    pub fn to_wire(&self) -> Vec<(String, GroupWire)> {
        self.groups
            .iter()
            .map(|g| {
                (
                    g.name.clone(),
                    GroupWire {
                        admin: g.admin.clone(),
                        topic: g.topic.clone(),
                        members: g.members.clone(),
                    },
                )
            })
            .collect()
    }

    /// Merge a snapshot; existing groups keep their local state.
    pub fn load_wire(&mut self, wire: &[(String, GroupWire)]) {
        for (name, data) in wire {
            if let Some(group) = self.create(name, &data.admin) {
                group.set_topic(&data.topic);
                for member in &data.members {
                    group.add_member(member);
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_makes_admin_a_member() {
        let mut registry = GroupRegistry::new();
        registry.create("chat", "a.lan").unwrap();
        let group = registry.get("chat").unwrap();
        assert_eq!(group.admin(), "a.lan");
        assert!(group.is_member("a.lan"));
        assert_eq!(group.topic(), "");
    }

    #[test]
    fn test_create_refuses_duplicates() {
        let mut registry = GroupRegistry::new();
        registry.create("chat", "a.lan").unwrap();
        assert!(registry.create("chat", "b.lan").is_none());
        assert_eq!(registry.get("chat").unwrap().admin(), "a.lan");
    }

    #[test]
    fn test_admin_succession_is_lexicographic() {
        let mut registry = GroupRegistry::new();
        let group = registry.create("chat", "c.lan").unwrap();
        group.add_member("b.lan");
        group.add_member("d.lan");
        group.remove_member("c.lan");
        assert_eq!(group.admin(), "b.lan");
        assert!(group.changed_admin());
        // a non-admin removal does not flag a change
        group.remove_member("d.lan");
        assert!(!group.changed_admin());
        assert_eq!(group.admin(), "b.lan");
    }

    #[test]
    fn test_empty_groups_are_swept() {
        let mut registry = GroupRegistry::new();
        registry.create("chat", "a.lan").unwrap();
        registry.create("ops", "b.lan").unwrap();
        assert_eq!(registry.remove_from_all("a.lan"), vec!["chat"]);
        assert_eq!(registry.remove_empty(), vec!["chat"]);
        assert!(registry.get("chat").is_none());
        assert!(registry.get("ops").is_some());
    }

    #[test]
    fn test_admin_in_members_invariant_survives_churn() {
        let mut registry = GroupRegistry::new();
        let group = registry.create("chat", "b.lan").unwrap();
        group.add_member("a.lan");
        group.add_member("c.lan");
        for victim in ["b.lan", "a.lan"] {
            registry.get_mut("chat").unwrap().remove_member(victim);
            let group = registry.get("chat").unwrap();
            assert!(group.is_member(group.admin()));
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut registry = GroupRegistry::new();
        let group = registry.create("chat", "a.lan").unwrap();
        group.set_topic("hello");
        group.add_member("b.lan");

        let mut restored = GroupRegistry::new();
        restored.load_wire(&registry.to_wire());
        let group = restored.get("chat").unwrap();
        assert_eq!(group.admin(), "a.lan");
        assert_eq!(group.topic(), "hello");
        assert!(group.is_member("b.lan"));
    }
}
