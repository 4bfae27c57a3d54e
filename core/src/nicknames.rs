//! The hostname ↔ nickname registry.
//!
//! Nicknames are the names users see and type; hostnames are the
//! identities the protocol runs on. The mapping is injective — no two
//! peers share a nickname — and nickname changes go through the
//! proposal machine, so every peer applies them in the same order.

use {
    once_cell::sync::Lazy,
    rand::Rng,
    regex::Regex,
    std::collections::HashMap,
};

/// `1..=9` letters or digits.
static NICKNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,9}$").expect("nickname pattern compiles"));

const RANDOM_NICKNAME_LEN: usize = 9;
const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Injective partial mapping hostname → nickname.
#[derive(Debug, Default)]
pub struct NicknameRegistry {
    nicknames: HashMap<String, String>,
}

impl NicknameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a string is a well-formed nickname.
    pub fn is_valid(nickname: &str) -> bool {
        NICKNAME_PATTERN.is_match(nickname)
    }

    /// Nickname for a hostname.
    pub fn get(&self, hostname: &str) -> Option<&str> {
        self.nicknames.get(hostname).map(String::as_str)
    }

    /// Hostname for a nickname.
    pub fn reverse(&self, nickname: &str) -> Option<String> {
        self.nicknames
            .iter()
            .find(|(_, n)| n.as_str() == nickname)
            .map(|(h, _)| h.clone())
    }

    /// Register a pair. Refused when the nickname is taken or the
    /// hostname already has one.
    pub fn add(&mut self, hostname: &str, nickname: &str) -> bool {
        if self.reverse(nickname).is_some() || self.nicknames.contains_key(hostname) {
            return false;
        }
        self.nicknames
            .insert(hostname.to_string(), nickname.to_string());
        true
    }

    /// Drop a hostname. Returns whether it was known.
    pub fn remove(&mut self, hostname: &str) -> bool {
        self.nicknames.remove(hostname).is_some()
    }

    /// Rename a known hostname. The caller has already checked for
    /// collisions through the proposal machine.
    pub fn rename(&mut self, hostname: &str, nickname: &str) -> bool {
        match self.nicknames.get_mut(hostname) {
            Some(current) => {
                *current = nickname.to_string();
                true
            }
            None => false,
        }
    }

    /// A random unused nickname.
    pub fn random(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: String = (0..RANDOM_NICKNAME_LEN)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            if self.reverse(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Number of registered pairs.
    pub fn len(&self) -> usize {
        self.nicknames.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.nicknames.is_empty()
    }

    /// Iterate over `(hostname, nickname)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.nicknames.iter()
    }

    /// Snapshot as `[[hostname, nickname], ...]`, sorted.
    pub fn to_wire(&self) -> Vec<(String, String)> {
        let mut wire: Vec<(String, String)> = self
            .nicknames
            .iter()
            .map(|(h, n)| (h.clone(), n.clone()))
            .collect();
        wire.sort();
        wire
    }

    /// Merge a snapshot; colliding entries keep the local value.
    pub fn load_wire(&mut self, wire: &[(String, String)]) {
        for (hostname, nickname) in wire {
            self.add(hostname, nickname);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern() {
        assert!(NicknameRegistry::is_valid("Alice"));
        assert!(NicknameRegistry::is_valid("a"));
        assert!(NicknameRegistry::is_valid("123456789"));
        assert!(!NicknameRegistry::is_valid(""));
        assert!(!NicknameRegistry::is_valid("0123456789"));
        assert!(!NicknameRegistry::is_valid("with space"));
        assert!(!NicknameRegistry::is_valid("uml-aut"));
    }

    #[test]
    fn test_mapping_is_injective() {
        let mut registry = NicknameRegistry::new();
        assert!(registry.add("a.lan", "Alice"));
        assert!(!registry.add("b.lan", "Alice"));
        assert!(registry.add("b.lan", "Bob"));
        assert_eq!(registry.reverse("Alice"), Some("a.lan".to_string()));
        assert_eq!(registry.get("b.lan"), Some("Bob"));
    }

    #[test]
    fn test_one_nickname_per_hostname() {
        let mut registry = NicknameRegistry::new();
        assert!(registry.add("a.lan", "Alice"));
        assert!(!registry.add("a.lan", "Alt"));
        assert_eq!(registry.get("a.lan"), Some("Alice"));
    }

    #[test]
    fn test_rename() {
        let mut registry = NicknameRegistry::new();
        registry.add("a.lan", "Alice");
        assert!(registry.rename("a.lan", "Zed"));
        assert_eq!(registry.get("a.lan"), Some("Zed"));
        assert_eq!(registry.reverse("Alice"), None);
        assert!(!registry.rename("ghost.lan", "X"));
    }

    #[test]
    fn test_random_nicknames_are_valid_and_fresh() {
        let mut registry = NicknameRegistry::new();
        registry.add("a.lan", "Alice");
        let nickname = registry.random();
        assert!(NicknameRegistry::is_valid(&nickname));
        assert!(registry.reverse(&nickname).is_none());
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut registry = NicknameRegistry::new();
        registry.add("b.lan", "Bob");
        registry.add("a.lan", "Alice");
        let wire = registry.to_wire();
        assert_eq!(wire[0].0, "a.lan"); // sorted

        let mut restored = NicknameRegistry::new();
        restored.load_wire(&wire);
        assert_eq!(restored.get("a.lan"), Some("Alice"));
        assert_eq!(restored.len(), 2);
    }
}
