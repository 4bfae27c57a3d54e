//! The hostname ↔ address registry.

use std::collections::HashMap;

/// Injective partial mapping hostname → advertised address.
#[derive(Debug, Default)]
pub struct AddrBook {
    addrs: HashMap<String, String>,
}

impl AddrBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address for a hostname.
    pub fn get(&self, hostname: &str) -> Option<&str> {
        self.addrs.get(hostname).map(String::as_str)
    }

    /// Hostname for an address.
    pub fn reverse(&self, ip: &str) -> Option<String> {
        self.addrs
            .iter()
            .find(|(_, a)| a.as_str() == ip)
            .map(|(h, _)| h.clone())
    }

    /// Register a pair. Refused when the address is already mapped
    /// or the hostname already has one.
    pub fn add(&mut self, hostname: &str, ip: &str) -> bool {
        if self.reverse(ip).is_some() || self.addrs.contains_key(hostname) {
            return false;
        }
        self.addrs.insert(hostname.to_string(), ip.to_string());
        true
    }

    /// Drop a hostname. Returns whether it was known.
    pub fn remove(&mut self, hostname: &str) -> bool {
        self.addrs.remove(hostname).is_some()
    }

    /// Snapshot as `[[hostname, ip], ...]`, sorted.
    pub fn to_wire(&self) -> Vec<(String, String)> {
        let mut wire: Vec<(String, String)> = self
            .addrs
            .iter()
            .map(|(h, a)| (h.clone(), a.clone()))
            .collect();
        wire.sort();
        wire
    }

    /// Merge a snapshot; colliding entries keep the local value.
    pub fn load_wire(&mut self, wire: &[(String, String)]) {
        for (hostname, ip) in wire {
            self.add(hostname, ip);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
