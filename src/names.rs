//! Static name-resolution lookup table.
//!
//! A small fixed-capacity map from domain names to IPv4 addresses, seeded
//! with a couple of well-known entries. It plays no part in the lease
//! protocol; it backs the `lookup` CLI subcommand.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Maximum number of entries the table accepts.
const MAX_ENTRIES: usize = 100;

/// Bounded domain-name to address map.
#[derive(Debug, Default)]
pub struct NameTable {
    entries: HashMap<String, Ipv4Addr>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table preloaded with the built-in illustrative entries.
    pub fn with_builtin_entries() -> Self {
        let mut table = Self::new();
        table.insert("example.com", Ipv4Addr::new(93, 184, 216, 34));
        table.insert("google.com", Ipv4Addr::new(172, 217, 16, 142));
        table
    }

    /// Adds an entry; silently ignored once the table is full.
    pub fn insert(&mut self, domain: &str, ip: Ipv4Addr) {
        if self.entries.len() < MAX_ENTRIES || self.entries.contains_key(domain) {
            self.entries.insert(domain.to_string(), ip);
        }
    }

    pub fn lookup(&self, domain: &str) -> Option<Ipv4Addr> {
        self.entries.get(domain).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
