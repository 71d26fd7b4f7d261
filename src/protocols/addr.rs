// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Address catalog
//!
//! Source addresses are interned into small dense ordinals so that source
//! lists can be handled as ordered sets of integers. Ordinals are stable while
//! referenced; a released ordinal is reused by the next new address.
//!
//! Every holder of an ordinal (a record being processed, an input source
//! entry, an output source entry, a host source) owns one reference.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

/// Dense index standing in for a source address
pub type Ordinal = u32;

/// A set of source ordinals
pub type AddrSet = BTreeSet<Ordinal>;

#[derive(Debug, Clone)]
struct CatEntry {
    addr: IpAddr,
    refs: u32,
}

/// Reference-counted address to ordinal map
#[derive(Debug, Default)]
pub struct AddrCatalog {
    by_addr: HashMap<IpAddr, Ordinal>,
    entries: Vec<Option<CatEntry>>,
    free: BTreeSet<Ordinal>,
}

impl AddrCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal of an address, if it is currently catalogued
    pub fn lookup(&self, addr: &IpAddr) -> Option<Ordinal> {
        self.by_addr.get(addr).copied()
    }

    /// Address behind an ordinal
    pub fn addr(&self, ord: Ordinal) -> Option<IpAddr> {
        self.entries
            .get(ord as usize)
            .and_then(|e| e.as_ref())
            .map(|e| e.addr)
    }

    /// Look up or create the ordinal for an address and take a reference
    pub fn intern(&mut self, addr: IpAddr) -> Ordinal {
        if let Some(ord) = self.lookup(&addr) {
            self.retain(ord);
            return ord;
        }
        let entry = CatEntry { addr, refs: 1 };
        let ord = match self.free.pop_first() {
            Some(ord) => {
                self.entries[ord as usize] = Some(entry);
                ord
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as Ordinal
            }
        };
        self.by_addr.insert(addr, ord);
        ord
    }

    /// Take another reference on an existing ordinal
    pub fn retain(&mut self, ord: Ordinal) {
        if let Some(Some(entry)) = self.entries.get_mut(ord as usize) {
            entry.refs += 1;
        } else {
            debug_assert!(false, "retain of unknown ordinal {}", ord);
        }
    }

    /// Drop a reference; the ordinal is recycled when the last one goes
    pub fn release(&mut self, ord: Ordinal) {
        let slot = match self.entries.get_mut(ord as usize) {
            Some(slot) => slot,
            None => {
                debug_assert!(false, "release of unknown ordinal {}", ord);
                return;
            }
        };
        let gone = match slot {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if gone {
            if let Some(entry) = slot.take() {
                self.by_addr.remove(&entry.addr);
            }
            self.free.insert(ord);
        }
    }

    /// Intern a list of addresses as a set (duplicates collapse)
    pub fn intern_all(&mut self, addrs: &[IpAddr]) -> AddrSet {
        let unique: BTreeSet<IpAddr> = addrs.iter().copied().collect();
        unique.into_iter().map(|a| self.intern(a)).collect()
    }

    /// Release one reference on every member of a set
    pub fn release_all(&mut self, set: &AddrSet) {
        for &ord in set {
            self.release(ord);
        }
    }

    /// Resolve a set of ordinals back to addresses, in address order
    pub fn addrs_of<'a>(&self, ords: impl IntoIterator<Item = &'a Ordinal>) -> Vec<IpAddr> {
        let mut out: Vec<IpAddr> = ords.into_iter().filter_map(|o| self.addr(*o)).collect();
        out.sort();
        out
    }

    /// Number of live catalog entries
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

/// Whether `addr` falls inside `prefix/len`
///
/// Mixed address families never match. Lengths beyond the address width
/// are treated as host routes.
pub fn prefix_contains(prefix: &IpAddr, len: u8, addr: &IpAddr) -> bool {
    match (prefix, addr) {
        (IpAddr::V4(p), IpAddr::V4(a)) => {
            let len = u32::from(len.min(32));
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            (u32::from(*p) & mask) == (u32::from(*a) & mask)
        }
        (IpAddr::V6(p), IpAddr::V6(a)) => {
            let len = u32::from(len.min(128));
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
            (u128::from(*p) & mask) == (u128::from(*a) & mask)
        }
        _ => false,
    }
}
