//! Participant addresses and the startup roster (spec.md §3 "Roster", §6
//! "Roster format").
use crate::error::Error;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A participant address, an opaque `host:port` token.
///
/// Newtype over `String` rather than a bare alias so that a node's own
/// address and a peer's address can't be mixed up with arbitrary strings
/// at the type level.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Wraps a raw `host:port` string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The underlying `host:port` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The fixed set of `N` participant addresses known at startup (spec.md
/// §3 "Roster"). Stable for the lifetime of the run — dynamic membership
/// is a non-goal.
#[derive(Clone, Debug)]
pub struct Roster {
    /// Display name per address, in the order read from the roster file.
    names: BTreeMap<Address, String>,
    local: Address,
}

impl Roster {
    /// Parses a roster file of `host:port name` lines, one per
    /// participant, and asserts that `local` is one of them.
    ///
    /// Grounded on `pkg/dledger/dlegder.go::readPeerAddresses` and
    /// `nodes/peer.go`'s `peers.txt` format in the original
    /// implementation.
    pub fn load(path: &Path, local: Address) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let mut names = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let addr = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or(addr).to_string();
            names.insert(Address::new(addr), name);
        }
        if !names.contains_key(&local) {
            return Err(Error::NotInRoster(local.to_string()));
        }
        Ok(Self { names, local })
    }

    /// Builds a roster directly from an address/name list, bypassing the
    /// file format. Used by tests and by in-process multi-node
    /// simulations.
    pub fn from_pairs<I>(pairs: I, local: Address) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (Address, String)>,
    {
        let names: BTreeMap<_, _> = pairs.into_iter().collect();
        if !names.contains_key(&local) {
            return Err(Error::NotInRoster(local.to_string()));
        }
        Ok(Self { names, local })
    }

    /// This node's own address.
    pub fn local(&self) -> &Address {
        &self.local
    }

    /// Number of participants, `N`.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if the roster is empty (should never happen once loaded).
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All participant addresses, in a stable (sorted) order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.names.keys()
    }

    /// All participant addresses other than `local`.
    pub fn peers(&self) -> impl Iterator<Item = &Address> {
        self.names.keys().filter(move |a| *a != &self.local)
    }

    /// Display name for an address, if known.
    pub fn name(&self, addr: &Address) -> Option<&str> {
        self.names.get(addr).map(String::as_str)
    }
}

/// `supermajority(n) = n > ceil(2N/3)` (spec.md §3).
pub fn supermajority(count: usize, population: usize) -> bool {
    let threshold = (2 * population + 2) / 3; // ceil(2N/3)
    count > threshold
}
