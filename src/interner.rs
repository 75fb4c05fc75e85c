//! # Address Interner
//!
//! Bijection between address strings and dense [`AddressId`]s.
//!
//! Each address string is stored exactly once, in `addresses` (indexed by ID).
//! The hash table holds bare IDs and hashes them through `addresses`, so the
//! forward and reverse mappings share one copy of the string data.

use crate::error::{ClusterError, Result};
use crate::model::AddressId;
use hashbrown::HashTable;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::hash::BuildHasher;

#[inline]
fn hash_address(address: &str) -> u64 {
    FxBuildHasher.hash_one(address)
}

/// Interns address strings into dense, first-seen-ordered IDs.
#[derive(Debug, Clone, Default)]
pub struct AddressInterner {
    /// IDs keyed by the hash of `addresses[id]`
    table: HashTable<u32>,
    /// Reverse mapping; `addresses.len()` is the next ID to hand out
    addresses: Vec<Box<str>>,
    /// Total bytes of interned string data
    string_bytes: usize,
}

impl AddressInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interner pre-sized for `capacity` distinct addresses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            addresses: Vec::with_capacity(capacity),
            string_bytes: 0,
        }
    }

    /// Return the ID of `address`, assigning the next ID on first sight.
    ///
    /// The only failure is exhausting the 32-bit ID space.
    pub fn intern(&mut self, address: &str) -> Result<AddressId> {
        let hash = hash_address(address);
        let Self {
            table, addresses, ..
        } = self;
        if let Some(&id) = table.find(hash, |&id| &*addresses[id as usize] == address) {
            return Ok(AddressId(id));
        }

        let id = u32::try_from(addresses.len()).map_err(|_| ClusterError::IdSpaceExhausted {
            interned: addresses.len(),
        })?;
        addresses.push(address.into());
        table.insert_unique(hash, id, |&existing| {
            hash_address(&addresses[existing as usize])
        });
        self.string_bytes += address.len();
        Ok(AddressId(id))
    }

    /// Look up an address without interning it.
    pub fn get(&self, address: &str) -> Option<AddressId> {
        let hash = hash_address(address);
        self.table
            .find(hash, |&id| &*self.addresses[id as usize] == address)
            .map(|&id| AddressId(id))
    }

    /// Address string for an ID.
    #[inline]
    pub fn resolve(&self, id: AddressId) -> Option<&str> {
        self.addresses.get(id.index()).map(|address| &**address)
    }

    /// Number of distinct addresses interned so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Iterate `(id, address)` in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (AddressId, &str)> + '_ {
        self.addresses
            .iter()
            .enumerate()
            .map(|(id, address)| (AddressId(id as u32), &**address))
    }

    /// Rough heap usage: string data, boxed-slice headers and table slots.
    pub fn approx_memory_bytes(&self) -> usize {
        self.string_bytes
            + self.addresses.capacity() * std::mem::size_of::<Box<str>>()
            + self.table.capacity() * (std::mem::size_of::<u32>() + 1)
    }

    /// Borrow the full state for serialization.
    pub fn snapshot(&self) -> InternerSnapshot<'_> {
        InternerSnapshot {
            next_id: self.addresses.len() as u64,
            addresses: &self.addresses,
        }
    }

    /// Rebuild an interner from a deserialized state.
    ///
    /// Rejects states whose counter disagrees with the mapping or that map one
    /// address to two IDs; partial state is never loaded.
    pub fn restore(state: InternerState) -> Result<Self> {
        let InternerState {
            next_id,
            addresses: raw,
        } = state;
        if next_id != raw.len() as u64 {
            return Err(ClusterError::InvalidInternerState(format!(
                "next_id {} does not match {} stored addresses",
                next_id,
                raw.len()
            )));
        }
        if u32::try_from(raw.len()).is_err() {
            return Err(ClusterError::InvalidInternerState(format!(
                "{} addresses exceed the 32-bit id space",
                raw.len()
            )));
        }

        let mut interner = Self::with_capacity(raw.len());
        for address in raw {
            let expected = interner.addresses.len() as u32;
            let id = interner.intern(&address)?;
            if id.0 != expected {
                return Err(ClusterError::InvalidInternerState(format!(
                    "address {:?} stored twice (ids {} and {})",
                    address, id.0, expected
                )));
            }
        }
        Ok(interner)
    }
}

/// Borrowed view of the interner used when writing checkpoints.
#[derive(Debug, Serialize)]
pub struct InternerSnapshot<'a> {
    pub next_id: u64,
    pub addresses: &'a [Box<str>],
}

/// Owned interner state decoded from a checkpoint.
///
/// Shares its wire shape with [`InternerSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternerState {
    pub next_id: u64,
    pub addresses: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_assigns_dense_ids_in_first_seen_order() {
        let mut interner = AddressInterner::new();
        assert_eq!(interner.intern("bc1qa").unwrap(), AddressId(0));
        assert_eq!(interner.intern("bc1qb").unwrap(), AddressId(1));
        assert_eq!(interner.intern("bc1qa").unwrap(), AddressId(0));
        assert_eq!(interner.intern("bc1qc").unwrap(), AddressId(2));
        assert_eq!(interner.size(), 3);
    }

    #[test]
    fn test_get_and_resolve() {
        let mut interner = AddressInterner::new();
        let id = interner.intern("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").unwrap();
        assert_eq!(interner.get("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"), Some(id));
        assert_eq!(interner.get("missing"), None);
        assert_eq!(
            interner.resolve(id),
            Some("1BoatSLRHtKNngkdXEeobR76b53LETtpyT")
        );
        assert_eq!(interner.resolve(AddressId(5)), None);
    }

    #[test]
    fn test_many_addresses_survive_table_growth() {
        let mut interner = AddressInterner::with_capacity(4);
        for i in 0..10_000 {
            let id = interner.intern(&format!("addr-{i}")).unwrap();
            assert_eq!(id, AddressId(i));
        }
        for i in (0..10_000).rev() {
            assert_eq!(interner.get(&format!("addr-{i}")), Some(AddressId(i)));
        }
        assert_eq!(interner.size(), 10_000);
    }

    #[test]
    fn test_snapshot_restore_keeps_ids() {
        let mut interner = AddressInterner::new();
        for address in ["a", "b", "c"] {
            interner.intern(address).unwrap();
        }
        let bytes = bincode::serialize(&interner.snapshot()).unwrap();
        let state: InternerState = bincode::deserialize(&bytes).unwrap();
        assert_eq!(state.next_id, 3);

        let mut restored = AddressInterner::restore(state).unwrap();
        assert_eq!(restored.size(), 3);
        assert_eq!(restored.intern("b").unwrap(), AddressId(1));
        assert_eq!(restored.intern("d").unwrap(), AddressId(3));
    }

    #[test]
    fn test_restore_rejects_counter_mismatch() {
        let state = InternerState {
            next_id: 5,
            addresses: vec!["a".into(), "b".into()],
        };
        let err = AddressInterner::restore(state).unwrap_err();
        assert!(matches!(err, ClusterError::InvalidInternerState(_)));
    }

    #[test]
    fn test_restore_rejects_duplicates() {
        let state = InternerState {
            next_id: 3,
            addresses: vec!["a".into(), "b".into(), "a".into()],
        };
        let err = AddressInterner::restore(state).unwrap_err();
        assert!(matches!(err, ClusterError::InvalidInternerState(_)));
    }

    #[test]
    fn test_iter_in_id_order() {
        let mut interner = AddressInterner::new();
        interner.intern("x").unwrap();
        interner.intern("y").unwrap();
        let pairs: Vec<_> = interner.iter().collect();
        assert_eq!(pairs, vec![(AddressId(0), "x"), (AddressId(1), "y")]);
        assert!(interner.approx_memory_bytes() >= 2);
    }
}
