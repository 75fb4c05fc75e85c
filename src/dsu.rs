//! # Disjoint Set Forest
//!
//! Array-backed union-find over dense [`AddressId`]s with two-pass path
//! compression and union by rank.
//!
//! Capacity is fixed at construction. At billions of elements a resize would
//! copy tens of gigabytes, so the caller sizes the forest from the interner
//! before the first union.

use crate::error::{ClusterError, Result};
use crate::model::AddressId;
use serde::{Deserialize, Serialize};

/// Largest capacity a 32-bit ID space can index.
pub const MAX_CAPACITY: usize = u32::MAX as usize + 1;

/// Union by rank over at most 2^32 slots never reaches this rank.
const RANK_LIMIT: u8 = 32;

/// Union-find over `0..capacity`.
///
/// Invariant: `parent[i] < capacity` for every `i`, and `parent` is acyclic
/// apart from the self-loops that mark roots.
#[derive(Debug, Clone)]
pub struct DisjointForest {
    parent: Vec<u32>,
    /// Upper bound on subtree height. Union by rank keeps it below 33, so a byte is enough.
    rank: Vec<u8>,
}

impl DisjointForest {
    /// Allocate a forest of `capacity` singleton sets.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity > MAX_CAPACITY {
            return Err(ClusterError::CapacityTooLarge {
                requested: capacity,
            });
        }
        Ok(Self {
            parent: (0..capacity).map(|i| i as u32).collect(),
            rank: vec![0; capacity],
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.parent.len()
    }

    #[inline]
    fn check_bounds(&self, id: AddressId) -> Result<()> {
        if id.index() < self.parent.len() {
            Ok(())
        } else {
            Err(ClusterError::IdOutOfRange {
                id: id.0,
                capacity: self.parent.len(),
            })
        }
    }

    /// Root of `x`'s component, re-pointing every node on the path at the root.
    ///
    /// # Panics
    ///
    /// Panics if `x` is not below [`capacity`](Self::capacity). Use
    /// [`union`](Self::union) or [`same_cluster`](Self::same_cluster) for
    /// bounds-checked access.
    pub fn find(&mut self, x: AddressId) -> AddressId {
        let mut root = x.0;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }

        let mut node = x.0;
        while node != root {
            let next = self.parent[node as usize];
            self.parent[node as usize] = root;
            node = next;
        }
        AddressId(root)
    }

    /// Merge the components of `x` and `y`.
    ///
    /// Returns `false` when they were already connected, which is the common
    /// case for duplicate and self-pair edges. Otherwise the lower-rank root is
    /// attached under the higher-rank root; on a tie `y`'s root goes under
    /// `x`'s root and `x`'s root gains a rank.
    pub fn union(&mut self, x: AddressId, y: AddressId) -> Result<bool> {
        self.check_bounds(x)?;
        self.check_bounds(y)?;

        let rx = self.find(x).index();
        let ry = self.find(y).index();
        if rx == ry {
            return Ok(false);
        }

        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry as u32,
            std::cmp::Ordering::Greater => self.parent[ry] = rx as u32,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx as u32;
                self.rank[rx] += 1;
            }
        }
        Ok(true)
    }

    /// Union every pair in `pairs`, returning how many merged two components.
    pub fn union_batch(&mut self, pairs: &[(AddressId, AddressId)]) -> Result<u64> {
        let mut merged = 0u64;
        for &(x, y) in pairs {
            if self.union(x, y)? {
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Bounds-checked connectivity test.
    pub fn same_cluster(&mut self, x: AddressId, y: AddressId) -> Result<bool> {
        self.check_bounds(x)?;
        self.check_bounds(y)?;
        Ok(self.find(x) == self.find(y))
    }

    /// Number of roots among the first `up_to` slots.
    ///
    /// Pass the interned address count, not the capacity: unused reserve slots
    /// are roots too and would be counted as singleton clusters.
    pub fn root_count(&self, up_to: usize) -> usize {
        let end = up_to.min(self.parent.len());
        self.parent[..end]
            .iter()
            .enumerate()
            .filter(|&(i, &p)| p as usize == i)
            .count()
    }

    /// Direct parent pointer of `x`.
    pub fn parent_of(&self, x: AddressId) -> Option<AddressId> {
        self.parent.get(x.index()).map(|&p| AddressId(p))
    }

    pub fn rank_of(&self, x: AddressId) -> Option<u8> {
        self.rank.get(x.index()).copied()
    }

    /// Bytes held by the parent and rank arrays.
    pub fn memory_footprint(&self) -> usize {
        self.parent.len() * (std::mem::size_of::<u32>() + std::mem::size_of::<u8>())
    }

    /// Borrow the first `len` slots for serialization.
    pub fn snapshot(&self, len: usize) -> Result<ForestSnapshot<'_>> {
        if len > self.parent.len() {
            return Err(ClusterError::InvalidForestState(format!(
                "snapshot length {} exceeds capacity {}",
                len,
                self.parent.len()
            )));
        }
        Ok(ForestSnapshot {
            parent: &self.parent[..len],
            rank: &self.rank[..len],
        })
    }

    /// Rebuild a forest of `capacity` slots from a sliced snapshot.
    ///
    /// Slots past the snapshot length start as fresh singletons. Every
    /// non-root must have a strictly lower rank than its parent; that rules
    /// out cycles, so `find` on the restored forest always terminates.
    pub fn restore(state: ForestState, capacity: usize) -> Result<Self> {
        let ForestState { parent, rank } = state;
        let len = parent.len();
        if rank.len() != len {
            return Err(ClusterError::InvalidForestState(format!(
                "parent has {} slots but rank has {}",
                len,
                rank.len()
            )));
        }
        if len > capacity {
            return Err(ClusterError::InvalidForestState(format!(
                "state holds {len} slots but capacity is {capacity}"
            )));
        }
        if let Some((i, &p)) = parent.iter().enumerate().find(|&(_, &p)| p as usize >= len) {
            return Err(ClusterError::InvalidForestState(format!(
                "slot {i} points at {p}, outside the {len} stored slots"
            )));
        }

        if let Some((i, &r)) = rank.iter().enumerate().find(|&(_, &r)| r >= RANK_LIMIT) {
            return Err(ClusterError::InvalidForestState(format!(
                "slot {i} has rank {r}, limit is {RANK_LIMIT}"
            )));
        }
        for (i, &p) in parent.iter().enumerate() {
            let p = p as usize;
            if p != i && rank[p] <= rank[i] {
                return Err(ClusterError::InvalidForestState(format!(
                    "slot {i} (rank {}) has parent {p} of rank {}; ranks must rise towards the root",
                    rank[i], rank[p]
                )));
            }
        }

        let mut forest = Self::new(capacity)?;
        forest.parent[..len].copy_from_slice(&parent);
        forest.rank[..len].copy_from_slice(&rank);
        Ok(forest)
    }
}

/// Borrowed view of the live forest prefix.
#[derive(Debug, Serialize)]
pub struct ForestSnapshot<'a> {
    pub parent: &'a [u32],
    pub rank: &'a [u8],
}

/// Owned forest prefix decoded from a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestState {
    pub parent: Vec<u32>,
    pub rank: Vec<u8>,
}

impl ForestState {
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}
