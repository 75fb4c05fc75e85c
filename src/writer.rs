//! # Cluster Writer
//!
//! Phase 3: resolves every interned address to its cluster label and streams
//! the rows into a [`ClusterSink`], which replaces the previous result as a
//! single unit.

use crate::dsu::DisjointForest;
use crate::error::{ClusterError, Result};
use crate::interner::AddressInterner;
use crate::model::{AddressId, ClusterAssignment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which member's address labels a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelPolicy {
    /// The address of the component's root. Membership is order independent
    /// but the label can change when the same edges arrive in another order.
    #[default]
    Root,
    /// The lexicographically smallest member address. Stable across input
    /// orders at the cost of one extra pass and four bytes per address.
    SmallestAddress,
}

impl LabelPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelPolicy::Root => "root",
            LabelPolicy::SmallestAddress => "smallest-address",
        }
    }
}

impl std::str::FromStr for LabelPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "root" => Ok(LabelPolicy::Root),
            "smallest-address" => Ok(LabelPolicy::SmallestAddress),
            other => Err(format!(
                "unknown label policy {other:?} (expected root or smallest-address)"
            )),
        }
    }
}

/// Destination for the output relation.
///
/// `replace_all` must be all-or-nothing: if the row stream yields an error, or
/// the sink fails part way, the previously stored rows stay visible and
/// unchanged.
pub trait ClusterSink {
    /// Replace the stored relation with `rows`, returning how many were written.
    fn replace_all(
        &mut self,
        rows: &mut dyn Iterator<Item = Result<ClusterAssignment>>,
    ) -> Result<u64>;
}

impl ClusterSink for Vec<ClusterAssignment> {
    fn replace_all(
        &mut self,
        rows: &mut dyn Iterator<Item = Result<ClusterAssignment>>,
    ) -> Result<u64> {
        let fresh = rows.collect::<Result<Vec<_>>>()?;
        *self = fresh;
        Ok(self.len() as u64)
    }
}

/// Computes cluster assignments from a finished forest.
#[derive(Debug, Clone)]
pub struct ClusterWriter {
    label_policy: LabelPolicy,
    observed_at: DateTime<Utc>,
}

impl ClusterWriter {
    /// `observed_at` stamps every row of this run.
    pub fn new(label_policy: LabelPolicy, observed_at: DateTime<Utc>) -> Self {
        Self {
            label_policy,
            observed_at,
        }
    }

    pub fn label_policy(&self) -> LabelPolicy {
        self.label_policy
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Emit one row per interned address into `sink`.
    ///
    /// Compresses every path in the forest as a side effect.
    pub fn compute_and_write(
        &self,
        forest: &mut DisjointForest,
        interner: &AddressInterner,
        sink: &mut dyn ClusterSink,
    ) -> Result<u64> {
        let size = interner.size();
        if forest.capacity() < size {
            return Err(ClusterError::IdOutOfRange {
                id: (size - 1) as u32,
                capacity: forest.capacity(),
            });
        }

        let labels = match self.label_policy {
            LabelPolicy::Root => None,
            LabelPolicy::SmallestAddress => Some(smallest_member_labels(forest, interner)?),
        };

        let mut rows = AssignmentRows {
            forest,
            interner,
            labels,
            observed_at: self.observed_at,
            next: 0,
            size,
        };
        let written = sink.replace_all(&mut rows)?;
        debug!(rows = written, policy = self.label_policy.as_str(), "cluster rows written");
        Ok(written)
    }
}

// labels[root] = id of the smallest member address; only root slots are meaningful.
fn smallest_member_labels(
    forest: &mut DisjointForest,
    interner: &AddressInterner,
) -> Result<Vec<u32>> {
    let size = interner.size();
    let mut labels: Vec<u32> = (0..size).map(|i| i as u32).collect();
    for (id, address) in interner.iter() {
        let root = forest.find(id).index();
        let current = resolve(interner, AddressId(labels[root]))?;
        if address < current {
            labels[root] = id.0;
        }
    }
    Ok(labels)
}

fn resolve(interner: &AddressInterner, id: AddressId) -> Result<&str> {
    interner.resolve(id).ok_or_else(|| {
        ClusterError::InvalidInternerState(format!("no address recorded for {id}"))
    })
}

struct AssignmentRows<'a> {
    forest: &'a mut DisjointForest,
    interner: &'a AddressInterner,
    labels: Option<Vec<u32>>,
    observed_at: DateTime<Utc>,
    next: usize,
    size: usize,
}

impl AssignmentRows<'_> {
    fn row(&mut self, id: AddressId) -> Result<ClusterAssignment> {
        let root = self.forest.find(id);
        let label = match &self.labels {
            Some(labels) => AddressId(labels[root.index()]),
            None => root,
        };
        let address = resolve(self.interner, id)?;
        let cluster_id = resolve(self.interner, label)?;
        Ok(ClusterAssignment::new(
            address.to_string(),
            cluster_id.to_string(),
            self.observed_at,
        ))
    }
}

impl Iterator for AssignmentRows<'_> {
    type Item = Result<ClusterAssignment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.size {
            return None;
        }
        let id = AddressId(self.next as u32);
        self.next += 1;
        Some(self.row(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.size - self.next;
        (remaining, Some(remaining))
    }
}
