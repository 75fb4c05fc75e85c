//! # Core Model
//!
//! Identifier and record types shared by every stage of the clustering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense surrogate key for an address string, assigned in first-seen order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressId(pub u32);

impl AddressId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

impl From<u32> for AddressId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Pipeline phase. Phases run strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Phase 1: assign an [`AddressId`] to every address in the input.
    Intern,
    /// Phase 2: union the endpoints of every edge.
    Cluster,
    /// Phase 3: persist the cluster assignment of every address.
    Write,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Intern => "intern",
            Phase::Cluster => "cluster",
            Phase::Write => "write",
        }
    }

    /// Stable tag used in checkpoint headers.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Phase::Intern => 1,
            Phase::Cluster => 2,
            Phase::Write => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters carried by a checkpoint.
///
/// `files_processed` is a position in the sorted input order: the first
/// `files_processed` files have been fully consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub files_processed: usize,
    pub pairs_processed: u64,
    pub unions_performed: u64,
}

/// One row of the output relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub address: String,
    /// Address string of the cluster representative.
    pub cluster_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ClusterAssignment {
    pub fn new(address: String, cluster_id: String, observed_at: DateTime<Utc>) -> Self {
        Self {
            address,
            cluster_id,
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }

    /// True when the address is its own cluster representative.
    pub fn is_representative(&self) -> bool {
        self.address == self.cluster_id
    }
}
