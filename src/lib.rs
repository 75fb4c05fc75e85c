//! # Addrcluster
//!
//! Groups blockchain addresses into ownership clusters from address-pair edges.
//!
//! The engine interns address strings into dense 32-bit IDs, runs a
//! union-find forest over them and writes one `(address, cluster_id,
//! first_seen, last_seen)` row per address. Each phase checkpoints after every
//! input file, so a crashed run loses at most one file of work.

pub mod config;
pub mod dsu;
pub mod error;
pub mod interner;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod reader;
pub mod store;
pub mod test_support;
pub mod writer;

// Re-export main types for convenience
pub use config::{ClusterConfig, ConfigOverrides, Profile};
pub use dsu::DisjointForest;
pub use error::{ClusterError, Result};
pub use interner::AddressInterner;
pub use model::{AddressId, ClusterAssignment, Phase, Progress};
pub use persistence::{Checkpoint, CheckpointManager};
pub use pipeline::{ClusterPipeline, PhaseStats, PipelineSummary};
pub use reader::{discover_edge_files, InputFormat, PairBatch, PairStreamReader, ReaderOptions};
pub use store::SqliteClusterStore;
pub use writer::{ClusterSink, ClusterWriter, LabelPolicy};
