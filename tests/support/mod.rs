use std::path::{Path, PathBuf};

use addrcluster::config::{CheckpointConfig, InputConfig, OutputConfig};
use addrcluster::{AddressInterner, ClusterConfig, DisjointForest, LabelPolicy};

/// Config rooted in `root`: edges in `root/edges`, checkpoints in `root/checkpoints`.
#[allow(dead_code)]
pub fn config_in(root: &Path, label_policy: LabelPolicy) -> ClusterConfig {
    ClusterConfig {
        input: InputConfig {
            dir: root.join("edges"),
            ..InputConfig::default()
        },
        checkpoint: CheckpointConfig {
            dir: root.join("checkpoints"),
            clear_on_success: false,
        },
        output: OutputConfig {
            database: root.join("clusters.sqlite"),
            label_policy,
        },
        ..ClusterConfig::default()
    }
}

#[allow(dead_code)]
pub fn edges_dir(root: &Path) -> std::io::Result<PathBuf> {
    let dir = root.join("edges");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Intern and union `edges` in order, the way the pipeline does for one file.
#[allow(dead_code)]
pub fn cluster_edges(edges: &[(&str, &str)]) -> anyhow::Result<(AddressInterner, DisjointForest)> {
    let mut interner = AddressInterner::new();
    let mut ids = Vec::with_capacity(edges.len());
    for (a, b) in edges {
        ids.push((interner.intern(a)?, interner.intern(b)?));
    }
    let mut forest = DisjointForest::new(interner.size() + 8)?;
    forest.union_batch(&ids)?;
    Ok((interner, forest))
}
