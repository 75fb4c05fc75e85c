//! Fixture writers and seeded edge generators shared by unit tests,
//! integration tests and benches.

use crate::error::Result;
use crate::model::ClusterAssignment;
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write `edges` as a delimited text file with an `address1,address2` header.
/// `.tsv` names are tab separated.
pub fn write_edge_csv<A, B>(dir: &Path, name: &str, edges: &[(A, B)]) -> Result<PathBuf>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let path = dir.join(name);
    let delimiter = if name.ends_with(".tsv") { '\t' } else { ',' };
    let mut out = BufWriter::new(File::create(&path)?);
    writeln!(out, "address1{delimiter}address2")?;
    for (a, b) in edges {
        writeln!(out, "{}{delimiter}{}", a.as_ref(), b.as_ref())?;
    }
    out.flush()?;
    Ok(path)
}

/// Write `edges` as a Parquet file with nullable Utf8 `address1`/`address2` columns.
pub fn write_edge_parquet<A, B>(dir: &Path, name: &str, edges: &[(A, B)]) -> Result<PathBuf>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let left: Vec<Option<&str>> = edges.iter().map(|(a, _)| Some(a.as_ref())).collect();
    let right: Vec<Option<&str>> = edges.iter().map(|(_, b)| Some(b.as_ref())).collect();
    write_parquet_columns(dir, name, left, right)
}

/// Parquet writer taking raw optional columns, for null-handling fixtures.
pub fn write_parquet_columns(
    dir: &Path,
    name: &str,
    left: Vec<Option<&str>>,
    right: Vec<Option<&str>>,
) -> Result<PathBuf> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("address1", DataType::Utf8, true),
        Field::new("address2", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(left)) as ArrayRef,
            Arc::new(StringArray::from(right)) as ArrayRef,
        ],
    )?;

    let path = dir.join(name);
    let mut writer = ArrowWriter::try_new(File::create(&path)?, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(path)
}

/// Split `edges` into `files` CSV files named `000.csv`, `001.csv`, ... in order.
pub fn write_edge_files(
    dir: &Path,
    edges: &[(String, String)],
    files: usize,
) -> Result<Vec<PathBuf>> {
    let files = files.max(1);
    let per_file = edges.len().div_ceil(files).max(1);
    let mut paths = Vec::with_capacity(files);
    for index in 0..files {
        let start = (index * per_file).min(edges.len());
        let end = ((index + 1) * per_file).min(edges.len());
        paths.push(write_edge_csv(
            dir,
            &format!("{index:03}.csv"),
            &edges[start..end],
        )?);
    }
    Ok(paths)
}

pub fn address(i: usize) -> String {
    format!("addr{i:08}")
}

/// `pairs` edges over disjoint address pairs: `(addr 2i, addr 2i+1)`.
pub fn disjoint_pairs(pairs: usize) -> Vec<(String, String)> {
    (0..pairs)
        .map(|i| (address(2 * i), address(2 * i + 1)))
        .collect()
}

/// Seeded random edges over `addresses` distinct addresses. Includes the
/// occasional self pair and duplicate, like real transaction-derived edges.
pub fn random_edges(addresses: usize, edges: usize, seed: u64) -> Vec<(String, String)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let addresses = addresses.max(1);
    (0..edges)
        .map(|_| {
            let a = rng.random_range(0..addresses);
            let b = if rng.random_bool(0.05) {
                a
            } else {
                rng.random_range(0..addresses)
            };
            (address(a), address(b))
        })
        .collect()
}

/// Output rows as a partition: the set of member sets, ignoring labels.
pub fn partition(rows: &[ClusterAssignment]) -> BTreeSet<BTreeSet<String>> {
    let mut clusters: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for row in rows {
        clusters
            .entry(row.cluster_id.as_str())
            .or_default()
            .insert(row.address.clone());
    }
    clusters.into_values().collect()
}
