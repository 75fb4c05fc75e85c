//! # Clustering Pipeline
//!
//! Drives the three phases strictly in order:
//!
//! 1. **Intern**: every address in every input file gets an [`AddressId`].
//! 2. **Cluster**: the forest, sized from the finished interner, unions the
//!    endpoints of every edge.
//! 3. **Write**: each address and its cluster label replace the output relation.
//!
//! Files are processed one at a time in sorted order, and a checkpoint is
//! written after each one. A restarted run resumes each phase after the last
//! checkpointed file; unusable checkpoints restart that phase from the first
//! file.

use crate::config::ClusterConfig;
use crate::dsu::{DisjointForest, MAX_CAPACITY};
use crate::error::ClusterError;
use crate::interner::AddressInterner;
use crate::model::{AddressId, Phase, Progress};
use crate::persistence::CheckpointManager;
use crate::reader::{discover_edge_files, PairStreamReader};
use crate::writer::{ClusterSink, ClusterWriter};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Counters for one phase of one run.
#[derive(Debug, Clone, Default)]
pub struct PhaseStats {
    /// Files skipped because a checkpoint already covered them.
    pub files_resumed: usize,
    /// Files read by this run.
    pub files_read: usize,
    /// Cumulative progress, including work restored from a checkpoint.
    pub progress: Progress,
    /// Pairs read by this run.
    pub pairs_read: u64,
    /// Rows dropped for a null or empty address.
    pub skipped_rows: u64,
    pub elapsed: Duration,
}

impl PhaseStats {
    pub fn pairs_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.pairs_read as f64 / secs
        } else {
            0.0
        }
    }

    fn log_completion(&self, phase: Phase) {
        info!(
            phase = %phase,
            files = self.progress.files_processed,
            files_resumed = self.files_resumed,
            pairs = self.progress.pairs_processed,
            unions = self.progress.unions_performed,
            skipped = self.skipped_rows,
            elapsed_ms = self.elapsed.as_millis() as u64,
            pairs_per_sec = self.pairs_per_sec() as u64,
            "phase complete"
        );
    }
}

/// Outcome of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub files: usize,
    pub addresses: usize,
    pub clusters: usize,
    pub intern_pairs: u64,
    pub cluster_pairs: u64,
    pub unions: u64,
    pub skipped_rows: u64,
    pub rows_written: u64,
    pub forest_bytes: usize,
    pub interner_bytes: usize,
    pub elapsed_ms: u64,
    pub observed_at: DateTime<Utc>,
}

/// Owns the reader and checkpoint manager for a run; the interner and forest
/// are created by the phases and handed from one to the next.
pub struct ClusterPipeline {
    config: ClusterConfig,
    reader: PairStreamReader,
    checkpoints: CheckpointManager,
}

impl ClusterPipeline {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let checkpoints = CheckpointManager::new(&config.checkpoint.dir).with_context(|| {
            format!(
                "creating checkpoint directory {}",
                config.checkpoint.dir.display()
            )
        })?;
        let reader = PairStreamReader::new(config.reader_options());
        Ok(Self {
            config,
            reader,
            checkpoints,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Edge files under the configured input directory, in processing order.
    pub fn discover_inputs(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.input.dir;
        discover_edge_files(dir, self.config.input.format)
            .with_context(|| format!("listing edge files in {}", dir.display()))
    }

    /// Run all three phases and replace the contents of `sink`.
    pub fn run(&self, sink: &mut dyn ClusterSink) -> Result<PipelineSummary> {
        let started = Instant::now();
        let observed_at = Utc::now();

        let files = self.discover_inputs()?;
        if files.is_empty() {
            bail!(
                "no edge files found in {}",
                self.config.input.dir.display()
            );
        }
        info!(files = files.len(), dir = %self.config.input.dir.display(), "starting clustering run");

        let (interner, intern_stats) = self.intern_phase(&files)?;
        let (mut forest, cluster_stats) = self.cluster_phase(&files, &interner)?;
        let rows_written = self.write_phase(&mut forest, &interner, sink, observed_at)?;

        if self.config.checkpoint.clear_on_success {
            self.checkpoints
                .clear_all()
                .context("removing checkpoints after a successful run")?;
            debug!(dir = %self.checkpoints.dir().display(), "checkpoints cleared");
        }

        let summary = PipelineSummary {
            files: files.len(),
            addresses: interner.size(),
            clusters: forest.root_count(interner.size()),
            intern_pairs: intern_stats.progress.pairs_processed,
            cluster_pairs: cluster_stats.progress.pairs_processed,
            unions: cluster_stats.progress.unions_performed,
            skipped_rows: intern_stats.skipped_rows + cluster_stats.skipped_rows,
            rows_written,
            forest_bytes: forest.memory_footprint(),
            interner_bytes: interner.approx_memory_bytes(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            observed_at,
        };
        info!(
            addresses = summary.addresses,
            clusters = summary.clusters,
            forest_bytes = summary.forest_bytes,
            interner_bytes = summary.interner_bytes,
            rows = summary.rows_written,
            elapsed_ms = summary.elapsed_ms,
            "clustering run complete"
        );
        Ok(summary)
    }

    /// Phase 1: intern every address, resuming from the interner checkpoint.
    #[instrument(skip(self, files), fields(files = files.len()), level = "debug")]
    pub fn intern_phase(&self, files: &[PathBuf]) -> Result<(AddressInterner, PhaseStats)> {
        let started = Instant::now();
        let names = file_names(files);
        let mut stats = PhaseStats::default();

        let mut interner = match self.checkpoints.load_interner(&names) {
            Some(checkpoint) => match AddressInterner::restore(checkpoint.state) {
                Ok(interner) => {
                    stats.progress = checkpoint.progress;
                    stats.files_resumed = checkpoint.progress.files_processed;
                    info!(
                        files = stats.files_resumed,
                        addresses = interner.size(),
                        "resuming intern phase from checkpoint"
                    );
                    interner
                }
                Err(err) => {
                    warn!(error = %err, "interner checkpoint rejected, restarting intern phase");
                    AddressInterner::new()
                }
            },
            None => AddressInterner::new(),
        };

        for (index, path) in files.iter().enumerate().skip(stats.files_resumed) {
            let mut file_pairs = 0u64;
            let batches = self
                .reader
                .stream(path)
                .with_context(|| format!("opening {}", path.display()))?;
            for batch in batches {
                let batch = batch.with_context(|| format!("reading {}", path.display()))?;
                for (a, b) in &batch {
                    interner.intern(a)?;
                    interner.intern(b)?;
                }
                file_pairs += batch.len() as u64;
                stats.skipped_rows += batch.skipped();
                debug!(file = %path.display(), pairs = batch.len(), addresses = interner.size(), "batch interned");
            }

            stats.files_read += 1;
            stats.pairs_read += file_pairs;
            stats.progress.files_processed = index + 1;
            stats.progress.pairs_processed += file_pairs;
            self.checkpoints
                .save_interner(&stats.progress, &names[..=index], &interner)
                .context("saving interner checkpoint")?;
            info!(
                file = %path.display(),
                index,
                pairs = file_pairs,
                addresses = interner.size(),
                "file interned"
            );
        }

        stats.elapsed = started.elapsed();
        stats.log_completion(Phase::Intern);
        Ok((interner, stats))
    }

    /// Phase 2: union every edge, resuming from the forest checkpoint when it
    /// was taken against this exact interner.
    #[instrument(skip(self, files, interner), fields(files = files.len(), addresses = interner.size()), level = "debug")]
    pub fn cluster_phase(
        &self,
        files: &[PathBuf],
        interner: &AddressInterner,
    ) -> Result<(DisjointForest, PhaseStats)> {
        let started = Instant::now();
        let names = file_names(files);
        let capacity = forest_capacity(interner.size(), self.config.forest.capacity_reserve);
        let mut stats = PhaseStats::default();

        let restored = self
            .checkpoints
            .load_forest(&names, interner.size())
            .and_then(|checkpoint| {
                match DisjointForest::restore(checkpoint.state, capacity) {
                    Ok(forest) => Some((forest, checkpoint.progress)),
                    Err(err) => {
                        warn!(error = %err, "forest checkpoint rejected, restarting cluster phase");
                        None
                    }
                }
            });
        let mut forest = match restored {
            Some((forest, progress)) => {
                stats.progress = progress;
                stats.files_resumed = progress.files_processed;
                info!(
                    files = stats.files_resumed,
                    unions = progress.unions_performed,
                    "resuming cluster phase from checkpoint"
                );
                forest
            }
            None => DisjointForest::new(capacity)?,
        };
        debug!(capacity, bytes = forest.memory_footprint(), "forest allocated");

        let mut ids: Vec<(AddressId, AddressId)> = Vec::new();
        for (index, path) in files.iter().enumerate().skip(stats.files_resumed) {
            let mut file_pairs = 0u64;
            let mut file_unions = 0u64;
            let batches = self
                .reader
                .stream(path)
                .with_context(|| format!("opening {}", path.display()))?;
            for batch in batches {
                let batch = batch.with_context(|| format!("reading {}", path.display()))?;
                ids.clear();
                ids.reserve(batch.len());
                for (a, b) in &batch {
                    ids.push((lookup(interner, a)?, lookup(interner, b)?));
                }
                file_unions += forest.union_batch(&ids)?;
                file_pairs += batch.len() as u64;
                stats.skipped_rows += batch.skipped();
            }

            stats.files_read += 1;
            stats.pairs_read += file_pairs;
            stats.progress.files_processed = index + 1;
            stats.progress.pairs_processed += file_pairs;
            stats.progress.unions_performed += file_unions;
            self.checkpoints
                .save_forest(&stats.progress, &names[..=index], &forest, interner.size())
                .context("saving forest checkpoint")?;
            info!(
                file = %path.display(),
                index,
                pairs = file_pairs,
                unions = file_unions,
                "file clustered"
            );
        }

        stats.elapsed = started.elapsed();
        stats.log_completion(Phase::Cluster);
        Ok((forest, stats))
    }

    /// Phase 3: replace the output relation with one row per interned address.
    #[instrument(skip(self, forest, interner, sink), fields(addresses = interner.size()), level = "debug")]
    pub fn write_phase(
        &self,
        forest: &mut DisjointForest,
        interner: &AddressInterner,
        sink: &mut dyn ClusterSink,
        observed_at: DateTime<Utc>,
    ) -> Result<u64> {
        let started = Instant::now();
        let writer = ClusterWriter::new(self.config.output.label_policy, observed_at);
        let rows = writer
            .compute_and_write(forest, interner, sink)
            .context("writing cluster assignments")?;
        info!(
            phase = %Phase::Write,
            rows,
            policy = writer.label_policy().as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "phase complete"
        );
        Ok(rows)
    }
}

fn lookup(interner: &AddressInterner, address: &str) -> Result<AddressId, ClusterError> {
    interner
        .get(address)
        .ok_or_else(|| ClusterError::UnknownAddress {
            address: address.to_string(),
        })
}

/// Checkpoint identity of each input: its file name.
// The reserve is headroom only; it never pushes past the ID space.
fn forest_capacity(interned: usize, reserve: usize) -> usize {
    interned.saturating_add(reserve).min(MAX_CAPACITY)
}

fn file_names(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect()
}
