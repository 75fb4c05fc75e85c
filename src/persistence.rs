//! # Checkpoints
//!
//! One checkpoint file per phase, replaced atomically after each fully
//! consumed input file.
//!
//! File layout: a fixed header (magic, format version, phase tag, payload
//! length, all little-endian, then the BLAKE3 digest of the payload) followed
//! by a bincode payload. Anything that does not match the header exactly,
//! fails the digest, or fails to decode, is reported as absent so the phase
//! restarts from scratch.

use crate::dsu::{DisjointForest, ForestState};
use crate::error::{ClusterError, Result};
use crate::interner::{AddressInterner, InternerState};
use crate::model::{Phase, Progress};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CHECKPOINT_MAGIC: &[u8; 4] = b"ACKP";
const CHECKPOINT_FORMAT_VERSION: u32 = 2;
const DIGEST_LEN: usize = blake3::OUT_LEN;
const HEADER_LEN: u64 = 4 + 4 + 1 + 8 + DIGEST_LEN as u64;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

#[derive(Serialize)]
struct CheckpointRecord<'a, S> {
    progress: Progress,
    processed_files: &'a [String],
    state: S,
}

/// A decoded checkpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint<S> {
    pub progress: Progress,
    /// Names of the input files covered, in processing order.
    pub processed_files: Vec<String>,
    pub state: S,
}

/// Saves and restores per-phase pipeline state under one directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, phase: Phase) -> PathBuf {
        self.dir.join(format!("{}.ckpt", phase.as_str()))
    }

    pub fn exists(&self, phase: Phase) -> bool {
        self.path_for(phase).is_file()
    }

    pub fn save_interner(
        &self,
        progress: &Progress,
        processed_files: &[String],
        interner: &AddressInterner,
    ) -> Result<()> {
        self.save(Phase::Intern, progress, processed_files, interner.snapshot())
    }

    /// Save the first `len` forest slots, `len` being the interned address count.
    pub fn save_forest(
        &self,
        progress: &Progress,
        processed_files: &[String],
        forest: &DisjointForest,
        len: usize,
    ) -> Result<()> {
        self.save(Phase::Cluster, progress, processed_files, forest.snapshot(len)?)
    }

    /// Write a checkpoint to a temporary file, fsync it, then rename it over
    /// the previous one. A crash at any point leaves the last good checkpoint.
    pub fn save<S: Serialize>(
        &self,
        phase: Phase,
        progress: &Progress,
        processed_files: &[String],
        state: S,
    ) -> Result<()> {
        let record = CheckpointRecord {
            progress: *progress,
            processed_files,
            state,
        };
        // First pass only hashes; the digest has to precede the payload.
        let mut hasher = blake3::Hasher::new();
        codec().serialize_into(&mut hasher, &record)?;
        let payload_len = hasher.count();
        let digest = hasher.finalize();

        let path = self.path_for(phase);
        let tmp = path.with_extension("ckpt.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(CHECKPOINT_MAGIC)?;
        writer.write_all(&CHECKPOINT_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&[phase.tag()])?;
        writer.write_all(&payload_len.to_le_bytes())?;
        writer.write_all(digest.as_bytes())?;
        codec().serialize_into(&mut writer, &record)?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        sync_dir(&self.dir);
        debug!(
            phase = %phase,
            files = progress.files_processed,
            bytes = payload_len + HEADER_LEN,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the phase-1 checkpoint if it covers a prefix of `input_files`.
    pub fn load_interner(&self, input_files: &[String]) -> Option<Checkpoint<InternerState>> {
        self.load(Phase::Intern, input_files)
    }

    /// Load the phase-2 checkpoint if it covers a prefix of `input_files` and
    /// was taken against an interner of exactly `interned` addresses.
    pub fn load_forest(
        &self,
        input_files: &[String],
        interned: usize,
    ) -> Option<Checkpoint<ForestState>> {
        let checkpoint: Checkpoint<ForestState> = self.load(Phase::Cluster, input_files)?;
        if checkpoint.state.len() != interned {
            warn!(
                checkpoint_addresses = checkpoint.state.len(),
                interned,
                "forest checkpoint was taken against a different interner, ignoring it"
            );
            return None;
        }
        Some(checkpoint)
    }

    /// Load a checkpoint, treating anything unusable as absent.
    pub fn load<S: DeserializeOwned>(
        &self,
        phase: Phase,
        input_files: &[String],
    ) -> Option<Checkpoint<S>> {
        let path = self.path_for(phase);
        let checkpoint: Checkpoint<S> = match self.read(phase, &path) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return None,
            Err(err) => {
                warn!(phase = %phase, error = %err, "discarding unreadable checkpoint");
                return None;
            }
        };

        let covered = checkpoint.processed_files.len();
        if covered > input_files.len() || input_files[..covered] != checkpoint.processed_files[..] {
            warn!(
                phase = %phase,
                covered,
                inputs = input_files.len(),
                "checkpoint does not match the current input files, ignoring it"
            );
            return None;
        }
        Some(checkpoint)
    }

    fn read<S: DeserializeOwned>(&self, phase: Phase, path: &Path) -> Result<Option<Checkpoint<S>>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file_len = file.metadata()?.len();
        let corrupt = |reason: String| ClusterError::CorruptCheckpoint {
            path: path.to_path_buf(),
            reason,
        };
        if file_len < HEADER_LEN {
            return Err(corrupt(format!("{file_len} bytes is shorter than the header")));
        }

        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER_LEN as usize];
        reader.read_exact(&mut header)?;
        if &header[0..4] != CHECKPOINT_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != CHECKPOINT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {version}, expected {CHECKPOINT_FORMAT_VERSION}"
            )));
        }
        if header[8] != phase.tag() {
            return Err(corrupt(format!("written by another phase (tag {})", header[8])));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[9..17]);
        let payload_len = u64::from_le_bytes(len_bytes);
        if HEADER_LEN.checked_add(payload_len) != Some(file_len) {
            return Err(corrupt(format!(
                "payload length {payload_len} disagrees with file length {file_len}"
            )));
        }

        let mut stored = [0u8; DIGEST_LEN];
        stored.copy_from_slice(&header[17..]);
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut (&mut reader).take(payload_len), &mut hasher)?;
        if hasher.finalize() != blake3::Hash::from(stored) {
            return Err(corrupt("payload digest mismatch".to_string()));
        }
        reader.seek(SeekFrom::Start(HEADER_LEN))?;

        let checkpoint: Checkpoint<S> = codec()
            .with_limit(payload_len)
            .deserialize_from(&mut reader)?;
        if checkpoint.progress.files_processed != checkpoint.processed_files.len() {
            return Err(corrupt(format!(
                "progress says {} files but {} are recorded",
                checkpoint.progress.files_processed,
                checkpoint.processed_files.len()
            )));
        }
        Ok(Some(checkpoint))
    }

    /// Remove one phase's checkpoint. Missing files are not an error.
    pub fn clear(&self, phase: Phase) -> Result<()> {
        match fs::remove_file(self.path_for(phase)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn clear_all(&self) -> Result<()> {
        self.clear(Phase::Intern)?;
        self.clear(Phase::Cluster)
    }
}

// Persists the rename itself. Directories cannot be opened on every platform,
// in which case the rename is still atomic, just not yet durable.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddressId;
    use tempfile::tempdir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    fn sample_interner() -> AddressInterner {
        let mut interner = AddressInterner::new();
        for address in ["a", "b", "c", "d"] {
            interner.intern(address).unwrap();
        }
        interner
    }

    fn progress(files: usize) -> Progress {
        Progress {
            files_processed: files,
            pairs_processed: 10,
            unions_performed: 3,
        }
    }

    #[test]
    fn test_interner_round_trip() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let interner = sample_interner();
        let processed = names(&["000.csv"]);
        manager
            .save_interner(&progress(1), &processed, &interner)
            .unwrap();

        let inputs = names(&["000.csv", "001.csv"]);
        let checkpoint = manager.load_interner(&inputs).unwrap();
        assert_eq!(checkpoint.progress, progress(1));
        assert_eq!(checkpoint.processed_files, processed);
        let restored = AddressInterner::restore(checkpoint.state).unwrap();
        assert_eq!(restored.get("c"), Some(AddressId(2)));
        assert!(!manager.path_for(Phase::Intern).with_extension("ckpt.tmp").exists());
    }

    #[test]
    fn test_forest_round_trip_and_size_guard() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut forest = DisjointForest::new(10).unwrap();
        forest.union(AddressId(0), AddressId(3)).unwrap();
        let processed = names(&["000.csv"]);
        manager
            .save_forest(&progress(1), &processed, &forest, 4)
            .unwrap();

        let checkpoint = manager.load_forest(&processed, 4).unwrap();
        let mut restored = DisjointForest::restore(checkpoint.state, 10).unwrap();
        assert!(restored.same_cluster(AddressId(0), AddressId(3)).unwrap());

        assert!(manager.load_forest(&processed, 5).is_none());
    }

    #[test]
    fn test_missing_checkpoint_is_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nested")).unwrap();
        assert!(manager.load_interner(&names(&["000.csv"])).is_none());
        assert!(!manager.exists(Phase::Intern));
    }

    #[test]
    fn test_truncated_checkpoint_is_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        manager
            .save_interner(&progress(1), &processed, &sample_interner())
            .unwrap();

        let path = manager.path_for(Phase::Intern);
        let len = fs::metadata(&path).unwrap().len();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        assert!(manager.load_interner(&processed).is_none());
    }

    #[test]
    fn test_garbage_and_wrong_version_are_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        let path = manager.path_for(Phase::Intern);

        fs::write(&path, b"definitely not a checkpoint").unwrap();
        assert!(manager.load_interner(&processed).is_none());

        manager
            .save_interner(&progress(1), &processed, &sample_interner())
            .unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[4] = 99;
        fs::write(&path, bytes).unwrap();
        assert!(manager.load_interner(&processed).is_none());
    }

    fn flip_byte(path: &Path, at: usize) {
        let mut bytes = fs::read(path).unwrap();
        bytes[at] ^= 0x0c;
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_edited_address_fails_digest() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut interner = AddressInterner::new();
        interner.intern("alice").unwrap();
        interner.intern("bob").unwrap();
        let processed = names(&["000.csv"]);
        manager.save_interner(&progress(1), &processed, &interner).unwrap();

        // Still decodes: same length, valid UTF-8, no duplicate.
        let path = manager.path_for(Phase::Intern);
        let bytes = fs::read(&path).unwrap();
        let at = bytes.windows(5).position(|w| w == b"alice").unwrap();
        let mut edited = bytes.clone();
        edited[at] = b'm';
        fs::write(&path, edited).unwrap();

        assert!(manager.load_interner(&processed).is_none());
    }

    #[test]
    fn test_flipped_payload_byte_is_absent_for_each_phase() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        let mut forest = DisjointForest::new(4).unwrap();
        forest.union(AddressId(0), AddressId(1)).unwrap();
        manager
            .save_interner(&progress(1), &processed, &sample_interner())
            .unwrap();
        manager
            .save_forest(&progress(1), &processed, &forest, 4)
            .unwrap();

        for phase in [Phase::Intern, Phase::Cluster] {
            let path = manager.path_for(phase);
            let len = fs::metadata(&path).unwrap().len() as usize;
            flip_byte(&path, len - 1);
        }
        assert!(manager.load_interner(&processed).is_none());
        assert!(manager.load_forest(&processed, 4).is_none());
    }

    #[test]
    fn test_flipped_digest_byte_is_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        manager
            .save_interner(&progress(1), &processed, &sample_interner())
            .unwrap();
        flip_byte(&manager.path_for(Phase::Intern), HEADER_LEN as usize - 1);
        assert!(manager.load_interner(&processed).is_none());
    }

    #[test]
    fn test_checkpoint_from_other_phase_is_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        manager
            .save_interner(&progress(1), &processed, &sample_interner())
            .unwrap();
        fs::copy(
            manager.path_for(Phase::Intern),
            manager.path_for(Phase::Cluster),
        )
        .unwrap();
        assert!(manager.load_forest(&processed, 4).is_none());
    }

    #[test]
    fn test_changed_inputs_invalidate_checkpoint() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        manager
            .save_interner(&progress(2), &names(&["000.csv", "001.csv"]), &sample_interner())
            .unwrap();

        assert!(manager.load_interner(&names(&["000.csv"])).is_none());
        assert!(manager
            .load_interner(&names(&["000.csv", "002.csv"]))
            .is_none());
        assert!(manager
            .load_interner(&names(&["000.csv", "001.csv", "002.csv"]))
            .is_some());
    }

    #[test]
    fn test_inconsistent_progress_is_absent() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let processed = names(&["000.csv"]);
        manager
            .save_interner(&progress(3), &processed, &sample_interner())
            .unwrap();
        assert!(manager.load_interner(&processed).is_none());
    }

    #[test]
    fn test_save_replaces_previous_and_clear_removes() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let inputs = names(&["000.csv", "001.csv"]);
        let mut interner = sample_interner();
        manager
            .save_interner(&progress(1), &inputs[..1], &interner)
            .unwrap();
        interner.intern("e").unwrap();
        manager
            .save_interner(&progress(2), &inputs, &interner)
            .unwrap();

        let checkpoint = manager.load_interner(&inputs).unwrap();
        assert_eq!(checkpoint.progress.files_processed, 2);
        assert_eq!(checkpoint.state.addresses.len(), 5);

        manager.clear_all().unwrap();
        assert!(!manager.exists(Phase::Intern));
        manager.clear_all().unwrap();
    }
}
