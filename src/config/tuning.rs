use super::defaults::{DEFAULT_BATCH_ROWS, DEFAULT_WHOLE_FILE_THRESHOLD_BYTES};
use serde::{Deserialize, Serialize};

/// Reader sizing derived from a [`Profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTuning {
    pub batch_rows: usize,
    pub whole_file_threshold_bytes: u64,
}

/// Preset profiles that bundle reader sizing choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    /// Batches of ~1M rows, whole-file loads below 64MB
    #[default]
    Balanced,
    /// Small batches for hosts where the forest already uses most of RAM
    MemorySaver,
    /// Large batches, fewer reader round-trips
    HighThroughput,
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "balanced" => Ok(Profile::Balanced),
            "memory-saver" => Ok(Profile::MemorySaver),
            "high-throughput" => Ok(Profile::HighThroughput),
            other => Err(format!(
                "unknown profile {other:?} (expected balanced, memory-saver or high-throughput)"
            )),
        }
    }
}

impl Default for ReaderTuning {
    fn default() -> Self {
        Self {
            batch_rows: DEFAULT_BATCH_ROWS,
            whole_file_threshold_bytes: DEFAULT_WHOLE_FILE_THRESHOLD_BYTES,
        }
    }
}

impl ReaderTuning {
    pub fn from_profile(profile: Profile) -> Self {
        match profile {
            Profile::Balanced => Self::balanced(),
            Profile::MemorySaver => Self::memory_saver(),
            Profile::HighThroughput => Self::high_throughput(),
        }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    pub fn memory_saver() -> Self {
        Self {
            batch_rows: 100_000,
            whole_file_threshold_bytes: 8 * 1024 * 1024,
        }
    }

    pub fn high_throughput() -> Self {
        Self {
            batch_rows: 4_000_000,
            whole_file_threshold_bytes: 512 * 1024 * 1024,
        }
    }
}
