//! Unified configuration for the clustering pipeline.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (addrcluster.toml)
//! ```toml
//! profile = "memory-saver"
//!
//! [input]
//! dir = "/data/edges"
//! format = "parquet"
//!
//! [checkpoint]
//! dir = "/data/checkpoints"
//!
//! [output]
//! database = "/data/clusters.sqlite"
//! label_policy = "smallest-address"
//! ```
//!
//! Environment variables use the `ADDRCLUSTER_` prefix with `__` between
//! nesting levels, e.g. `ADDRCLUSTER_READER__BATCH_ROWS=250000`.

mod defaults;
mod tuning;

pub use defaults::*;
pub use tuning::*;

use crate::reader::{InputFormat, ReaderOptions};
use crate::writer::LabelPolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a clustering run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Reader sizing profile
    pub profile: Profile,
    pub input: InputConfig,
    /// Explicit reader sizes; each overrides the profile when set
    pub reader: ReaderOverrides,
    pub forest: ForestConfig,
    pub checkpoint: CheckpointConfig,
    pub output: OutputConfig,
}

impl ClusterConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(ClusterConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with ADDRCLUSTER_ prefix
        figment = figment.merge(Env::prefixed("ADDRCLUSTER_").split("__"));

        // Layer 3: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Profile sizing with any explicit reader overrides applied.
    pub fn reader_tuning(&self) -> ReaderTuning {
        let base = ReaderTuning::from_profile(self.profile);
        ReaderTuning {
            batch_rows: self.reader.batch_rows.unwrap_or(base.batch_rows),
            whole_file_threshold_bytes: self
                .reader
                .whole_file_threshold_bytes
                .unwrap_or(base.whole_file_threshold_bytes),
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        let tuning = self.reader_tuning();
        ReaderOptions {
            format: self.input.format,
            batch_rows: tuning.batch_rows,
            whole_file_threshold_bytes: tuning.whole_file_threshold_bytes,
            address_columns: self.input.address_columns.clone(),
            delimiter: self.input.delimiter,
        }
    }
}

/// Where edge files come from and how they are laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory scanned for edge files
    pub dir: PathBuf,
    pub format: InputFormat,
    /// Names of the two endpoint columns
    pub address_columns: [String; 2],
    /// Separator for delimited text files
    pub delimiter: char,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_INPUT_DIR),
            format: InputFormat::Auto,
            address_columns: [
                DEFAULT_ADDRESS_COLUMN_1.to_string(),
                DEFAULT_ADDRESS_COLUMN_2.to_string(),
            ],
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whole_file_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Spare slots past the interned address count
    pub capacity_reserve: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            capacity_reserve: DEFAULT_CAPACITY_RESERVE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding the per-phase checkpoint files
    pub dir: PathBuf,
    /// Remove checkpoints once the output table has been written
    pub clear_on_success: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            clear_on_success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// SQLite database receiving the `address_clusters` relation
    pub database: PathBuf,
    pub label_policy: LabelPolicy,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_OUTPUT_DATABASE),
            label_policy: LabelPolicy::Root,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear_on_success: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_policy: Option<LabelPolicy>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
