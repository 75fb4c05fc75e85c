//! Default constants for addrcluster configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Input Defaults
// =============================================================================

/// Directory scanned for edge files
pub const DEFAULT_INPUT_DIR: &str = "edges";

/// Column holding the first endpoint of an edge
pub const DEFAULT_ADDRESS_COLUMN_1: &str = "address1";

/// Column holding the second endpoint of an edge
pub const DEFAULT_ADDRESS_COLUMN_2: &str = "address2";

/// Field separator for delimited text edge files
pub const DEFAULT_DELIMITER: char = ',';

// =============================================================================
// Reader Defaults
// =============================================================================

/// Rows per batch for chunked files.
/// Peak reader memory is proportional to this, not to file size.
pub const DEFAULT_BATCH_ROWS: usize = 1_000_000;

/// Files below this size (64MB) are loaded as a single batch.
pub const DEFAULT_WHOLE_FILE_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

// =============================================================================
// Forest Defaults
// =============================================================================

/// Spare forest slots allocated past the interned address count.
/// Never unioned; kept small since every slot costs five bytes.
pub const DEFAULT_CAPACITY_RESERVE: usize = 1_024;

// =============================================================================
// Checkpoint and Output Defaults
// =============================================================================

/// Directory holding one checkpoint file per phase
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// SQLite database holding the `address_clusters` relation
pub const DEFAULT_OUTPUT_DATABASE: &str = "clusters.sqlite";
