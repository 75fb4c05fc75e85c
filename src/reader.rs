//! # Pair Stream Reader
//!
//! Reads `(address1, address2)` edge files in bounded-memory batches.
//!
//! Files under the whole-file threshold come back as a single batch; larger
//! files are cut into batches of at most `batch_rows` rows so peak memory stays
//! flat regardless of file size. A file can only be re-read from the start.
//!
//! Any parse failure ends the stream: the error is yielded once and the
//! iterator is fused afterwards. There is no fallback parser, since re-reading
//! through a different path after some batches were emitted would feed the
//! same edges to the forest twice.

use crate::error::{ClusterError, Result};
use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk layout of edge files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Pick per file from the extension.
    #[default]
    Auto,
    Parquet,
    /// Delimited text, one edge per line.
    Csv,
}

impl InputFormat {
    /// Concrete format for `path`, or `None` when the file is not an edge file.
    pub fn resolve(self, path: &Path) -> Option<InputFormat> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let detected = match ext.as_deref() {
            Some("parquet") | Some("pq") => InputFormat::Parquet,
            Some("csv") | Some("tsv") | Some("txt") => InputFormat::Csv,
            _ => return None,
        };
        match self {
            InputFormat::Auto => Some(detected),
            explicit if explicit == detected => Some(explicit),
            _ => None,
        }
    }
}

/// Reader settings, usually derived from [`crate::config::ClusterConfig`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub format: InputFormat,
    /// Upper bound on rows per emitted batch for chunked files.
    pub batch_rows: usize,
    /// Files smaller than this many bytes are read as one batch.
    pub whole_file_threshold_bytes: u64,
    /// Column names holding the two endpoints (Parquet) or the header to skip (text).
    pub address_columns: [String; 2],
    /// Field separator for text files; `.tsv` files always use a tab.
    pub delimiter: char,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            format: InputFormat::Auto,
            batch_rows: crate::config::DEFAULT_BATCH_ROWS,
            whole_file_threshold_bytes: crate::config::DEFAULT_WHOLE_FILE_THRESHOLD_BYTES,
            address_columns: [
                crate::config::DEFAULT_ADDRESS_COLUMN_1.to_string(),
                crate::config::DEFAULT_ADDRESS_COLUMN_2.to_string(),
            ],
            delimiter: crate::config::DEFAULT_DELIMITER,
        }
    }
}

/// List edge files in `dir` in lexicographic file-name order.
///
/// This order is the total order checkpoint progress refers to.
pub fn discover_edge_files(dir: &Path, format: InputFormat) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(true, |name| name.starts_with('.'));
        if hidden || format.resolve(&path).is_none() {
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Streams edge files as batches of address pairs.
#[derive(Debug, Clone, Default)]
pub struct PairStreamReader {
    options: ReaderOptions,
}

impl PairStreamReader {
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Open `path` and return a lazy sequence of batches.
    pub fn stream(&self, path: &Path) -> Result<PairBatches> {
        let format =
            self.options
                .format
                .resolve(path)
                .ok_or_else(|| ClusterError::UnsupportedInput {
                    path: path.to_path_buf(),
                    reason: format!("not a {:?} edge file", self.options.format),
                })?;
        let file_len = fs::metadata(path)?.len();
        let whole_file = file_len < self.options.whole_file_threshold_bytes;
        let batch_rows = self.options.batch_rows.max(1);

        let source = match format {
            InputFormat::Parquet => {
                BatchSource::Parquet(self.open_parquet(path, whole_file, batch_rows)?)
            }
            _ => {
                let delimiter = if has_extension(path, "tsv") {
                    '\t'
                } else {
                    self.options.delimiter
                };
                BatchSource::Text(TextChunks {
                    reader: BufReader::new(File::open(path)?),
                    delimiter,
                    batch_rows: if whole_file { usize::MAX } else { batch_rows },
                    header: self.options.address_columns.clone(),
                    line_no: 0,
                    line: String::new(),
                })
            }
        };

        debug!(
            path = %path.display(),
            bytes = file_len,
            whole_file,
            "opened edge file"
        );
        Ok(PairBatches {
            path: path.to_path_buf(),
            source,
            finished: false,
            batches_emitted: 0,
        })
    }

    fn open_parquet(&self, path: &Path, whole_file: bool, batch_rows: usize) -> Result<ParquetSource> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
        let mut indices = Vec::with_capacity(2);
        for name in &self.options.address_columns {
            let index = builder
                .schema()
                .index_of(name)
                .map_err(|_| ClusterError::UnsupportedInput {
                    path: path.to_path_buf(),
                    reason: format!("missing column {name:?}"),
                })?;
            indices.push(index);
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        let batch_size = if whole_file {
            usize::try_from(builder.metadata().file_metadata().num_rows())
                .unwrap_or(batch_rows)
                .max(1)
        } else {
            batch_rows
        };
        let reader = builder
            .with_projection(mask)
            .with_batch_size(batch_size)
            .build()?;
        Ok(ParquetSource {
            reader,
            columns: self.options.address_columns.clone(),
        })
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

/// Lazy batch sequence for one file.
pub struct PairBatches {
    path: PathBuf,
    source: BatchSource,
    finished: bool,
    batches_emitted: usize,
}

impl PairBatches {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn batches_emitted(&self) -> usize {
        self.batches_emitted
    }
}

impl Iterator for PairBatches {
    type Item = Result<PairBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let next = match &mut self.source {
            BatchSource::Parquet(source) => source.next_batch(&self.path),
            BatchSource::Text(source) => source.next_batch(&self.path),
        };
        match next {
            Some(Ok(batch)) => {
                self.batches_emitted += 1;
                Some(Ok(batch))
            }
            Some(Err(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

enum BatchSource {
    Parquet(ParquetSource),
    Text(TextChunks),
}

struct ParquetSource {
    reader: ParquetRecordBatchReader,
    columns: [String; 2],
}

impl ParquetSource {
    fn next_batch(&mut self, path: &Path) -> Option<Result<PairBatch>> {
        let batch = match self.reader.next()? {
            Ok(batch) => batch,
            Err(err) => return Some(Err(err.into())),
        };
        Some(self.convert(&batch, path))
    }

    fn convert(&self, batch: &RecordBatch, path: &Path) -> Result<PairBatch> {
        let left = string_column(batch, &self.columns[0], path)?;
        let right = string_column(batch, &self.columns[1], path)?;
        let skipped = (0..left.len())
            .filter(|&i| {
                left.is_null(i)
                    || right.is_null(i)
                    || left.value(i).is_empty()
                    || right.value(i).is_empty()
            })
            .count() as u64;
        Ok(PairBatch {
            rows: BatchRows::Arrow { left, right },
            skipped,
        })
    }
}

fn string_column(batch: &RecordBatch, name: &str, path: &Path) -> Result<StringArray> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| ClusterError::UnsupportedInput {
            path: path.to_path_buf(),
            reason: format!("batch is missing column {name:?}"),
        })?;
    let column: ArrayRef = if column.data_type() == &DataType::Utf8 {
        column.clone()
    } else {
        arrow::compute::cast(column, &DataType::Utf8)?
    };
    column
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| ClusterError::UnsupportedInput {
            path: path.to_path_buf(),
            reason: format!("column {name:?} is not a string column"),
        })
}

struct TextChunks {
    reader: BufReader<File>,
    delimiter: char,
    batch_rows: usize,
    header: [String; 2],
    line_no: u64,
    line: String,
}

impl TextChunks {
    fn next_batch(&mut self, path: &Path) -> Option<Result<PairBatch>> {
        let mut pairs = Vec::new();
        let mut skipped = 0u64;
        while pairs.len() < self.batch_rows {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
            self.line_no += 1;
            let line = self.line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split(self.delimiter).map(str::trim);
            let (Some(first), Some(second), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Some(Err(ClusterError::Parse {
                    path: path.to_path_buf(),
                    line: self.line_no,
                    message: format!(
                        "expected 2 fields separated by {:?}",
                        self.delimiter
                    ),
                }));
            };
            if self.line_no == 1
                && first.eq_ignore_ascii_case(&self.header[0])
                && second.eq_ignore_ascii_case(&self.header[1])
            {
                continue;
            }
            if first.is_empty() || second.is_empty() {
                skipped += 1;
                continue;
            }
            pairs.push((first.to_string(), second.to_string()));
        }

        if pairs.is_empty() && skipped == 0 {
            return None;
        }
        Some(Ok(PairBatch {
            rows: BatchRows::Owned(pairs),
            skipped,
        }))
    }
}

/// One batch of address pairs.
pub struct PairBatch {
    rows: BatchRows,
    skipped: u64,
}

enum BatchRows {
    Arrow {
        left: StringArray,
        right: StringArray,
    },
    Owned(Vec<(String, String)>),
}

impl PairBatch {
    /// Number of usable pairs.
    pub fn len(&self) -> usize {
        match &self.rows {
            BatchRows::Arrow { left, .. } => left.len() - self.skipped as usize,
            BatchRows::Owned(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows dropped for a null or empty endpoint.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn iter(&self) -> PairIter<'_> {
        PairIter {
            rows: &self.rows,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &'a PairBatch {
    type Item = (&'a str, &'a str);
    type IntoIter = PairIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Borrowing iterator over the usable pairs of a batch.
pub struct PairIter<'a> {
    rows: &'a BatchRows,
    index: usize,
}

impl<'a> Iterator for PairIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows {
            BatchRows::Owned(pairs) => {
                let (a, b) = pairs.get(self.index)?;
                self.index += 1;
                Some((a.as_str(), b.as_str()))
            }
            BatchRows::Arrow { left, right } => loop {
                if self.index >= left.len() {
                    return None;
                }
                let i = self.index;
                self.index += 1;
                if left.is_null(i) || right.is_null(i) {
                    continue;
                }
                let (a, b) = (left.value(i), right.value(i));
                if a.is_empty() || b.is_empty() {
                    continue;
                }
                return Some((a, b));
            },
        }
    }
}
