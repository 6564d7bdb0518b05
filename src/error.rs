//! Error types for the icefall sink writer.
//!
//! The writer is fail-fast: every error here is fatal to the operation
//! that raised it, and recovery happens externally via restart from the
//! last checkpoint followed by [`initialize_state`].
//!
//! [`initialize_state`]: crate::writer::MultiTableSinkWriter::initialize_state

use snafu::prelude::*;

use crate::schema::{BucketKey, TableId};

/// Errors raised while extracting (identity, row) pairs from an input element.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractionError {
    /// Input element could not be decoded.
    #[snafu(display("Malformed input element: {message}"))]
    Malformed { message: String },

    /// Input element has a shape the extractor does not handle.
    #[snafu(display("Unsupported record type: {record_type}"))]
    Unsupported { record_type: String },

    /// Extraction strategy failed with an underlying error.
    #[snafu(display("Extraction failed: {source}"))]
    Extraction {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised while building a writer creator for a table identity.
///
/// Creator construction failures are never cached: the next write that
/// touches the same identity retries construction from scratch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CreatorError {
    /// Table root location could not be resolved.
    #[snafu(display("Failed to resolve location for table {table_id}: {message}"))]
    LocationResolution { table_id: TableId, message: String },

    /// Row comparator construction failed.
    #[snafu(display("Failed to build row comparator for table {table_id}: {message}"))]
    ComparatorBuild { table_id: TableId, message: String },

    /// Bucket writer factory setup failed.
    #[snafu(display("Failed to set up bucket writer for table {table_id}: {message}"))]
    WriterSetup { table_id: TableId, message: String },
}

/// Errors raised inside a bucket operation (write, roll, snapshot, merge).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BucketError {
    /// Part file I/O failed.
    #[snafu(display("Part file I/O failed for {path}: {source}"))]
    PartFileIo {
        path: String,
        source: std::io::Error,
    },

    /// Bucket state could not be serialized.
    #[snafu(display("Failed to serialize bucket state: {source}"))]
    StateSerialize { source: serde_json::Error },

    /// A recovered state was merged into a bucket with a different key.
    #[snafu(display("Cannot merge state for {found} into bucket {expected}"))]
    MergeKeyMismatch {
        expected: BucketKey,
        found: BucketKey,
    },

    /// A recovered state could not be turned back into a live bucket.
    #[snafu(display("Failed to restore bucket {key}: {message}"))]
    Restore { key: BucketKey, message: String },
}

/// Errors raised by the periodic bucket inspection timer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TimerError {
    /// A bucket failed while handling a processing-time tick.
    #[snafu(display("Bucket {key} failed on processing-time tick at {at}: {source}"))]
    BucketTick {
        key: BucketKey,
        at: i64,
        source: BucketError,
    },
}

/// Configuration errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read the config file.
    #[snafu(display("Failed to read config file: {source}"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse config YAML.
    #[snafu(display("Failed to parse config: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Bucket inspection interval must be positive.
    #[snafu(display(
        "Bucket check interval must be positive, got {value} ms"
    ))]
    NonPositiveCheckInterval { value: i64 },
}

/// Top-level writer errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriterError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Extraction error.
    #[snafu(display("Extraction error: {source}"))]
    Extract { source: ExtractionError },

    /// Writer creator construction error.
    #[snafu(display("Writer creation error: {source}"))]
    WriterCreation { source: CreatorError },

    /// Bucket I/O error.
    #[snafu(display("Bucket error: {source}"))]
    Bucket { source: BucketError },

    /// Timer error.
    #[snafu(display("Timer error: {source}"))]
    Timer { source: TimerError },

    /// Host channel closed unexpectedly.
    #[snafu(display("Writer channel closed unexpectedly"))]
    ChannelClosed,
}

impl From<ConfigError> for WriterError {
    fn from(source: ConfigError) -> Self {
        WriterError::Config { source }
    }
}

impl From<ExtractionError> for WriterError {
    fn from(source: ExtractionError) -> Self {
        WriterError::Extract { source }
    }
}

impl From<CreatorError> for WriterError {
    fn from(source: CreatorError) -> Self {
        WriterError::WriterCreation { source }
    }
}

impl From<BucketError> for WriterError {
    fn from(source: BucketError) -> Self {
        WriterError::Bucket { source }
    }
}

impl From<TimerError> for WriterError {
    fn from(source: TimerError) -> Self {
        WriterError::Timer { source }
    }
}
