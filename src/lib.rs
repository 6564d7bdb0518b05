//! icefall: a multi-table bucketed sink writer with checkpointed
//! recovery.
//!
//! One writer instance routes rows extracted from heterogeneous input
//! records into per-table, per-partition buckets, coordinates their
//! rolling and commit with an external checkpoint protocol, and merges
//! redundant recovered state after a parallelism rescale.
//!
//! - `schema` - table identities and bucket keys
//! - `context` - per-record bucketing context
//! - `bucket` - bucket collaborator contracts and persisted state
//! - `creator` - per-table writer creators and the identity-keyed cache
//! - `extract` - injected row-extraction strategies
//! - `time` - processing-time service contract
//! - `writer` - the bucket orchestrator
//! - `pipeline` - tokio adapter driving a writer on one task
//! - `config` - writer configuration
//! - `metrics` - Prometheus metric events
//! - `error` - error types
//! - `testing` - in-memory collaborators for tests

pub mod bucket;
pub mod config;
pub mod context;
pub mod creator;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod testing;
pub mod time;
pub mod writer;

// Re-export commonly used items
pub use bucket::{
    assemble_bucket_path, Bucket, BucketFactory, BucketState, Committable, InProgressFileState,
};
pub use config::WriterConfig;
pub use context::BucketContext;
pub use creator::{BucketAssigner, CreatorCache, RowComparator, WriterCreator, WriterCreatorFactory};
pub use error::{
    BucketError, ConfigError, CreatorError, ExtractionError, TimerError, WriterError,
};
pub use extract::{ExtractedRow, RowExtractor};
pub use pipeline::{CheckpointOutcome, WriterMessage, WriterPipeline};
pub use schema::{BucketKey, TableId, TableSchemaIdentity};
pub use time::{ProcessingTimeService, SystemTimeService};
pub use writer::{MultiTableSinkWriter, WriteContext};
