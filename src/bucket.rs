//! Bucket collaborator contracts and persisted bucket state.
//!
//! A bucket is one open logical partition-writer: it owns at most one
//! in-progress part file plus zero or more finished, not-yet-committed
//! files. The byte-level part writer and its rolling thresholds live
//! behind the [`Bucket`] and [`BucketFactory`] traits; this module owns
//! only the state that crosses checkpoints and the bucket path rule.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::creator::RowComparator;
use crate::error::BucketError;
use crate::schema::{BucketKey, TableId, TableSchemaIdentity};

/// Default schema version for persisted bucket state.
fn default_schema_version() -> u32 {
    1
}

/// Descriptor of one finished file that is ready for external commit.
///
/// Produced by a bucket during commit preparation and consumed exactly
/// once by the downstream checkpoint-commit stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committable {
    /// Table the file belongs to.
    pub table_id: TableId,
    /// Bucket id the file was written under; `""` for the table root.
    pub bucket_id: String,
    /// Full path of the finished file.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Processing time at which the file was finished, epoch millis.
    pub created_at: i64,
}

/// Resumable in-progress part file info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressFileState {
    /// Path of the in-progress part file.
    pub path: String,
    /// Bytes written so far.
    pub size: u64,
    /// Processing time of the last write, epoch millis.
    pub last_update_time: i64,
}

/// Serializable snapshot of one bucket's in-progress and pending files.
///
/// Produced by [`Bucket::snapshot_state`] at checkpoint time and handed
/// back to [`initialize_state`] on recovery. After a rescale, several
/// prior parallel instances may contribute states for the same key;
/// those are merged via [`BucketState::merge`] rather than overwritten.
///
/// [`initialize_state`]: crate::writer::MultiTableSinkWriter::initialize_state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    /// Schema version for forward compatibility.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Table the bucket belongs to.
    pub table_id: TableId,
    /// Bucket id; `""` for the table root.
    pub bucket_id: String,
    /// Resolved bucket path.
    pub bucket_path: String,
    /// In-progress part file to resume, if any.
    #[serde(default)]
    pub in_progress: Option<InProgressFileState>,
    /// Finished files not yet committed downstream.
    #[serde(default)]
    pub pending: Vec<Committable>,
}

impl BucketState {
    /// Create an empty state for a bucket.
    pub fn new(table_id: TableId, bucket_id: impl Into<String>, bucket_path: impl Into<String>) -> Self {
        Self {
            schema_version: default_schema_version(),
            table_id,
            bucket_id: bucket_id.into(),
            bucket_path: bucket_path.into(),
            in_progress: None,
            pending: Vec::new(),
        }
    }

    /// Registry key this state belongs to.
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.table_id.clone(), self.bucket_id.clone())
    }

    /// Merge another state for the same key into this one.
    ///
    /// Both sides' pending files are preserved. Only one in-progress
    /// file can be resumed per bucket, so the incoming in-progress file
    /// is sealed into a pending committable instead of being dropped.
    pub fn merge(&mut self, other: BucketState) -> Result<(), BucketError> {
        let expected = self.key();
        let found = other.key();
        if expected != found {
            return Err(BucketError::MergeKeyMismatch { expected, found });
        }

        debug!(
            bucket = %expected,
            incoming_pending = other.pending.len(),
            incoming_in_progress = other.in_progress.is_some(),
            "Merging recovered bucket state"
        );

        self.pending.extend(other.pending);
        if let Some(in_progress) = other.in_progress {
            self.pending.push(seal_in_progress(
                &other.table_id,
                &other.bucket_id,
                in_progress,
            ));
        }
        Ok(())
    }
}

/// Seal an in-progress part file into a pending committable.
pub fn seal_in_progress(
    table_id: &TableId,
    bucket_id: &str,
    in_progress: InProgressFileState,
) -> Committable {
    Committable {
        table_id: table_id.clone(),
        bucket_id: bucket_id.to_string(),
        path: in_progress.path,
        size: in_progress.size,
        created_at: in_progress.last_update_time,
    }
}

/// Compose the path of a bucket under its table root.
///
/// An empty bucket id resolves to the root itself; anything else becomes
/// a sub-path segment. This is the only path format the writer owns.
pub fn assemble_bucket_path(root: &str, bucket_id: &str) -> String {
    if bucket_id.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), bucket_id)
    }
}

/// One open logical partition-writer.
///
/// All operations are invoked on the writer's single cooperative
/// processing thread; any error is fatal to the whole writer.
///
/// Implementations must uphold the eviction contract: a bucket that
/// reports `is_active() == false` holds no pending committable work at
/// that moment. The writer evicts inactive buckets during commit
/// preparation without harvesting them, so violating this contract is a
/// silent data-loss bug.
pub trait Bucket<R>: Send {
    /// Registry key of this bucket.
    fn key(&self) -> &BucketKey;

    /// Buffer one row, opening a part file if none is in progress.
    fn write(&mut self, row: R, processing_time: i64) -> Result<(), BucketError>;

    /// Whether this bucket still holds in-progress or pending output.
    fn is_active(&self) -> bool;

    /// Harvest finished files; `flush` forces the in-progress file closed.
    fn prepare_commit(&mut self, flush: bool) -> Result<Vec<Committable>, BucketError>;

    /// Snapshot the bucket's recoverable state.
    fn snapshot_state(&self) -> Result<BucketState, BucketError>;

    /// Merge a recovered state for the same key into this bucket.
    fn merge(&mut self, other: BucketState) -> Result<(), BucketError>;

    /// Evaluate the rolling policy against the wall clock.
    fn on_processing_time(&mut self, now: i64) -> Result<(), BucketError>;

    /// Release the in-progress part file without committing it.
    fn dispose_part_file(&mut self);
}

/// Creates and restores buckets.
///
/// `create` is reached through a table's [`WriterCreator`] on the first
/// write to a new key; `restore` turns a recovered [`BucketState`] back
/// into a live bucket during state initialization, before any creator
/// for its table exists.
///
/// [`WriterCreator`]: crate::creator::WriterCreator
pub trait BucketFactory<R>: Send + Sync {
    /// Create a fresh bucket at the given path.
    fn create(
        &self,
        identity: Arc<TableSchemaIdentity>,
        bucket_id: &str,
        bucket_path: &str,
        comparator: Option<RowComparator<R>>,
    ) -> Result<Box<dyn Bucket<R>>, BucketError>;

    /// Restore a bucket from a recovered state.
    fn restore(&self, state: BucketState) -> Result<Box<dyn Bucket<R>>, BucketError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(
        bucket_id: &str,
        pending_paths: &[&str],
        in_progress: Option<&str>,
    ) -> BucketState {
        let table_id = TableId::new("db", "orders");
        let mut state = BucketState::new(table_id.clone(), bucket_id, "/lake/orders");
        state.pending = pending_paths
            .iter()
            .map(|p| Committable {
                table_id: table_id.clone(),
                bucket_id: bucket_id.to_string(),
                path: p.to_string(),
                size: 100,
                created_at: 1,
            })
            .collect();
        state.in_progress = in_progress.map(|p| InProgressFileState {
            path: p.to_string(),
            size: 42,
            last_update_time: 7,
        });
        state
    }

    #[test]
    fn test_assemble_bucket_path_root() {
        assert_eq!(assemble_bucket_path("/lake/T1", ""), "/lake/T1");
    }

    #[test]
    fn test_assemble_bucket_path_partition() {
        assert_eq!(
            assemble_bucket_path("/lake/T1", "dt=2024-01-01"),
            "/lake/T1/dt=2024-01-01"
        );
    }

    #[test]
    fn test_assemble_bucket_path_trailing_slash() {
        assert_eq!(
            assemble_bucket_path("s3://lake/T1/", "dt=2024-01-01"),
            "s3://lake/T1/dt=2024-01-01"
        );
    }

    #[test]
    fn test_merge_preserves_both_pending_sides() {
        let mut left = state_with("a", &["part-0", "part-1"], None);
        let right = state_with("a", &["part-2"], None);

        left.merge(right).unwrap();

        let paths: Vec<&str> = left.pending.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["part-0", "part-1", "part-2"]);
        assert!(left.in_progress.is_none());
    }

    #[test]
    fn test_merge_seals_incoming_in_progress_file() {
        let mut left = state_with("a", &[], Some("part-left"));
        let right = state_with("a", &["part-2"], Some("part-right"));

        left.merge(right).unwrap();

        // Our own in-progress file is still resumable.
        assert_eq!(left.in_progress.as_ref().unwrap().path, "part-left");
        // The incoming one became pending, nothing dropped.
        let paths: Vec<&str> = left.pending.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["part-2", "part-right"]);
        assert_eq!(left.pending[1].size, 42);
    }

    #[test]
    fn test_merge_rejects_mismatched_key() {
        let mut left = state_with("a", &[], None);
        let right = state_with("b", &[], None);

        let err = left.merge(right).unwrap_err();
        assert!(matches!(err, BucketError::MergeKeyMismatch { .. }));
    }

    #[test]
    fn test_bucket_state_serde_roundtrip() {
        let state = state_with("dt=2024-01-01", &["part-0"], Some("part-1"));
        let json = serde_json::to_string(&state).unwrap();
        let restored: BucketState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn test_bucket_state_deserializes_without_optional_fields() {
        let json = r#"{
            "table_id": {"database": "db", "table": "orders"},
            "bucket_id": "",
            "bucket_path": "/lake/orders"
        }"#;
        let state: BucketState = serde_json::from_str(json).unwrap();
        assert_eq!(state.schema_version, 1);
        assert!(state.in_progress.is_none());
        assert!(state.pending.is_empty());
    }
}
