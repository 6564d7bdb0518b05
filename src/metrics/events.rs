//! Internal events for icefall metrics emission.
//!
//! Each event struct represents a measurable occurrence in the writer.
//! Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric. Metrics carry a `target` label so
//! multiple writer instances in one process stay distinguishable.

use metrics::{counter, gauge};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when extracted rows are forwarded into buckets.
///
/// Backs the writer's single monotonically increasing emitted-row
/// counter: incremented once per extracted row, not once per input
/// record.
pub struct RowsEmitted {
    pub count: u64,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for RowsEmitted {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows emitted");
        counter!("icefall_rows_emitted_total", "target" => self.target).increment(self.count);
    }
}

/// Event emitted when a bucket is opened for a new (table, bucket) key.
pub struct BucketOpened {
    pub table: String,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for BucketOpened {
    fn emit(self) {
        trace!(table = %self.table, target = %self.target, "Bucket opened");
        counter!("icefall_buckets_opened_total", "table" => self.table, "target" => self.target)
            .increment(1);
    }
}

/// Event emitted when inactive buckets are pruned during commit
/// preparation.
pub struct BucketsPruned {
    pub count: u64,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for BucketsPruned {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Buckets pruned");
        counter!("icefall_buckets_pruned_total", "target" => self.target).increment(self.count);
    }
}

/// Event emitted when committables are harvested at a checkpoint.
pub struct CommittablesPrepared {
    pub count: u64,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for CommittablesPrepared {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Committables prepared");
        counter!("icefall_committables_prepared_total", "target" => self.target)
            .increment(self.count);
    }
}

/// Event emitted when bucket states are restored from a checkpoint.
pub struct BucketsRestored {
    pub count: u64,
    /// How many of the restored states merged into existing entries.
    pub merged: u64,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for BucketsRestored {
    fn emit(self) {
        trace!(
            count = self.count,
            merged = self.merged,
            target = %self.target,
            "Buckets restored"
        );
        counter!("icefall_buckets_restored_total", "target" => self.target.clone())
            .increment(self.count);
        counter!("icefall_bucket_states_merged_total", "target" => self.target)
            .increment(self.merged);
    }
}

/// Event tracking the current number of live buckets in the registry.
pub struct ActiveBuckets {
    pub count: u64,
    /// Target label identifying the writer instance.
    pub target: String,
}

impl InternalEvent for ActiveBuckets {
    fn emit(self) {
        gauge!("icefall_active_buckets", "target" => self.target).set(self.count as f64);
    }
}
