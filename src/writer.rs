//! Multi-table sink writer: the bucket orchestrator.
//!
//! A single writer instance multiplexes an unbounded, runtime-discovered
//! set of table identities onto a registry keyed by (table id, bucket
//! id). Rows flow record -> extraction -> creator resolution -> bucket
//! assignment -> bucket buffering; checkpoints flow prune -> harvest ->
//! snapshot. All operations are serialized by the host on one
//! cooperative processing thread and are never reentrant.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::bucket::{Bucket, BucketFactory, BucketState, Committable};
use crate::config::WriterConfig;
use crate::context::BucketContext;
use crate::creator::{CreatorCache, WriterCreator, WriterCreatorFactory};
use crate::emit;
use crate::error::{TimerError, WriterError};
use crate::extract::RowExtractor;
use crate::metrics::events::{
    ActiveBuckets, BucketOpened, BucketsPruned, BucketsRestored, CommittablesPrepared, RowsEmitted,
};
use crate::schema::BucketKey;
use crate::time::ProcessingTimeService;

/// Per-element context supplied by the host with each write.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext {
    /// Event timestamp of the element, if it has one.
    pub timestamp: Option<i64>,
    /// Watermark at the time of the write, epoch millis.
    pub watermark: i64,
}

/// Orchestrates per-table, per-partition buckets and their checkpoint
/// lifecycle.
///
/// `In` is the host's element type; `R` is the row type produced by the
/// extraction strategy and consumed by buckets.
pub struct MultiTableSinkWriter<In, R> {
    target: String,
    subtask_id: u32,
    extractor: Box<dyn RowExtractor<In, R>>,
    creators: CreatorCache<R>,
    /// Restores recovered states into live buckets; creation of fresh
    /// buckets goes through the per-table creator instead.
    restore_factory: Arc<dyn BucketFactory<R>>,
    active_buckets: HashMap<BucketKey, Box<dyn Bucket<R>>>,
    context: BucketContext,
    time_service: Box<dyn ProcessingTimeService>,
    bucket_check_interval_ms: i64,
    rows_emitted: u64,
    closed: bool,
}

impl<In, R> MultiTableSinkWriter<In, R> {
    /// Create a writer with an empty registry.
    pub fn new(
        config: WriterConfig,
        target: impl Into<String>,
        extractor: Box<dyn RowExtractor<In, R>>,
        creator_factory: Arc<dyn WriterCreatorFactory<R>>,
        restore_factory: Arc<dyn BucketFactory<R>>,
        time_service: Box<dyn ProcessingTimeService>,
    ) -> Result<Self, WriterError> {
        config.validate()?;

        let target = target.into();
        info!(
            target = %target,
            subtask_id = config.subtask_id,
            bucket_check_interval_ms = config.bucket_check_interval_ms,
            "Sink writer created"
        );

        Ok(Self {
            target,
            subtask_id: config.subtask_id,
            extractor,
            creators: CreatorCache::new(creator_factory),
            restore_factory,
            active_buckets: HashMap::new(),
            context: BucketContext::new(),
            time_service,
            bucket_check_interval_ms: config.bucket_check_interval_ms,
            rows_emitted: 0,
            closed: false,
        })
    }

    /// Route one element's extracted rows into their buckets.
    pub fn write(&mut self, element: &In, ctx: &WriteContext) -> Result<(), WriterError> {
        let now = self.time_service.current_processing_time();
        self.context.update(ctx.timestamp, ctx.watermark, now);

        let rows = self.extractor.extract(element)?;

        for (identity, row) in rows {
            let creator = self.creators.resolve(&identity)?;
            let bucket_id = creator.assigner.bucket_id(&row, &self.context);
            let bucket = self.get_or_create_bucket(bucket_id, &creator)?;
            bucket.write(row, now)?;

            self.rows_emitted += 1;
            emit!(RowsEmitted {
                count: 1,
                target: self.target.clone(),
            });
        }

        Ok(())
    }

    /// Resolve the live bucket for (table id, bucket id), opening one on
    /// first use of the key.
    fn get_or_create_bucket(
        &mut self,
        bucket_id: String,
        creator: &Arc<WriterCreator<R>>,
    ) -> Result<&mut Box<dyn Bucket<R>>, WriterError> {
        let key = BucketKey::new(creator.identity.table_id.clone(), bucket_id);
        match self.active_buckets.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let bucket = creator.create_bucket(&entry.key().bucket_id)?;
                debug!(
                    target = %self.target,
                    bucket = %entry.key(),
                    subtask_id = self.subtask_id,
                    "Opened bucket"
                );
                emit!(BucketOpened {
                    table: creator.identity.table_id.to_string(),
                    target: self.target.clone(),
                });
                Ok(entry.insert(bucket))
            }
        }
    }

    /// Prune inactive buckets, then harvest committables from the rest.
    ///
    /// Activeness is checked right before harvesting so buckets rolled
    /// on checkpoint are not torn down and re-created on every write. A
    /// bucket that reports active is never evicted in the same pass,
    /// even if it yields nothing this round.
    pub fn prepare_commit(&mut self, flush: bool) -> Result<Vec<Committable>, WriterError> {
        let mut committables = Vec::new();
        let mut inactive = Vec::new();

        for (key, bucket) in self.active_buckets.iter_mut() {
            if !bucket.is_active() {
                inactive.push(key.clone());
            } else {
                committables.extend(bucket.prepare_commit(flush)?);
            }
        }

        for key in &inactive {
            debug!(target = %self.target, bucket = %key, "Pruned inactive bucket");
            self.active_buckets.remove(key);
        }

        if !inactive.is_empty() {
            emit!(BucketsPruned {
                count: inactive.len() as u64,
                target: self.target.clone(),
            });
        }
        emit!(CommittablesPrepared {
            count: committables.len() as u64,
            target: self.target.clone(),
        });
        emit!(ActiveBuckets {
            count: self.active_buckets.len() as u64,
            target: self.target.clone(),
        });

        Ok(committables)
    }

    /// Snapshot every live bucket, one state per registry entry.
    ///
    /// Intended to run after [`prepare_commit`] in the standard
    /// checkpoint sequence. No cross-bucket ordering is guaranteed.
    ///
    /// [`prepare_commit`]: Self::prepare_commit
    pub fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Vec<BucketState>, WriterError> {
        let mut states = Vec::with_capacity(self.active_buckets.len());
        for bucket in self.active_buckets.values() {
            states.push(bucket.snapshot_state()?);
        }

        debug!(
            target = %self.target,
            checkpoint_id,
            buckets = states.len(),
            "Snapshotted bucket states"
        );
        Ok(states)
    }

    /// Restore recovered bucket states and arm the inspection timer.
    ///
    /// After a rescale, states from several prior parallel instances may
    /// land on one key; those merge into a single entry so neither
    /// side's pending or in-progress output is lost.
    pub fn initialize_state(&mut self, states: Vec<BucketState>) -> Result<(), WriterError> {
        let count = states.len() as u64;
        let mut merged = 0u64;

        for state in states {
            debug!(target = %self.target, bucket = %state.key(), "Restoring bucket state");
            match self.active_buckets.entry(state.key()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().merge(state)?;
                    merged += 1;
                }
                Entry::Vacant(entry) => {
                    entry.insert(self.restore_factory.restore(state)?);
                }
            }
        }

        if count > 0 {
            info!(
                target = %self.target,
                restored = count,
                merged,
                buckets = self.active_buckets.len(),
                "Initialized writer state from checkpoint"
            );
            emit!(BucketsRestored {
                count,
                merged,
                target: self.target.clone(),
            });
        }

        self.register_next_inspection();
        Ok(())
    }

    /// Deliver a processing-time tick to every bucket, then re-arm.
    ///
    /// Each bucket evaluates its rolling policy independent of new
    /// writes; an error from any bucket is fatal and propagates. After
    /// [`close`] a late tick is a no-op and the timer is not re-armed.
    ///
    /// [`close`]: Self::close
    pub fn on_processing_time(&mut self, time: i64) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }

        for (key, bucket) in self.active_buckets.iter_mut() {
            bucket
                .on_processing_time(time)
                .map_err(|source| TimerError::BucketTick {
                    key: key.clone(),
                    at: time,
                    source,
                })?;
        }

        self.register_next_inspection();
        Ok(())
    }

    /// Release every bucket's in-progress file without committing it.
    ///
    /// Idempotent; a second call finds an empty registry and does
    /// nothing.
    pub fn close(&mut self) {
        if !self.active_buckets.is_empty() {
            debug!(
                target = %self.target,
                buckets = self.active_buckets.len(),
                "Closing writer, disposing in-progress part files"
            );
            for bucket in self.active_buckets.values_mut() {
                bucket.dispose_part_file();
            }
            self.active_buckets.clear();
        }
        self.closed = true;
    }

    fn register_next_inspection(&mut self) {
        let next = self.time_service.current_processing_time() + self.bucket_check_interval_ms;
        self.time_service.register_timer(next);
    }

    /// Total rows forwarded into buckets since creation.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Number of live buckets in the registry.
    pub fn bucket_count(&self) -> usize {
        self.active_buckets.len()
    }

    /// Whether a live bucket exists for the key.
    pub fn contains_bucket(&self, key: &BucketKey) -> bool {
        self.active_buckets.contains_key(key)
    }

    /// Keys of all live buckets, in no particular order.
    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        self.active_buckets.keys().cloned().collect()
    }

    /// Number of cached writer creators.
    pub fn creator_count(&self) -> usize {
        self.creators.len()
    }

    /// The registered instant of the next bucket inspection, if armed.
    pub fn next_inspection_time(&self) -> Option<i64> {
        self.time_service.next_timer()
    }

    /// Current processing time as seen by the writer's time service.
    pub fn current_processing_time(&self) -> i64 {
        self.time_service.current_processing_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::{
        test_identity, ManualTimeService, MemoryBucketFactory, PassthroughExtractor, TestRecord,
    };

    fn test_writer(
        clock: ManualTimeService,
    ) -> (
        MultiTableSinkWriter<TestRecord, String>,
        Arc<MemoryBucketFactory>,
    ) {
        let factory = Arc::new(MemoryBucketFactory::new());
        let writer = MultiTableSinkWriter::new(
            WriterConfig {
                bucket_check_interval_ms: 1_000,
                ..WriterConfig::default()
            },
            "test",
            Box::new(PassthroughExtractor),
            factory.clone(),
            factory.clone(),
            Box::new(clock),
        )
        .unwrap();
        (writer, factory)
    }

    fn ctx() -> WriteContext {
        WriteContext {
            timestamp: Some(1_000),
            watermark: 900,
        }
    }

    #[test]
    fn test_write_opens_bucket_and_counts_rows() {
        let (mut writer, _factory) = test_writer(ManualTimeService::at(10_000));
        let identity = Arc::new(test_identity("orders", "/lake/orders"));

        let record = TestRecord::new(vec![
            (identity.clone(), "a|row-1".to_string()),
            (identity.clone(), "a|row-2".to_string()),
        ]);
        writer.write(&record, &ctx()).unwrap();

        assert_eq!(writer.bucket_count(), 1);
        assert_eq!(writer.rows_emitted(), 2);
        assert_eq!(writer.creator_count(), 1);
        assert!(writer.contains_bucket(&BucketKey::new(identity.table_id.clone(), "a")));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let factory = Arc::new(MemoryBucketFactory::new());
        let result = MultiTableSinkWriter::<TestRecord, String>::new(
            WriterConfig {
                bucket_check_interval_ms: -1,
                ..WriterConfig::default()
            },
            "test",
            Box::new(PassthroughExtractor),
            factory.clone(),
            factory,
            Box::new(ManualTimeService::at(0)),
        );
        assert!(matches!(result, Err(WriterError::Config { .. })));
    }

    #[test]
    fn test_initialize_state_arms_inspection_timer() {
        let (mut writer, _factory) = test_writer(ManualTimeService::at(5_000));
        assert!(writer.next_inspection_time().is_none());

        writer.initialize_state(Vec::new()).unwrap();
        assert_eq!(writer.next_inspection_time(), Some(6_000));
    }

    #[test]
    fn test_on_processing_time_rearms() {
        let service = ManualTimeService::at(5_000);
        let clock = service.handle();
        let (mut writer, _factory) = test_writer(service);
        writer.initialize_state(Vec::new()).unwrap();
        assert_eq!(writer.next_inspection_time(), Some(6_000));

        clock.set(6_200);
        writer.on_processing_time(6_200).unwrap();
        assert_eq!(writer.next_inspection_time(), Some(7_200));
    }

    #[test]
    fn test_close_is_idempotent_and_stops_rearming() {
        let (mut writer, _factory) = test_writer(ManualTimeService::at(5_000));
        let identity = Arc::new(test_identity("orders", "/lake/orders"));
        let record = TestRecord::new(vec![(identity, "a|row-1".to_string())]);
        writer.write(&record, &ctx()).unwrap();

        writer.initialize_state(Vec::new()).unwrap();
        let armed = writer.next_inspection_time();

        writer.close();
        assert_eq!(writer.bucket_count(), 0);
        writer.close();
        assert_eq!(writer.bucket_count(), 0);

        // A late tick after close is tolerated but does not re-arm.
        writer.on_processing_time(100_000).unwrap();
        assert_eq!(writer.next_inspection_time(), armed);
    }
}
