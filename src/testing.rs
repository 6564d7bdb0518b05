//! In-memory collaborators for tests and examples.
//!
//! [`MemoryBucket`] is a real (if simplified) bucket: it buffers rows in
//! an open part, rolls on explicit flush or on idle timeout, carries
//! pending files across snapshots, and upholds the eviction contract
//! that an inactive bucket holds no pending committable work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use arrow_schema::{DataType, Field, Schema};

use crate::bucket::{
    seal_in_progress, Bucket, BucketFactory, BucketState, Committable, InProgressFileState,
};
use crate::context::BucketContext;
use crate::creator::{BucketAssigner, RowComparator, WriterCreator, WriterCreatorFactory};
use crate::error::{BucketError, CreatorError, ExtractionError};
use crate::extract::{ExtractedRow, RowExtractor};
use crate::schema::{BucketKey, TableId, TableSchemaIdentity};
use crate::time::ProcessingTimeService;

/// Build a two-column identity for a table under `db`.
pub fn test_identity(table: &str, location: &str) -> TableSchemaIdentity {
    TableSchemaIdentity {
        table_id: TableId::new("db", table),
        schema: Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("value", DataType::Int64, true),
        ])),
        location: location.to_string(),
        primary_keys: vec!["id".to_string()],
        partition_columns: vec![],
    }
}

/// A pre-extracted input element.
#[derive(Debug, Clone, Default)]
pub struct TestRecord {
    pub rows: Vec<ExtractedRow<String>>,
}

impl TestRecord {
    /// Create a record carrying the given (identity, row) pairs.
    pub fn new(rows: Vec<ExtractedRow<String>>) -> Self {
        Self { rows }
    }
}

/// Extractor that hands back the pairs already carried by the record.
pub struct PassthroughExtractor;

impl RowExtractor<TestRecord, String> for PassthroughExtractor {
    fn extract(
        &mut self,
        element: &TestRecord,
    ) -> Result<Vec<ExtractedRow<String>>, ExtractionError> {
        Ok(element.rows.clone())
    }
}

/// Extractor that always fails.
pub struct FailingExtractor;

impl RowExtractor<TestRecord, String> for FailingExtractor {
    fn extract(
        &mut self,
        _element: &TestRecord,
    ) -> Result<Vec<ExtractedRow<String>>, ExtractionError> {
        Err(ExtractionError::Malformed {
            message: "unparseable element".to_string(),
        })
    }
}

/// Assigns rows of the form `"bucket|payload"` to `bucket`; rows without
/// a `|` go to the table root (`""`).
pub struct PrefixAssigner;

impl BucketAssigner<String> for PrefixAssigner {
    fn bucket_id(&self, row: &String, _context: &BucketContext) -> String {
        match row.split_once('|') {
            Some((bucket_id, _)) => bucket_id.to_string(),
            None => String::new(),
        }
    }
}

/// Shared handle for advancing a [`ManualTimeService`] after it has been
/// moved into a writer.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Set the clock to an absolute instant.
    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the clock by a delta in milliseconds.
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Read the clock.
    pub fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Deterministic processing-time service for tests.
#[derive(Debug)]
pub struct ManualTimeService {
    now: Arc<AtomicI64>,
    next: Option<i64>,
}

impl ManualTimeService {
    /// Create a service reading the given instant.
    pub fn at(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
            next: None,
        }
    }

    /// A handle that can advance this clock later.
    pub fn handle(&self) -> ManualClock {
        ManualClock {
            now: Arc::clone(&self.now),
        }
    }
}

impl ProcessingTimeService for ManualTimeService {
    fn current_processing_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn register_timer(&mut self, timestamp: i64) {
        self.next = Some(timestamp);
    }

    fn next_timer(&self) -> Option<i64> {
        self.next
    }
}

/// Observable per-bucket history kept by the factory.
#[derive(Debug, Default)]
pub struct BucketLog {
    /// Rows written, in arrival order, across all incarnations of the key.
    pub rows: Vec<String>,
    /// Fresh creations via the creator path.
    pub created: u32,
    /// Restorations from recovered state.
    pub restored: u32,
    /// In-progress part files dropped by `dispose_part_file`.
    pub disposed_parts: u32,
}

type BucketLogRef = Arc<Mutex<BucketLog>>;

#[derive(Debug)]
struct OpenPart {
    path: String,
    size: u64,
    last_update_time: i64,
}

/// In-memory bucket buffering rows in an open part file.
pub struct MemoryBucket {
    key: BucketKey,
    path: String,
    part: Option<OpenPart>,
    part_counter: u32,
    pending: Vec<Committable>,
    roll_on_idle_ms: Option<i64>,
    log: BucketLogRef,
}

impl MemoryBucket {
    fn open_part(&mut self, now: i64) -> &mut OpenPart {
        if self.part.is_none() {
            let path = format!("{}/part-{}", self.path, self.part_counter);
            self.part_counter += 1;
            self.part = Some(OpenPart {
                path,
                size: 0,
                last_update_time: now,
            });
        }
        self.part.as_mut().unwrap()
    }

    fn seal_part(&mut self) {
        if let Some(part) = self.part.take() {
            self.pending.push(Committable {
                table_id: self.key.table_id.clone(),
                bucket_id: self.key.bucket_id.clone(),
                path: part.path,
                size: part.size,
                created_at: part.last_update_time,
            });
        }
    }
}

impl Bucket<String> for MemoryBucket {
    fn key(&self) -> &BucketKey {
        &self.key
    }

    fn write(&mut self, row: String, processing_time: i64) -> Result<(), BucketError> {
        let part = self.open_part(processing_time);
        part.size += row.len() as u64;
        part.last_update_time = processing_time;
        self.log.lock().unwrap().rows.push(row);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.part.is_some() || !self.pending.is_empty()
    }

    fn prepare_commit(&mut self, flush: bool) -> Result<Vec<Committable>, BucketError> {
        if flush {
            self.seal_part();
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn snapshot_state(&self) -> Result<BucketState, BucketError> {
        let mut state = BucketState::new(
            self.key.table_id.clone(),
            self.key.bucket_id.clone(),
            self.path.clone(),
        );
        state.in_progress = self.part.as_ref().map(|part| InProgressFileState {
            path: part.path.clone(),
            size: part.size,
            last_update_time: part.last_update_time,
        });
        state.pending = self.pending.clone();
        Ok(state)
    }

    fn merge(&mut self, other: BucketState) -> Result<(), BucketError> {
        let found = other.key();
        if found != self.key {
            return Err(BucketError::MergeKeyMismatch {
                expected: self.key.clone(),
                found,
            });
        }
        self.pending.extend(other.pending);
        if let Some(in_progress) = other.in_progress {
            self.pending.push(seal_in_progress(
                &self.key.table_id,
                &self.key.bucket_id,
                in_progress,
            ));
        }
        Ok(())
    }

    fn on_processing_time(&mut self, now: i64) -> Result<(), BucketError> {
        if let (Some(idle_ms), Some(part)) = (self.roll_on_idle_ms, self.part.as_ref()) {
            if now - part.last_update_time >= idle_ms {
                self.seal_part();
            }
        }
        Ok(())
    }

    fn dispose_part_file(&mut self) {
        if self.part.take().is_some() {
            self.log.lock().unwrap().disposed_parts += 1;
        }
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    roll_on_idle_ms: Option<i64>,
    logs: Mutex<HashMap<BucketKey, BucketLogRef>>,
}

/// Factory for [`MemoryBucket`]s that doubles as a creator factory.
///
/// Cloning shares the underlying per-bucket logs, so a test can hold one
/// clone while the writer owns others.
#[derive(Debug, Clone, Default)]
pub struct MemoryBucketFactory {
    inner: Arc<FactoryInner>,
}

impl MemoryBucketFactory {
    /// Factory whose buckets never roll on idle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose buckets seal their open part after `idle_ms`
    /// without writes, when inspected by a processing-time tick.
    pub fn with_roll_on_idle(idle_ms: i64) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                roll_on_idle_ms: Some(idle_ms),
                logs: Mutex::default(),
            }),
        }
    }

    fn log_for(&self, key: &BucketKey) -> BucketLogRef {
        Arc::clone(
            self.inner
                .logs
                .lock()
                .unwrap()
                .entry(key.clone())
                .or_default(),
        )
    }

    /// Rows written to the key, in arrival order, across incarnations.
    pub fn rows(&self, key: &BucketKey) -> Vec<String> {
        self.log_for(key).lock().unwrap().rows.clone()
    }

    /// How many times a fresh bucket was created for the key.
    pub fn created(&self, key: &BucketKey) -> u32 {
        self.log_for(key).lock().unwrap().created
    }

    /// How many times a bucket was restored from state for the key.
    pub fn restored(&self, key: &BucketKey) -> u32 {
        self.log_for(key).lock().unwrap().restored
    }

    /// How many in-progress part files were disposed for the key.
    pub fn disposed_parts(&self, key: &BucketKey) -> u32 {
        self.log_for(key).lock().unwrap().disposed_parts
    }
}

impl BucketFactory<String> for MemoryBucketFactory {
    fn create(
        &self,
        identity: Arc<TableSchemaIdentity>,
        bucket_id: &str,
        bucket_path: &str,
        _comparator: Option<RowComparator<String>>,
    ) -> Result<Box<dyn Bucket<String>>, BucketError> {
        let key = BucketKey::new(identity.table_id.clone(), bucket_id);
        let log = self.log_for(&key);
        log.lock().unwrap().created += 1;
        Ok(Box::new(MemoryBucket {
            key,
            path: bucket_path.to_string(),
            part: None,
            part_counter: 0,
            pending: Vec::new(),
            roll_on_idle_ms: self.inner.roll_on_idle_ms,
            log,
        }))
    }

    fn restore(&self, state: BucketState) -> Result<Box<dyn Bucket<String>>, BucketError> {
        let key = state.key();
        let log = self.log_for(&key);
        log.lock().unwrap().restored += 1;
        // Start the part counter beyond anything the recovered files
        // could have used, so resumed buckets never reuse a part path.
        let part_counter = (state.pending.len() + 1) as u32 + 1000;
        Ok(Box::new(MemoryBucket {
            key,
            path: state.bucket_path,
            part: state.in_progress.map(|in_progress| OpenPart {
                path: in_progress.path,
                size: in_progress.size,
                last_update_time: in_progress.last_update_time,
            }),
            part_counter,
            pending: state.pending,
            roll_on_idle_ms: self.inner.roll_on_idle_ms,
            log,
        }))
    }
}

impl WriterCreatorFactory<String> for MemoryBucketFactory {
    fn create(
        &self,
        identity: Arc<TableSchemaIdentity>,
    ) -> Result<WriterCreator<String>, CreatorError> {
        Ok(WriterCreator {
            location: identity.location.clone(),
            identity,
            assigner: Arc::new(PrefixAssigner),
            bucket_factory: Arc::new(self.clone()),
            comparator: None,
        })
    }
}
