//! Recovery tests: snapshot, restart, restore, and rescale merges.

use std::sync::Arc;

use icefall::testing::{
    test_identity, ManualTimeService, MemoryBucketFactory, PassthroughExtractor, TestRecord,
};
use icefall::{
    BucketKey, BucketState, Committable, InProgressFileState, MultiTableSinkWriter, TableId,
    WriteContext, WriterConfig,
};

fn new_writer(
    factory: &Arc<MemoryBucketFactory>,
    clock: ManualTimeService,
) -> MultiTableSinkWriter<TestRecord, String> {
    MultiTableSinkWriter::new(
        WriterConfig {
            bucket_check_interval_ms: 1_000,
            ..WriterConfig::default()
        },
        "recovery-it",
        Box::new(PassthroughExtractor),
        factory.clone(),
        factory.clone(),
        Box::new(clock),
    )
    .unwrap()
}

fn ctx() -> WriteContext {
    WriteContext {
        timestamp: None,
        watermark: 0,
    }
}

fn t1_a_key() -> BucketKey {
    BucketKey::new(TableId::new("db", "t1"), "a")
}

/// Bucket state as a prior parallel instance would have snapshotted it.
fn instance_state(
    part_prefix: &str,
    pending_count: usize,
    with_in_progress: bool,
) -> BucketState {
    let key = t1_a_key();
    let mut state = BucketState::new(key.table_id.clone(), &key.bucket_id, "/lake/T1/a");
    state.pending = (0..pending_count)
        .map(|i| Committable {
            table_id: key.table_id.clone(),
            bucket_id: key.bucket_id.clone(),
            path: format!("/lake/T1/a/{part_prefix}-pending-{i}"),
            size: 64,
            created_at: 100,
        })
        .collect();
    if with_in_progress {
        state.in_progress = Some(InProgressFileState {
            path: format!("/lake/T1/a/{part_prefix}-inprogress"),
            size: 32,
            last_update_time: 200,
        });
    }
    state
}

#[test]
fn test_restore_merges_states_from_two_prior_instances() {
    let factory = Arc::new(MemoryBucketFactory::new());
    let mut writer = new_writer(&factory, ManualTimeService::at(10_000));

    // After a rescale, two prior subtasks contributed state for the
    // same (table, bucket) key.
    let from_subtask_0 = instance_state("s0", 2, true);
    let from_subtask_1 = instance_state("s1", 1, true);

    writer
        .initialize_state(vec![from_subtask_0, from_subtask_1])
        .unwrap();

    // Exactly one registry entry combining both sides.
    assert_eq!(writer.bucket_count(), 1);
    assert!(writer.contains_bucket(&t1_a_key()));
    assert_eq!(factory.restored(&t1_a_key()), 1);

    // Flushing yields every file from both sides: two pending plus the
    // resumed in-progress file from subtask 0, one pending plus the
    // sealed in-progress file from subtask 1.
    let mut paths: Vec<String> = writer
        .prepare_commit(true)
        .unwrap()
        .into_iter()
        .map(|c| c.path)
        .collect();
    paths.sort();
    assert_eq!(
        paths,
        vec![
            "/lake/T1/a/s0-inprogress",
            "/lake/T1/a/s0-pending-0",
            "/lake/T1/a/s0-pending-1",
            "/lake/T1/a/s1-inprogress",
            "/lake/T1/a/s1-pending-0",
        ]
    );
}

#[test]
fn test_restore_without_collision_creates_one_entry_per_state() {
    let factory = Arc::new(MemoryBucketFactory::new());
    let mut writer = new_writer(&factory, ManualTimeService::at(10_000));

    let mut other = instance_state("s0", 1, false);
    other.bucket_id = "b".to_string();
    other.bucket_path = "/lake/T1/b".to_string();

    writer
        .initialize_state(vec![instance_state("s0", 1, false), other])
        .unwrap();

    assert_eq!(writer.bucket_count(), 2);
    assert!(writer.contains_bucket(&t1_a_key()));
    assert!(writer.contains_bucket(&BucketKey::new(TableId::new("db", "t1"), "b")));
}

#[test]
fn test_restart_resumes_in_progress_file() {
    let factory = Arc::new(MemoryBucketFactory::new());

    // First incarnation buffers a row and snapshots without flushing.
    let mut writer = new_writer(&factory, ManualTimeService::at(10_000));
    let t1 = Arc::new(test_identity("t1", "/lake/T1"));
    let record = TestRecord::new(vec![(t1.clone(), "a|before-crash".to_string())]);
    writer.write(&record, &ctx()).unwrap();
    let states = writer.snapshot_state(1).unwrap();
    assert_eq!(states.len(), 1);
    assert!(states[0].in_progress.is_some());
    drop(writer);

    // Second incarnation restores the state and keeps writing into the
    // same part file.
    let mut writer = new_writer(&factory, ManualTimeService::at(20_000));
    writer.initialize_state(states).unwrap();
    assert_eq!(writer.bucket_count(), 1);

    let record = TestRecord::new(vec![(t1, "a|after-restart".to_string())]);
    writer.write(&record, &ctx()).unwrap();

    let committables = writer.prepare_commit(true).unwrap();
    assert_eq!(committables.len(), 1);
    assert_eq!(committables[0].path, "/lake/T1/a/part-0");
    // Both incarnations' bytes ended up in the one resumed file.
    assert_eq!(
        committables[0].size,
        ("a|before-crash".len() + "a|after-restart".len()) as u64
    );
}

#[test]
fn test_restore_merges_into_bucket_created_by_earlier_restore() {
    let factory = Arc::new(MemoryBucketFactory::new());
    let mut writer = new_writer(&factory, ManualTimeService::at(10_000));

    // Restore in two calls: the second state for the key must merge into
    // the entry the first call created, not replace it.
    writer
        .initialize_state(vec![instance_state("s0", 1, false)])
        .unwrap();
    writer
        .initialize_state(vec![instance_state("s1", 1, false)])
        .unwrap();

    assert_eq!(writer.bucket_count(), 1);
    let committables = writer.prepare_commit(true).unwrap();
    assert_eq!(committables.len(), 2);
}

#[test]
fn test_initialize_state_arms_the_inspection_timer() {
    let factory = Arc::new(MemoryBucketFactory::new());
    let mut writer = new_writer(&factory, ManualTimeService::at(50_000));
    assert!(writer.next_inspection_time().is_none());

    writer
        .initialize_state(vec![instance_state("s0", 0, true)])
        .unwrap();
    assert_eq!(writer.next_inspection_time(), Some(51_000));
}

#[test]
fn test_snapshot_roundtrips_through_json() {
    let factory = Arc::new(MemoryBucketFactory::new());
    let mut writer = new_writer(&factory, ManualTimeService::at(10_000));

    let t1 = Arc::new(test_identity("t1", "/lake/T1"));
    let record = TestRecord::new(vec![
        (t1.clone(), "a|row-1".to_string()),
        (t1, "unpartitioned".to_string()),
    ]);
    writer.write(&record, &ctx()).unwrap();

    // The host persists states opaquely; a JSON roundtrip must not lose
    // anything.
    let states = writer.snapshot_state(1).unwrap();
    let json = serde_json::to_string(&states).unwrap();
    let restored: Vec<BucketState> = serde_json::from_str(&json).unwrap();
    assert_eq!(states, restored);

    let mut writer = new_writer(&factory, ManualTimeService::at(20_000));
    writer.initialize_state(restored).unwrap();
    assert_eq!(writer.bucket_count(), 2);
}
