use crate::*;

fn offsets(chunks: &[ChunkSeen]) -> Vec<u32> {
    chunks.iter().map(|c| c.chunk_offset).collect()
}

#[test]
fn snapshot_arrives_in_order_and_complete() {
    let mut rig = Rig::new();
    rig.connect();
    rig.observed.take();

    assert!(rig.request_snapshot());
    assert_eq!(rig.observed.take(), vec![Seen::SnapshotReply(Status::Success)]);

    let collected = rig.collected.lock();
    assert_eq!(offsets(&collected.chunks), vec![0, 60_000, 120_000, 180_000]);
    let sizes: Vec<u32> = collected.chunks.iter().map(|c| c.chunk_size).collect();
    assert_eq!(sizes, vec![60_000, 60_000, 60_000, 20_000]);
    assert!(collected.chunks.iter().all(|c| c.total_size == 200_000));
    assert_eq!(collected.files, vec![pattern(200_000)]);
    assert_eq!(collected.failures, 0);
    drop(collected);

    assert!(rig.outgoing().is_empty(), "sent snapshots are deleted");
}

#[test]
fn queued_snapshots_go_out_one_after_another() {
    let mut rig = Rig::with(RigOptions {
        snapshot_len: 90_000,
        ..RigOptions::default()
    });
    rig.connect();

    // Both captures happen before any chunk is delivered.
    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    assert_eq!(rig.outgoing().len(), 2);

    rig.settle();
    let collected = rig.collected.lock();
    assert_eq!(offsets(&collected.chunks), vec![0, 60_000, 0, 60_000]);
    assert_eq!(collected.files, vec![pattern(90_000), pattern(90_000)]);
    drop(collected);
    assert!(rig.outgoing().is_empty());
}

#[test]
fn failed_capture_sends_nothing() {
    let mut rig = Rig::with(RigOptions {
        fail_capture: true,
        ..RigOptions::default()
    });
    rig.connect();
    rig.observed.take();

    assert!(rig.request_snapshot());
    assert_eq!(rig.observed.take(), vec![Seen::SnapshotReply(Status::Error)]);
    assert!(rig.collected.lock().chunks.is_empty());
    assert!(rig.outgoing().is_empty(), "partial capture removed");

    assert!(rig.client.request_snapshot(&mut rig.to_server), "tool may ask again");
}

#[test]
fn empty_snapshot_completes_without_chunks() {
    let mut rig = Rig::with(RigOptions {
        snapshot_len: 0,
        ..RigOptions::default()
    });
    rig.connect();
    rig.observed.take();

    assert!(rig.request_snapshot());
    assert_eq!(rig.observed.take(), vec![Seen::SnapshotReply(Status::Success)]);
    let collected = rig.collected.lock();
    assert!(collected.chunks.is_empty());
    assert_eq!(collected.failures, 0);
    drop(collected);
    assert!(rig.outgoing().is_empty());
}

#[test]
fn dropped_sub_connection_restarts_the_file_from_zero() {
    let mut rig = Rig::new();
    rig.connect();

    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    assert!(rig.step_chunks());
    assert!(rig.step_chunks());

    rig.drop_sub_connection("connection reset");
    rig.settle();

    let collected = rig.collected.lock();
    assert_eq!(collected.aborts, vec!["connection reset".to_string()]);
    assert_eq!(
        offsets(&collected.chunks),
        vec![0, 60_000, 0, 60_000, 120_000, 180_000]
    );
    assert_eq!(collected.files, vec![pattern(200_000)]);
}

#[test]
fn resumed_session_keeps_the_pending_snapshot() {
    let mut rig = Rig::new();
    rig.connect();

    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    assert_eq!(rig.outgoing().len(), 1);

    rig.disconnect("wifi dropped");
    assert_eq!(rig.outgoing().len(), 1, "kept across the gap");
    assert!(rig.collected.lock().files.is_empty());

    rig.connect();
    let collected = rig.collected.lock();
    assert_eq!(offsets(&collected.chunks).first(), Some(&0));
    assert_eq!(collected.files, vec![pattern(200_000)]);
    drop(collected);
    assert!(rig.outgoing().is_empty());
}

#[test]
fn new_session_discards_snapshots_from_the_old_one() {
    let mut rig = Rig::new();
    rig.connect();

    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    rig.disconnect("tool exited");
    assert_eq!(rig.outgoing().len(), 1);

    rig.replace_client();
    rig.connect();
    assert!(rig.outgoing().is_empty(), "stale snapshot deleted");
    assert!(rig.collected.lock().files.is_empty());
    assert!(rig.sender.jobs().next().is_none());
}
