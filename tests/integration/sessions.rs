use crate::*;

use heapwire_core::wire::parse_frame;
use heapwire_core::{MessageType, Packet};
use heapwire_services::{ClientState, ServerState};

#[test]
fn first_connection_starts_a_new_session() {
    let mut rig = Rig::new();
    rig.connect();

    assert_eq!(rig.observed.take(), vec![Seen::NewSession(CONFIG_BLOB.to_vec())]);
    assert_eq!(rig.server.state(), ServerState::Active);
    assert_eq!(rig.client.state(), ClientState::Active);
    assert_ne!(rig.server.token(), 0);
    assert_eq!(rig.client.token(), rig.server.token());
}

#[test]
fn reconnect_with_the_same_token_resumes() {
    let mut rig = Rig::new();
    rig.connect();
    let token = rig.client.token();
    rig.observed.take();

    rig.disconnect("cable pulled");
    assert_eq!(rig.observed.take(), vec![Seen::Lost("cable pulled".into())]);
    assert_eq!(rig.server.state(), ServerState::Idle);
    assert_eq!(rig.client.state(), ClientState::Idle);

    rig.connect();
    assert_eq!(rig.observed.take(), vec![Seen::Resumed]);
    assert_eq!(rig.client.token(), token);
    assert_eq!(rig.server.token(), token);
}

#[test]
fn a_different_tool_gets_a_new_session() {
    let mut rig = Rig::new();
    rig.connect();
    rig.disconnect("tool exited");

    rig.replace_client();
    rig.connect();
    assert_eq!(rig.observed.take(), vec![Seen::NewSession(CONFIG_BLOB.to_vec())]);
    assert_eq!(rig.client.token(), rig.server.token());
}

#[test]
fn stale_token_starts_a_new_session_and_drops_queued_snapshots() {
    let mut rig = Rig::new();
    rig.connect();
    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    rig.disconnect("server restarted");
    assert_eq!(rig.outgoing().len(), 1);

    // A tool remembering a token from an earlier server process.
    let stale = rig.server.token() % u32::MAX + 1;
    rig.server.handle(ChannelEvent::Opened, &mut rig.to_client);
    let request = Packet::bare(MessageType::RequestToken, Status::Success, stale);
    rig.server.handle(
        ChannelEvent::Received(Bytes::copy_from_slice(request.as_bytes())),
        &mut rig.to_client,
    );

    let reply = rig.to_client.pop().unwrap();
    let frame = parse_frame(&reply).unwrap();
    assert_eq!(frame.kind().unwrap(), MessageType::ReplyToken);
    assert_eq!(frame.payload, CONFIG_BLOB, "new session carries the config");
    assert_eq!(rig.server.state(), ServerState::Active);

    rig.settle_primary();
    assert!(rig.outgoing().is_empty(), "stale snapshot deleted");
    assert!(rig.sender.jobs().next().is_none());
}

#[test]
fn snapshot_requests_are_gated_one_at_a_time() {
    let mut rig = Rig::new();
    assert!(!rig.client.request_snapshot(&mut rig.to_server), "not connected yet");
    assert!(rig.to_server.is_empty());

    rig.connect();
    rig.observed.take();

    assert!(rig.client.request_snapshot(&mut rig.to_server));
    assert!(
        !rig.client.request_snapshot(&mut rig.to_server),
        "second request before the reply"
    );
    rig.settle();
    assert_eq!(rig.observed.take(), vec![Seen::SnapshotReply(Status::Success)]);

    assert!(rig.request_snapshot(), "allowed again once answered");
}

#[test]
fn session_loss_interrupts_a_transfer_in_progress() {
    let mut rig = Rig::new();
    rig.connect();

    assert!(rig.client.request_snapshot(&mut rig.to_server));
    rig.settle_primary();
    assert!(rig.step_chunks());
    assert!(rig.receiver.in_progress());

    rig.disconnect("server went away");
    assert!(!rig.receiver.in_progress());
    let collected = rig.collected.lock();
    assert_eq!(collected.aborts.len(), 1);
    assert!(collected.files.is_empty());
}
