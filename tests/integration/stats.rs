use crate::*;

fn stats(gather_freq_ms: u32, send_freq_ms: u32, max_packet_bytes: u32) -> RigOptions {
    RigOptions {
        stats: StatsConfig {
            gather_freq_ms,
            send_freq_ms,
            max_packet_bytes,
            ..StatsConfig::default()
        },
        ..RigOptions::default()
    }
}

#[test]
fn one_second_of_ticks_delivers_six_then_four() {
    let mut rig = Rig::with(stats(100, 500, 30_000));
    rig.connect();
    rig.observed.take();
    assert_eq!(rig.server.batch_settings().max_items, 6);

    rig.tick(Duration::ZERO);
    rig.settle();
    for _ in 0..100 {
        rig.tick(Duration::from_millis(10));
        rig.settle();
    }

    let seen = rig.observed.take();
    assert_eq!(
        seen,
        vec![
            Seen::Stats {
                items: 6,
                bytes: 6 * SAMPLE_SIZE as usize
            },
            Seen::Stats {
                items: 4,
                bytes: 4 * SAMPLE_SIZE as usize
            },
        ]
    );
}

#[test]
fn no_statistics_before_the_handshake() {
    let mut rig = Rig::with(stats(0, 500, 32));
    rig.server.handle(ChannelEvent::Opened, &mut rig.to_client);
    for _ in 0..5 {
        rig.tick(Duration::from_millis(10));
    }
    assert!(rig.to_client.is_empty());

    rig.client.handle(ChannelEvent::Opened, &mut rig.to_server);
    rig.settle();
    rig.observed.take();

    rig.tick(Duration::from_millis(10));
    rig.settle();
    assert_eq!(rig.observed.stats_counts(), vec![1]);
}

#[test]
fn slow_tool_makes_the_server_drop_samples() {
    // One sample per packet, sampled on every tick.
    let mut rig = Rig::with(stats(0, 500, SAMPLE_SIZE));
    rig.connect();
    rig.observed.take();

    for _ in 0..400 {
        rig.tick(Duration::from_millis(1));
    }
    assert_eq!(rig.to_client.len(), 1, "one frame in flight");
    assert_eq!(rig.server.queue_depth(), 257, "sampling stopped past the cap");

    rig.settle();
    assert_eq!(rig.server.queue_depth(), 0);
    assert_eq!(rig.observed.stats_counts().len(), 257);

    rig.tick(Duration::from_millis(1));
    rig.settle();
    assert_eq!(rig.observed.stats_counts(), vec![1], "sampling resumes once drained");
}

#[test]
fn statistics_stop_with_the_connection_and_resume_after() {
    let mut rig = Rig::with(stats(0, 500, SAMPLE_SIZE));
    rig.connect();
    rig.tick(Duration::from_millis(1));
    rig.disconnect("gone");
    rig.observed.take();

    rig.tick(Duration::from_millis(1));
    assert!(rig.to_client.is_empty());

    rig.connect();
    rig.tick(Duration::from_millis(1));
    rig.settle();
    let seen = rig.observed.take();
    assert_eq!(seen[0], Seen::Resumed);
    assert_eq!(
        seen[1],
        Seen::Stats {
            items: 1,
            bytes: SAMPLE_SIZE as usize
        }
    );
}
