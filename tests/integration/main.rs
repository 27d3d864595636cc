//! heapwire integration test harness.
//!
//! Both ends of the protocol run in one process: server and client
//! sessions on the primary connection, snapshot sender and receiver on the
//! sub-connection. An in-memory [`Pipe`] stands in for each direction of
//! each socket. A frame stays in its pipe until [`Rig::settle`] hands it
//! to the peer and acknowledges it to the sender, which mirrors a socket
//! writer completing one write.
//!
//! Snapshot commands posted by either session are relayed to its transfer
//! endpoint the way the daemon's transfer thread does: the sub-connection
//! is torn down on every `Start` and `Stop`, and comes up once both sides
//! are started.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use heapwire_core::config::StatsConfig;
use heapwire_core::{Channel, ChannelEvent, Status};
use heapwire_services::{
    ClientSession, Endpoint, LocalFiles, ServerSession, SessionObserver, SnapshotChunk,
    SnapshotCommand, SnapshotEndpoint, SnapshotHandle, SnapshotProducer, SnapshotReceiver,
    SnapshotSender, SnapshotSink, StatsProducer,
};

mod sessions;
mod snapshots;
mod stats;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One direction of an in-memory connection.
#[derive(Debug, Default)]
pub struct Pipe {
    frames: VecDeque<Vec<u8>>,
}

impl Pipe {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn pop(&mut self) -> Option<Bytes> {
        self.frames.pop_front().map(Bytes::from)
    }
}

impl Channel for Pipe {
    fn send(&mut self, frame: &[u8]) {
        self.frames.push_back(frame.to_vec());
    }
}

/// What the client's observer was told, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    NewSession(Vec<u8>),
    Resumed,
    Stats { items: u16, bytes: usize },
    SnapshotReply(Status),
    Lost(String),
}

#[derive(Clone, Default)]
pub struct Observed(Arc<Mutex<Vec<Seen>>>);

impl Observed {
    pub fn take(&self) -> Vec<Seen> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn stats_counts(&self) -> Vec<u16> {
        self.take()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Stats { items, .. } => Some(items),
                _ => None,
            })
            .collect()
    }
}

impl SessionObserver for Observed {
    fn on_new_session(&mut self, config: &[u8]) {
        self.0.lock().unwrap().push(Seen::NewSession(config.to_vec()));
    }
    fn on_resumed_session(&mut self) {
        self.0.lock().unwrap().push(Seen::Resumed);
    }
    fn on_stats(&mut self, items: &[u8], item_count: u16) {
        self.0.lock().unwrap().push(Seen::Stats {
            items: item_count,
            bytes: items.len(),
        });
    }
    fn on_snapshot_reply(&mut self, status: Status) {
        self.0.lock().unwrap().push(Seen::SnapshotReply(status));
    }
    fn on_connection_lost(&mut self, reason: &str) {
        self.0.lock().unwrap().push(Seen::Lost(reason.to_string()));
    }
}

/// Chunk header as seen by the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSeen {
    pub total_size: u32,
    pub chunk_offset: u32,
    pub chunk_size: u32,
}

#[derive(Debug, Default)]
pub struct Received {
    pub chunks: Vec<ChunkSeen>,
    pub files: Vec<Vec<u8>>,
    pub failures: usize,
    pub aborts: Vec<String>,
    current: Vec<u8>,
}

/// Reassembles snapshots in memory.
#[derive(Clone, Default)]
pub struct Collector(Arc<Mutex<Received>>);

impl Collector {
    pub fn lock(&self) -> std::sync::MutexGuard<'_, Received> {
        self.0.lock().unwrap()
    }
}

impl SnapshotSink for Collector {
    fn on_chunk(&mut self, chunk: SnapshotChunk<'_>) {
        let mut received = self.0.lock().unwrap();
        let Some(data) = chunk.data else {
            received.failures += 1;
            received.current.clear();
            return;
        };
        received.chunks.push(ChunkSeen {
            total_size: chunk.total_size,
            chunk_offset: chunk.chunk_offset,
            chunk_size: chunk.chunk_size,
        });
        if chunk.chunk_offset == 0 {
            received.current.clear();
        }
        received.current.extend_from_slice(data);
        if chunk.is_last() {
            let file = std::mem::take(&mut received.current);
            received.files.push(file);
        }
    }

    fn on_transfer_aborted(&mut self, reason: &str) {
        let mut received = self.0.lock().unwrap();
        received.current.clear();
        received.aborts.push(reason.to_string());
    }
}

/// 32-byte samples carrying the session-relative timestamp.
pub struct Clocked;

pub const SAMPLE_SIZE: u32 = 32;
pub const CONFIG_BLOB: &[u8] = b"layout:clocked/32";

impl StatsProducer for Clocked {
    fn sample_size(&self) -> u32 {
        SAMPLE_SIZE
    }
    fn write_sample(&mut self, buf: &mut [u8], timestamp_ms: u32) {
        buf.fill(0);
        buf[..4].copy_from_slice(&timestamp_ms.to_le_bytes());
    }
    fn config_size(&self) -> u32 {
        CONFIG_BLOB.len() as u32
    }
    fn write_config(&self, buf: &mut [u8]) {
        buf.copy_from_slice(CONFIG_BLOB);
    }
}

/// Deterministic file contents: byte `i` is `i % 251`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Writes [`pattern`] files, or fails after writing part of one.
pub struct Patterned {
    len: usize,
    fail: bool,
}

impl SnapshotProducer for Patterned {
    fn capture_snapshot(&mut self, _timestamp_ms: u32, destination: &Path) -> bool {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        if self.fail {
            std::fs::write(destination, &pattern(self.len)[..self.len / 2]).unwrap();
            return false;
        }
        std::fs::write(destination, pattern(self.len)).unwrap();
        true
    }
}

#[derive(Debug, Clone)]
pub struct RigOptions {
    pub stats: StatsConfig,
    pub snapshot_len: usize,
    pub chunk_size: u32,
    pub fail_capture: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            stats: StatsConfig::default(),
            snapshot_len: 200_000,
            chunk_size: 60_000,
            fail_capture: false,
        }
    }
}

/// Server and client, both transfer endpoints, and the pipes between them.
pub struct Rig {
    pub server: ServerSession,
    pub client: ClientSession,
    pub sender: SnapshotSender,
    pub receiver: SnapshotReceiver,
    pub to_client: Pipe,
    pub to_server: Pipe,
    pub chunks: Pipe,
    pub observed: Observed,
    pub collected: Collector,
    pub dir: TempDir,
    pub epoch: Instant,
    pub now: Instant,
    server_commands: UnboundedReceiver<SnapshotCommand>,
    client_commands: UnboundedReceiver<SnapshotCommand>,
    sender_started: bool,
    receiver_started: bool,
    sub_connection: bool,
}

impl Rig {
    pub fn new() -> Self {
        Self::with(RigOptions::default())
    }

    pub fn with(options: RigOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let epoch = Instant::now();
        let files = Arc::new(LocalFiles);
        let (server_handle, server_commands) = SnapshotHandle::channel();
        let (client_handle, client_commands) = SnapshotHandle::channel();
        let observed = Observed::default();
        let collected = Collector::default();

        let server = ServerSession::new(
            &options.stats,
            Box::new(Clocked),
            Box::new(Patterned {
                len: options.snapshot_len,
                fail: options.fail_capture,
            }),
            files.clone(),
            server_handle,
            dir.path().join("outgoing"),
            &mut StdRng::seed_from_u64(7),
            epoch,
        );
        let client = ClientSession::new(Box::new(observed.clone()), client_handle, "127.0.0.1");

        Self {
            server,
            client,
            sender: SnapshotSender::new(files, options.chunk_size),
            receiver: SnapshotReceiver::new(Box::new(collected.clone())),
            to_client: Pipe::default(),
            to_server: Pipe::default(),
            chunks: Pipe::default(),
            observed,
            collected,
            dir,
            epoch,
            now: epoch,
            server_commands,
            client_commands,
            sender_started: false,
            receiver_started: false,
            sub_connection: false,
        }
    }

    /// Open the primary connection and run the handshake to completion.
    pub fn connect(&mut self) {
        self.server.handle(ChannelEvent::Opened, &mut self.to_client);
        self.client.handle(ChannelEvent::Opened, &mut self.to_server);
        self.settle();
    }

    /// Swap in a tool that has never met this server. Call while
    /// disconnected.
    pub fn replace_client(&mut self) {
        let (handle, commands) = SnapshotHandle::channel();
        self.observed = Observed::default();
        self.client = ClientSession::new(Box::new(self.observed.clone()), handle, "127.0.0.1");
        self.client_commands = commands;
    }

    /// Drop the primary connection. Frames still in the pipes are lost.
    pub fn disconnect(&mut self, reason: &str) {
        self.to_client = Pipe::default();
        self.to_server = Pipe::default();
        self.server.handle(ChannelEvent::Closed(reason.into()), &mut self.to_client);
        self.client.handle(ChannelEvent::Closed(reason.into()), &mut self.to_server);
        self.settle();
    }

    /// Drop only the sub-connection. It comes back on the next settle.
    pub fn drop_sub_connection(&mut self, reason: &str) {
        if !self.tear_down_sub_connection() {
            return;
        }
        self.sender.handle(ChannelEvent::Closed(reason.into()), &mut self.chunks);
        self.receiver.handle(ChannelEvent::Closed(reason.into()), &mut self.chunks);
    }

    /// Advance the clock and deliver one tick to the server. Whatever the
    /// tick sends stays in the pipe until the next settle.
    pub fn tick(&mut self, step: Duration) {
        self.now += step;
        self.server.handle(ChannelEvent::Tick(self.now), &mut self.to_client);
    }

    /// Ask for a snapshot and run everything to quiescence.
    pub fn request_snapshot(&mut self) -> bool {
        let sent = self.client.request_snapshot(&mut self.to_server);
        self.settle();
        sent
    }

    /// Deliver at most one frame on the sub-connection.
    pub fn step_chunks(&mut self) -> bool {
        let Some(frame) = self.chunks.pop() else {
            return false;
        };
        self.receiver.handle(ChannelEvent::Received(frame), &mut self.chunks);
        self.sender.handle(ChannelEvent::Delivered, &mut self.chunks);
        true
    }

    /// Deliver primary frames and relay commands, leaving the
    /// sub-connection's frames where they are.
    pub fn settle_primary(&mut self) {
        loop {
            if self.relay_commands() {
                continue;
            }
            if let Some(frame) = self.to_server.pop() {
                self.server.handle(ChannelEvent::Received(frame), &mut self.to_client);
                self.client.handle(ChannelEvent::Delivered, &mut self.to_server);
                continue;
            }
            if let Some(frame) = self.to_client.pop() {
                self.client.handle(ChannelEvent::Received(frame), &mut self.to_server);
                self.server.handle(ChannelEvent::Delivered, &mut self.to_client);
                continue;
            }
            break;
        }
    }

    /// Deliver every pending frame on both connections until nothing moves.
    pub fn settle(&mut self) {
        loop {
            self.settle_primary();
            if !self.step_chunks() {
                break;
            }
        }
    }

    /// Hand posted commands to the transfer endpoints. Returns true if any
    /// were relayed.
    fn relay_commands(&mut self) -> bool {
        let mut relayed = false;
        while let Ok(command) = self.server_commands.try_recv() {
            relayed = true;
            if let Some(started) = lifecycle(&command) {
                self.sender_started = started;
                if self.tear_down_sub_connection() {
                    self.receiver.handle(ChannelEvent::Closed(PEER_CLOSED.into()), &mut self.chunks);
                }
            }
            self.sender.apply(command, &mut self.chunks);
        }
        while let Ok(command) = self.client_commands.try_recv() {
            relayed = true;
            if let Some(started) = lifecycle(&command) {
                self.receiver_started = started;
                if self.tear_down_sub_connection() {
                    self.sender.handle(ChannelEvent::Closed(PEER_CLOSED.into()), &mut self.chunks);
                }
            }
            self.receiver.apply(command, &mut self.chunks);
        }
        if self.sender_started && self.receiver_started && !self.sub_connection {
            self.sub_connection = true;
            self.sender.handle(ChannelEvent::Opened, &mut self.chunks);
            self.receiver.handle(ChannelEvent::Opened, &mut self.chunks);
        }
        relayed
    }

    fn tear_down_sub_connection(&mut self) -> bool {
        let was_up = std::mem::take(&mut self.sub_connection);
        if was_up {
            self.chunks = Pipe::default();
        }
        was_up
    }

    /// Files the server still holds for transfer.
    pub fn outgoing(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(self.dir.path().join("outgoing")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

const PEER_CLOSED: &str = "peer closed the snapshot connection";

/// `Some(started)` for commands that tear the sub-connection down: the
/// side given the command drops it, its peer sees it close.
fn lifecycle(command: &SnapshotCommand) -> Option<bool> {
    match command {
        SnapshotCommand::Start { .. } => Some(true),
        SnapshotCommand::Stop | SnapshotCommand::Shutdown => Some(false),
        SnapshotCommand::Enqueue(_) => None,
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}
