//! Server role — runs inside the instrumented process.
//!
//! Passive on handshake: nothing is sent until the tool presents a token.
//! Once the session is active, every tick may sample statistics into the
//! current batch, and closed batches go out as AUTO_STAT.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use heapwire_core::config::StatsConfig;
use heapwire_core::wire::parse_frame;
use heapwire_core::{Channel, ChannelEvent, MessageType, OutboundQueue, Packet, Status};
use rand::Rng;

use super::{generate_token, token_hex};
use crate::batch::{BatchSettings, StatBatcher};
use crate::files::{remove_quietly, FileStore};
use crate::producer::{SnapshotProducer, StatsProducer};
use crate::service::Endpoint;
use crate::snapshot::SnapshotHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No connection.
    Idle,
    /// Connected, waiting for REQUEST_TOKEN.
    AwaitingToken,
    /// Handshake done; statistics flow.
    Active,
}

pub struct ServerSession {
    state: ServerState,
    /// Fixed for the life of the process.
    token: u32,
    stats: Box<dyn StatsProducer>,
    snapshots: Box<dyn SnapshotProducer>,
    files: Arc<dyn FileStore>,
    transfer: SnapshotHandle,
    snapshot_dir: PathBuf,
    snapshot_seq: u32,
    batcher: StatBatcher,
    queue: OutboundQueue,
    epoch: Instant,
    last_tick: Instant,
}

impl ServerSession {
    /// `epoch` is time zero for every timestamp this session hands out.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &StatsConfig,
        stats: Box<dyn StatsProducer>,
        snapshots: Box<dyn SnapshotProducer>,
        files: Arc<dyn FileStore>,
        transfer: SnapshotHandle,
        snapshot_dir: PathBuf,
        rng: &mut impl Rng,
        epoch: Instant,
    ) -> Self {
        let settings = BatchSettings::new(config, stats.sample_size());
        let token = generate_token(rng);
        tracing::debug!(
            token = %token_hex(token),
            max_items = settings.max_items,
            sample_size = settings.sample_size,
            "server session created"
        );
        Self {
            state: ServerState::Idle,
            token,
            stats,
            snapshots,
            files,
            transfer,
            snapshot_dir,
            snapshot_seq: 0,
            batcher: StatBatcher::new(settings),
            queue: OutboundQueue::new(),
            epoch,
            last_tick: epoch,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    /// Outbound packets not yet delivered, in-flight one included.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn batch_settings(&self) -> &BatchSettings {
        self.batcher.settings()
    }

    fn timestamp_ms(&self, at: Instant) -> u32 {
        at.saturating_duration_since(self.epoch).as_millis() as u32
    }

    fn on_request_token(&mut self, presented: u32, channel: &mut dyn Channel) {
        let new_session = presented != self.token;
        let reply = if new_session {
            let mut packet = Packet::new(self.stats.config_size() as usize);
            self.stats.write_config(packet.payload_mut());
            packet.fill_header(MessageType::ReplyToken, Status::Success, 0, self.token);
            self.batcher.reset();
            packet
        } else {
            Packet::bare(MessageType::ReplyToken, Status::Success, self.token)
        };
        tracing::info!(
            new_session,
            presented = %token_hex(presented),
            config_bytes = reply.payload_len(),
            "session established"
        );
        self.queue.enqueue(reply, channel);
        self.state = ServerState::Active;
        self.transfer.start(new_session, self.token, None);
    }

    fn on_request_snapshot(&mut self, channel: &mut dyn Channel) {
        if self.state != ServerState::Active {
            tracing::debug!(state = ?self.state, "snapshot requested before handshake");
            self.reply_snapshot(Status::TokenRequired, channel);
            return;
        }

        let timestamp = self.timestamp_ms(self.last_tick);
        self.snapshot_seq += 1;
        let path = snapshot_path(&self.snapshot_dir, timestamp, self.snapshot_seq);

        let status = if !self.snapshots.capture_snapshot(timestamp, &path) {
            tracing::warn!(path = %path.display(), "snapshot capture failed");
            remove_quietly(&*self.files, &path);
            Status::Error
        } else if !self.transfer.enqueue(path.clone()) {
            remove_quietly(&*self.files, &path);
            Status::Error
        } else {
            tracing::info!(path = %path.display(), timestamp, "snapshot captured");
            Status::Success
        };
        self.reply_snapshot(status, channel);
    }

    fn reply_snapshot(&mut self, status: Status, channel: &mut dyn Channel) {
        let token = match self.state {
            ServerState::Active => self.token,
            _ => 0,
        };
        self.queue
            .enqueue(Packet::bare(MessageType::ReplySnapshot, status, token), channel);
    }

    fn on_tick(&mut self, now: Instant, channel: &mut dyn Channel) {
        self.last_tick = now;
        if self.state != ServerState::Active {
            return;
        }
        let timestamp = self.timestamp_ms(now);
        let depth = self.queue.len();
        let queue = &mut self.queue;
        self.batcher.tick(
            now,
            timestamp,
            depth,
            &mut *self.stats,
            self.token,
            |packet| queue.enqueue(packet, channel),
        );
    }

    fn on_closed(&mut self, reason: &str) {
        tracing::info!(reason, "session closed");
        self.state = ServerState::Idle;
        self.batcher.reset();
        for packet in self.queue.clear() {
            self.batcher.recycle(packet);
        }
        self.transfer.stop();
    }

    fn on_frame(&mut self, bytes: &[u8], channel: &mut dyn Channel) {
        let frame = match parse_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(error = %e, "malformed frame dropped");
                return;
            }
        };
        match frame.kind() {
            Ok(MessageType::RequestToken) => self.on_request_token(frame.token(), channel),
            Ok(MessageType::RequestSnapshot) => self.on_request_snapshot(channel),
            Ok(kind) => tracing::trace!(?kind, "unexpected frame dropped"),
            Err(e) => tracing::trace!(error = %e, "frame dropped"),
        }
    }
}

/// `<dir>/snapshot-<millis>-<seq>.hprof`
fn snapshot_path(dir: &Path, timestamp_ms: u32, seq: u32) -> PathBuf {
    dir.join(format!("snapshot-{timestamp_ms}-{seq}.hprof"))
}

impl Endpoint for ServerSession {
    fn handle(&mut self, event: ChannelEvent, channel: &mut dyn Channel) {
        match event {
            ChannelEvent::Opened => {
                tracing::debug!("session channel opened, awaiting token");
                self.state = ServerState::AwaitingToken;
            }
            ChannelEvent::Closed(reason) => self.on_closed(&reason),
            ChannelEvent::Received(bytes) => self.on_frame(&bytes, channel),
            ChannelEvent::Delivered => {
                match self.queue.on_delivered(channel) {
                    Some(packet) => self.batcher.recycle(packet),
                    None => tracing::warn!("delivery acknowledged with nothing in flight, ignored"),
                }
            }
            ChannelEvent::Tick(now) => self.on_tick(now, channel),
        }
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("state", &self.state)
            .field("token", &token_hex(self.token))
            .field("queue_depth", &self.queue.len())
            .field("snapshot_seq", &self.snapshot_seq)
            .finish()
    }
}
