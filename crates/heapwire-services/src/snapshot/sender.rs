//! Sending role: streams queued snapshot files to the tool, one chunk in
//! flight at a time.
//!
//! The head job's file is opened when the job reaches the head of the
//! queue and a connection exists. Each delivery acknowledgment advances the
//! job by the chunk that was in flight; the next chunk is read only then.
//! A completed job's file is deleted and the queue moves on.
//!
//! A chunk read that comes back short, or fails, ends the job: a
//! header-only AUTO_SNAPSHOT with status ERROR is sent, the file is
//! deleted, and the next job begins once that error frame is delivered.
//! There is no partial resume.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use heapwire_core::wire::{parse_frame, DEFAULT_CHUNK_SIZE};
use heapwire_core::{Channel, ChannelEvent, MessageType, OutboundQueue, Packet, SnapshotChunkParams, Status};

use super::{SnapshotCommand, SnapshotEndpoint, SnapshotJob, TransferError};
use crate::files::{read_full, remove_quietly, FileStore};
use crate::service::Endpoint;

/// What the frame in flight is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Nothing,
    Chunk,
    Failure,
}

pub struct SnapshotSender {
    files: Arc<dyn FileStore>,
    jobs: VecDeque<SnapshotJob>,
    /// Open reader for the head job.
    reader: Option<Box<dyn Read + Send>>,
    queue: OutboundQueue,
    awaiting: Awaiting,
    token: u32,
    chunk_size: u32,
    connected: bool,
}

impl SnapshotSender {
    pub fn new(files: Arc<dyn FileStore>, chunk_size: u32) -> Self {
        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(DEFAULT_CHUNK_SIZE),
        };
        Self {
            files,
            jobs: VecDeque::new(),
            reader: None,
            queue: OutboundQueue::new(),
            awaiting: Awaiting::Nothing,
            token: 0,
            chunk_size,
            connected: false,
        }
    }

    /// Queue a file. Transfer begins at once if the channel is idle.
    pub fn enqueue(&mut self, path: PathBuf, channel: &mut dyn Channel) {
        tracing::debug!(path = %path.display(), queued = self.jobs.len(), "snapshot queued");
        self.jobs.push_back(SnapshotJob::new(path));
        self.pump(channel);
    }

    pub fn jobs(&self) -> impl Iterator<Item = &SnapshotJob> {
        self.jobs.iter()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn start(&mut self, new_session: bool, token: u32) {
        self.disconnect();
        self.token = token;
        if new_session {
            self.purge();
        }
        tracing::debug!(new_session, pending = self.jobs.len(), "snapshot sender started");
    }

    /// Delete every queued file. Stale snapshots never reach a new session.
    fn purge(&mut self) {
        for job in self.jobs.drain(..) {
            tracing::info!(path = %job.path.display(), "discarding snapshot from previous session");
            remove_quietly(&*self.files, &job.path);
        }
    }

    /// Forget the connection. The head job keeps its place and restarts
    /// from offset 0 on the next connection.
    fn disconnect(&mut self) {
        self.connected = false;
        self.reader = None;
        self.queue.clear();
        self.awaiting = Awaiting::Nothing;
        if let Some(head) = self.jobs.front_mut() {
            head.rewind();
        }
    }

    fn on_delivered(&mut self, channel: &mut dyn Channel) {
        if self.queue.on_delivered(channel).is_none() {
            tracing::warn!("delivery acknowledged with nothing in flight, ignored");
            return;
        }
        if self.awaiting == Awaiting::Chunk {
            if let Some(job) = self.jobs.front_mut() {
                job.bytes_transferred += job.current_chunk_size;
                job.current_chunk_size = 0;
            }
        }
        self.awaiting = Awaiting::Nothing;
        self.pump(channel);
    }

    /// Send the next frame if the channel is idle: open, finish or fail
    /// jobs until one produces a chunk or the queue empties.
    fn pump(&mut self, channel: &mut dyn Channel) {
        while self.connected && !self.queue.in_flight() {
            let Some(job) = self.jobs.front_mut() else {
                return;
            };

            if self.reader.is_none() {
                match open_job(&*self.files, job) {
                    Ok(reader) => {
                        tracing::info!(
                            path = %job.path.display(),
                            total_size = job.total_size,
                            "snapshot transfer started"
                        );
                        self.reader = Some(reader);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "snapshot skipped");
                        let path = job.path.clone();
                        self.jobs.pop_front();
                        remove_quietly(&*self.files, &path);
                        continue;
                    }
                }
            }

            if job.is_complete() {
                tracing::info!(
                    path = %job.path.display(),
                    bytes = job.total_size,
                    "snapshot transfer complete"
                );
                let path = job.path.clone();
                self.reader = None;
                self.jobs.pop_front();
                remove_quietly(&*self.files, &path);
                continue;
            }

            let Some(reader) = self.reader.as_mut() else {
                return;
            };
            match read_chunk(&mut **reader, job, self.chunk_size, self.token) {
                Ok(packet) => {
                    tracing::trace!(
                        offset = job.bytes_transferred,
                        size = job.current_chunk_size,
                        "snapshot chunk sent"
                    );
                    self.awaiting = Awaiting::Chunk;
                    self.queue.enqueue(packet, channel);
                }
                Err(e) => {
                    // Terminal: the job is abandoned, never retried or
                    // resumed from a partial offset.
                    tracing::warn!(path = %job.path.display(), error = %e, "snapshot transfer failed");
                    let path = job.path.clone();
                    self.reader = None;
                    self.jobs.pop_front();
                    remove_quietly(&*self.files, &path);
                    self.awaiting = Awaiting::Failure;
                    self.queue
                        .enqueue(Packet::bare(MessageType::AutoSnapshot, Status::Error, self.token), channel);
                }
            }
        }
    }
}

fn open_job(files: &dyn FileStore, job: &mut SnapshotJob) -> Result<Box<dyn Read + Send>, TransferError> {
    let open_err = |source| TransferError::Open {
        path: job.path.clone(),
        source,
    };
    let size = files.size(&job.path).map_err(open_err)?;
    let total_size = u32::try_from(size).map_err(|_| TransferError::TooLarge {
        path: job.path.clone(),
        size,
    })?;
    let reader = files.open(&job.path).map_err(open_err)?;
    job.total_size = total_size;
    job.rewind();
    Ok(reader)
}

fn read_chunk(
    reader: &mut dyn Read,
    job: &mut SnapshotJob,
    chunk_size: u32,
    token: u32,
) -> Result<Packet, TransferError> {
    let offset = job.bytes_transferred;
    let wanted = chunk_size.min(job.total_size - offset);
    let params = SnapshotChunkParams::new(job.total_size, offset, wanted);
    let mut packet = Packet::snapshot_chunk(token, &params);

    let got = read_full(reader, packet.chunk_bytes_mut())
        .map_err(|source| TransferError::Read { offset, source })? as u32;
    if got < wanted {
        return Err(TransferError::ShortRead { offset, wanted, got });
    }
    job.current_chunk_size = wanted;
    Ok(packet)
}

impl Endpoint for SnapshotSender {
    fn handle(&mut self, event: ChannelEvent, channel: &mut dyn Channel) {
        match event {
            ChannelEvent::Opened => {
                tracing::debug!(pending = self.jobs.len(), "snapshot channel opened");
                self.connected = true;
                self.pump(channel);
            }
            ChannelEvent::Closed(reason) => {
                tracing::debug!(%reason, "snapshot channel closed");
                self.disconnect();
            }
            ChannelEvent::Delivered => self.on_delivered(channel),
            ChannelEvent::Received(bytes) => match parse_frame(&bytes) {
                Ok(frame) => {
                    tracing::trace!(kind = frame.header.kind.get(), "unexpected frame on snapshot channel")
                }
                Err(e) => tracing::trace!(error = %e, "malformed frame dropped"),
            },
            ChannelEvent::Tick(_) => {}
        }
    }
}

impl SnapshotEndpoint for SnapshotSender {
    fn apply(&mut self, command: SnapshotCommand, channel: &mut dyn Channel) {
        match command {
            SnapshotCommand::Start {
                new_session, token, ..
            } => self.start(new_session, token),
            SnapshotCommand::Enqueue(path) => self.enqueue(path, channel),
            SnapshotCommand::Stop | SnapshotCommand::Shutdown => self.disconnect(),
        }
    }
}

impl std::fmt::Debug for SnapshotSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSender")
            .field("jobs", &self.jobs)
            .field("in_flight", &self.queue.in_flight())
            .field("awaiting", &self.awaiting)
            .field("token", &self.token)
            .field("chunk_size", &self.chunk_size)
            .field("connected", &self.connected)
            .finish()
    }
}
