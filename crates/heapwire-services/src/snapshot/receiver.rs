//! Receiving role: hands snapshot chunks to the tool's sink as they arrive.
//! Reassembly belongs to the sink; nothing here buffers a whole file.

use heapwire_core::wire::{decode_chunk, parse_frame};
use heapwire_core::{Channel, ChannelEvent, MessageType, Status};

use super::{SnapshotCommand, SnapshotEndpoint};
use crate::observer::{SnapshotChunk, SnapshotSink};
use crate::service::Endpoint;

pub struct SnapshotReceiver {
    sink: Box<dyn SnapshotSink>,
    /// Token of the current session. 0 until started; chunks carrying any
    /// other token are dropped once it is set.
    token: u32,
    /// A chunk arrived and the file is not yet complete.
    in_progress: bool,
}

impl SnapshotReceiver {
    pub fn new(sink: Box<dyn SnapshotSink>) -> Self {
        Self {
            sink,
            token: 0,
            in_progress: false,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    fn abort(&mut self, reason: &str) {
        if std::mem::take(&mut self.in_progress) {
            tracing::warn!(reason, "snapshot transfer interrupted");
            self.sink.on_transfer_aborted(reason);
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let frame = match parse_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(error = %e, "malformed frame dropped");
                return;
            }
        };
        if frame.kind() != Ok(MessageType::AutoSnapshot) {
            tracing::trace!(kind = frame.header.kind.get(), "unexpected frame on snapshot channel");
            return;
        }
        if self.token != 0 && frame.token() != self.token {
            tracing::debug!(token = frame.token(), "snapshot chunk from another session dropped");
            return;
        }

        match frame.status() {
            Ok(Status::Success) => match decode_chunk(frame.payload) {
                Ok((params, data)) => {
                    let chunk = SnapshotChunk {
                        total_size: params.total_size.get(),
                        chunk_offset: params.chunk_offset.get(),
                        chunk_size: params.chunk_size.get(),
                        data: Some(data),
                    };
                    self.in_progress = !chunk.is_last();
                    self.sink.on_chunk(chunk);
                }
                Err(e) => tracing::trace!(error = %e, "malformed snapshot chunk dropped"),
            },
            status => {
                tracing::warn!(?status, "server reported a failed snapshot transfer");
                self.in_progress = false;
                self.sink.on_chunk(SnapshotChunk::failed());
            }
        }
    }
}

impl Endpoint for SnapshotReceiver {
    fn handle(&mut self, event: ChannelEvent, _channel: &mut dyn Channel) {
        match event {
            ChannelEvent::Opened => tracing::debug!("snapshot channel opened"),
            ChannelEvent::Closed(reason) => self.abort(&reason),
            ChannelEvent::Received(bytes) => self.on_frame(&bytes),
            ChannelEvent::Delivered | ChannelEvent::Tick(_) => {}
        }
    }
}

impl SnapshotEndpoint for SnapshotReceiver {
    fn apply(&mut self, command: SnapshotCommand, _channel: &mut dyn Channel) {
        match command {
            SnapshotCommand::Start { token, .. } => {
                self.abort("session restarted");
                self.token = token;
            }
            SnapshotCommand::Enqueue(path) => {
                tracing::warn!(path = %path.display(), "receiver cannot send snapshots, ignored")
            }
            SnapshotCommand::Stop => self.abort("session closed"),
            SnapshotCommand::Shutdown => self.abort("shutting down"),
        }
    }
}

impl std::fmt::Debug for SnapshotReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReceiver")
            .field("token", &self.token)
            .field("in_progress", &self.in_progress)
            .finish()
    }
}
