//! Snapshot transfer — the secondary endpoint that streams heap snapshot
//! files in bounded chunks over its own channel.
//!
//! The endpoint lives on its own loop, so everything else talks to it by
//! posting [`SnapshotCommand`]s through a [`SnapshotHandle`].

pub mod receiver;
pub mod sender;

use std::io;
use std::path::PathBuf;

use heapwire_core::Channel;
use tokio::sync::mpsc;

use crate::service::Endpoint;

/// Cross-loop control messages for a snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotCommand {
    /// A session handshake completed. A new session purges every job left
    /// over from the previous one. `peer` is the address the client dials.
    Start {
        new_session: bool,
        token: u32,
        peer: Option<String>,
    },
    /// Queue a captured snapshot file for transfer (sender only).
    Enqueue(PathBuf),
    /// The primary session closed. Drop the sub-connection.
    Stop,
    /// The process is exiting.
    Shutdown,
}

/// Posting side of a snapshot endpoint's command queue. Cheap to clone and
/// safe to use from any thread.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    tx: mpsc::UnboundedSender<SnapshotCommand>,
}

impl SnapshotHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SnapshotCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn start(&self, new_session: bool, token: u32, peer: Option<String>) {
        self.post(SnapshotCommand::Start {
            new_session,
            token,
            peer,
        });
    }

    /// Returns false if the endpoint is gone and the file was not queued.
    pub fn enqueue(&self, path: PathBuf) -> bool {
        self.post(SnapshotCommand::Enqueue(path))
    }

    pub fn stop(&self) {
        self.post(SnapshotCommand::Stop);
    }

    pub fn shutdown(&self) {
        self.post(SnapshotCommand::Shutdown);
    }

    fn post(&self, command: SnapshotCommand) -> bool {
        match self.tx.send(command) {
            Ok(()) => true,
            Err(mpsc::error::SendError(command)) => {
                tracing::warn!(?command, "snapshot endpoint has exited, command dropped");
                false
            }
        }
    }
}

/// A snapshot endpoint: reacts to channel events like any endpoint, plus
/// the commands posted to it.
pub trait SnapshotEndpoint: Endpoint + Send {
    fn apply(&mut self, command: SnapshotCommand, channel: &mut dyn Channel);
}

/// One queued snapshot file on the sending side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotJob {
    pub path: PathBuf,
    /// Known once the file is opened.
    pub total_size: u32,
    /// Bytes acknowledged by the channel.
    pub bytes_transferred: u32,
    /// Size of the chunk in flight, added to `bytes_transferred` on delivery.
    pub current_chunk_size: u32,
}

impl SnapshotJob {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            total_size: 0,
            bytes_transferred: 0,
            current_chunk_size: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_size
    }

    /// Forget progress; the file will be sent again from the start.
    pub fn rewind(&mut self) {
        self.bytes_transferred = 0;
        self.current_chunk_size = 0;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is {size} bytes, too large for 32-bit chunk offsets", .path.display())]
    TooLarge { path: PathBuf, size: u64 },

    #[error("read failed at offset {offset}: {source}")]
    Read {
        offset: u32,
        #[source]
        source: io::Error,
    },

    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u32, wanted: u32, got: u32 },
}
