//! Client-side callbacks: what the tool hears from the protocol.

use heapwire_core::Status;

/// Session lifecycle and statistics delivery on the client.
pub trait SessionObserver: Send {
    /// Fresh session. `config` is the server's configuration blob.
    fn on_new_session(&mut self, config: &[u8]);

    /// The server recognised our token; no configuration is re-sent.
    fn on_resumed_session(&mut self);

    /// One statistics batch. `items` holds `item_count` samples whose
    /// layout is described by the configuration blob.
    fn on_stats(&mut self, items: &[u8], item_count: u16);

    /// Answer to our snapshot request. The chunks follow on the snapshot
    /// channel when `status` is success.
    fn on_snapshot_reply(&mut self, status: Status);

    /// The primary connection closed.
    fn on_connection_lost(&mut self, reason: &str);
}

/// One delivery from the snapshot channel.
///
/// A failed transfer is reported with `chunk_size == 0` and no data.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotChunk<'a> {
    pub total_size: u32,
    pub chunk_offset: u32,
    pub chunk_size: u32,
    pub data: Option<&'a [u8]>,
}

impl SnapshotChunk<'_> {
    pub fn failed() -> Self {
        SnapshotChunk {
            total_size: 0,
            chunk_offset: 0,
            chunk_size: 0,
            data: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.data.is_none()
    }

    /// True for the chunk that completes the file.
    pub fn is_last(&self) -> bool {
        !self.is_failure()
            && u64::from(self.chunk_offset) + u64::from(self.chunk_size) >= u64::from(self.total_size)
    }
}

/// Receives snapshot chunks in order. Reassembly is the sink's job.
pub trait SnapshotSink: Send {
    fn on_chunk(&mut self, chunk: SnapshotChunk<'_>);

    /// The snapshot channel went away with a transfer half done.
    fn on_transfer_aborted(&mut self, reason: &str);
}
