//! Server-side collaborators: the statistics sampler and the snapshot
//! writer. Both are opaque byte producers; the protocol never looks inside
//! what they write.

use std::path::Path;

/// Samples the instrumented process's counters.
///
/// Called on the session loop every sampling tick, so `write_sample` must
/// be cheap and must not block.
pub trait StatsProducer: Send {
    /// Bytes per sample. Fixed for the producer's lifetime.
    fn sample_size(&self) -> u32;

    /// Write one sample into `buf`, which is exactly `sample_size` bytes.
    /// `timestamp_ms` is relative to the server's start.
    fn write_sample(&mut self, buf: &mut [u8], timestamp_ms: u32);

    /// Bytes of the configuration blob sent to new sessions.
    fn config_size(&self) -> u32;

    /// Write the configuration blob into `buf`, exactly `config_size` bytes.
    fn write_config(&self, buf: &mut [u8]);
}

/// Serializes a heap snapshot to a file.
pub trait SnapshotProducer: Send {
    /// Write a snapshot tagged with `timestamp_ms` to `destination`.
    /// Returns false on failure; a partially written file may be left
    /// behind and is the caller's to delete.
    fn capture_snapshot(&mut self, timestamp_ms: u32, destination: &Path) -> bool;
}
