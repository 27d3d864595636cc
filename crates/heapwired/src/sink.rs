//! Tool-side reassembly: writes received snapshot chunks to disk.
//!
//! Chunks arrive strictly in order, so reassembly is an append. A file is
//! kept only once its last chunk lands; a failed or interrupted transfer
//! removes the partial file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use heapwire_services::files::remove_quietly;
use heapwire_services::{FileStore, SnapshotChunk, SnapshotSink};

struct Partial {
    path: PathBuf,
    out: Box<dyn Write + Send>,
    written: u32,
    total: u32,
}

pub struct FileSink {
    files: Arc<dyn FileStore>,
    output_dir: PathBuf,
    current: Option<Partial>,
    completed: Vec<PathBuf>,
}

impl FileSink {
    pub fn new(files: Arc<dyn FileStore>, output_dir: PathBuf) -> Self {
        Self {
            files,
            output_dir,
            current: None,
            completed: Vec::new(),
        }
    }

    /// Snapshots written so far, oldest first.
    pub fn completed(&self) -> &[PathBuf] {
        &self.completed
    }

    fn next_path(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        self.output_dir
            .join(format!("received-{millis}-{}.hprof", self.completed.len() + 1))
    }

    fn discard(&mut self) {
        if let Some(partial) = self.current.take() {
            drop(partial.out);
            remove_quietly(&*self.files, &partial.path);
        }
    }

    fn append(&mut self, chunk: &SnapshotChunk<'_>, data: &[u8]) -> std::io::Result<()> {
        if chunk.chunk_offset == 0 {
            if self.current.is_some() {
                tracing::warn!("new snapshot started before the previous one finished");
                self.discard();
            }
            let path = self.next_path();
            let out = self.files.create(&path)?;
            tracing::info!(path = %path.display(), total_size = chunk.total_size, "receiving snapshot");
            self.current = Some(Partial {
                path,
                out,
                written: 0,
                total: chunk.total_size,
            });
        }

        let Some(partial) = self.current.as_mut() else {
            tracing::debug!(offset = chunk.chunk_offset, "chunk without a snapshot in progress, dropped");
            return Ok(());
        };
        if chunk.chunk_offset != partial.written || chunk.total_size != partial.total {
            tracing::warn!(
                expected = partial.written,
                offset = chunk.chunk_offset,
                "snapshot chunk out of sequence"
            );
            self.discard();
            return Ok(());
        }

        let end = chunk
            .chunk_offset
            .checked_add(chunk.chunk_size)
            .filter(|&end| end <= partial.total && data.len() == chunk.chunk_size as usize);
        let Some(end) = end else {
            tracing::warn!(
                offset = chunk.chunk_offset,
                size = chunk.chunk_size,
                total = partial.total,
                "snapshot chunk overruns the file"
            );
            self.discard();
            return Ok(());
        };

        partial.out.write_all(data)?;
        partial.written = end;

        if partial.written >= partial.total {
            partial.out.flush()?;
            if let Some(done) = self.current.take() {
                tracing::info!(path = %done.path.display(), bytes = done.total, "snapshot received");
                self.completed.push(done.path);
            }
        }
        Ok(())
    }
}

impl SnapshotSink for FileSink {
    fn on_chunk(&mut self, chunk: SnapshotChunk<'_>) {
        let Some(data) = chunk.data else {
            tracing::warn!("snapshot transfer failed on the server");
            self.discard();
            return;
        };
        if let Err(e) = self.append(&chunk, data) {
            tracing::warn!(error = %e, "failed to write snapshot chunk");
            self.discard();
        }
    }

    fn on_transfer_aborted(&mut self, reason: &str) {
        tracing::warn!(reason, "snapshot transfer aborted");
        self.discard();
    }
}
