//! File-system primitives the snapshot path needs.
//!
//! Kept behind a trait so the transfer state machine can be driven against
//! files that misbehave (short reads, vanishing files) in tests.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

pub trait FileStore: Send + Sync {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    fn size(&self, path: &Path) -> io::Result<u64>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// The local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFiles;

impl FileStore for LocalFiles {
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(io::BufWriter::new(fs::File::create(path)?)))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Read until `buf` is full or the reader hits end of file.
/// Returns the number of bytes read.
pub fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Delete `path`, treating "already gone" as success.
pub fn remove_quietly(files: &dyn FileStore, path: &Path) {
    match files.remove(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
