//! Demo producers for `heapwired serve`.
//!
//! The statistics producer samples this process's own memory and thread
//! counters from /proc; the snapshot producer writes a synthetic dump of a
//! configured size. Both stand in for a real instrumented runtime.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use heapwire_services::{FileStore, SnapshotProducer, StatsProducer};

/// Identifies the demo sample layout in the configuration blob.
pub const LAYOUT_FORMAT: &str = "heapwire-demo-stats";

/// One demo sample as it appears inside an AUTO_STAT payload.
///
/// Wire size: 32 bytes, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct StatSample {
    pub timestamp_ms: U32<LittleEndian>,
    pub seq: U32<LittleEndian>,
    pub vm_size_kb: U64<LittleEndian>,
    pub vm_rss_kb: U64<LittleEndian>,
    pub threads: U32<LittleEndian>,
    pub reserved: U32<LittleEndian>,
}

assert_eq_size!(StatSample, [u8; 32]);

pub const SAMPLE_LEN: usize = std::mem::size_of::<StatSample>();

/// Configuration blob sent to new sessions, as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLayout {
    pub format: String,
    pub version: u32,
    pub sample_size: u32,
    pub fields: Vec<String>,
    pub gather_freq_ms: u32,
    pub send_freq_ms: u32,
}

impl SampleLayout {
    pub fn demo(gather_freq_ms: u32, send_freq_ms: u32) -> Self {
        Self {
            format: LAYOUT_FORMAT.to_string(),
            version: 1,
            sample_size: SAMPLE_LEN as u32,
            fields: ["timestamp_ms", "seq", "vm_size_kb", "vm_rss_kb", "threads"]
                .into_iter()
                .map(String::from)
                .collect(),
            gather_freq_ms,
            send_freq_ms,
        }
    }

    /// True if samples can be decoded as [`StatSample`].
    pub fn is_demo(&self) -> bool {
        self.format == LAYOUT_FORMAT && self.sample_size as usize == SAMPLE_LEN
    }
}

/// Counters read from /proc/self/status. Zero where unavailable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcStatus {
    pub vm_size_kb: u64,
    pub vm_rss_kb: u64,
    pub threads: u32,
}

impl ProcStatus {
    pub fn read() -> Self {
        std::fs::read_to_string("/proc/self/status")
            .map(|text| Self::parse(&text))
            .unwrap_or_default()
    }

    pub fn parse(text: &str) -> Self {
        let mut status = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let number = value.split_whitespace().next().and_then(|v| v.parse().ok());
            match (key, number) {
                ("VmSize", Some(n)) => status.vm_size_kb = n,
                ("VmRSS", Some(n)) => status.vm_rss_kb = n,
                ("Threads", Some(n)) => status.threads = n as u32,
                _ => {}
            }
        }
        status
    }
}

pub struct DemoStats {
    config: Vec<u8>,
    seq: u32,
}

impl DemoStats {
    pub fn new(layout: &SampleLayout) -> serde_json::Result<Self> {
        Ok(Self {
            config: serde_json::to_vec(layout)?,
            seq: 0,
        })
    }
}

impl StatsProducer for DemoStats {
    fn sample_size(&self) -> u32 {
        SAMPLE_LEN as u32
    }

    fn write_sample(&mut self, buf: &mut [u8], timestamp_ms: u32) {
        let proc = ProcStatus::read();
        let sample = StatSample {
            timestamp_ms: U32::new(timestamp_ms),
            seq: U32::new(self.seq),
            vm_size_kb: U64::new(proc.vm_size_kb),
            vm_rss_kb: U64::new(proc.vm_rss_kb),
            threads: U32::new(proc.threads),
            reserved: U32::new(0),
        };
        self.seq = self.seq.wrapping_add(1);
        buf.copy_from_slice(sample.as_bytes());
    }

    fn config_size(&self) -> u32 {
        self.config.len() as u32
    }

    fn write_config(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.config);
    }
}

/// Writes `size` bytes of repeating, offset-tagged filler.
pub struct DemoSnapshots {
    files: Arc<dyn FileStore>,
    size: u32,
}

impl DemoSnapshots {
    pub fn new(files: Arc<dyn FileStore>, size: u32) -> Self {
        Self { files, size }
    }

    fn write(&self, timestamp_ms: u32, destination: &Path) -> std::io::Result<()> {
        let mut out = self.files.create(destination)?;
        let mut block = [0u8; 4096];
        let mut written = 0usize;
        let total = self.size as usize;
        while written < total {
            for (i, byte) in block.iter_mut().enumerate() {
                *byte = ((written + i) as u32 ^ timestamp_ms) as u8;
            }
            let n = block.len().min(total - written);
            out.write_all(&block[..n])?;
            written += n;
        }
        out.flush()
    }
}

impl SnapshotProducer for DemoSnapshots {
    fn capture_snapshot(&mut self, timestamp_ms: u32, destination: &Path) -> bool {
        match self.write(timestamp_ms, destination) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %destination.display(), error = %e, "demo snapshot write failed");
                false
            }
        }
    }
}
