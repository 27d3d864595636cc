//! Configuration system for heapwire.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $HEAPWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/heapwire/config.toml
//!   3. ~/.config/heapwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pool::DEFAULT_POOL_CAPACITY;
use crate::wire::DEFAULT_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapwireConfig {
    pub network: NetworkConfig,
    pub stats: StatsConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server binds, or the client dials.
    pub host: String,
    /// Primary session port (statistics, token and snapshot requests).
    pub session_port: u16,
    /// Secondary port dedicated to snapshot chunks.
    pub snapshot_port: u16,
    /// Client reconnect delay after the session drops.
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Sampling period. 0 = sample on every tick.
    pub gather_freq_ms: u32,
    /// Longest a batch stays open before it is sent.
    pub send_freq_ms: u32,
    /// Upper bound on an AUTO_STAT payload.
    pub max_packet_bytes: u32,
    /// Outbound depth beyond which sampling ticks are skipped.
    pub max_queue_depth: usize,
    /// Pooled statistics buffers.
    pub pool_capacity: usize,
    /// Session loop tick period.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Server: where captured snapshots wait for transfer.
    /// Client: where received snapshots are written.
    pub output_dir: PathBuf,
    /// Bytes of file data per AUTO_SNAPSHOT message.
    pub chunk_size: u32,
    /// Size of the file produced by the demo snapshot producer.
    pub demo_size_bytes: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            session_port: 7760,
            snapshot_port: 7761,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            gather_freq_ms: 100,
            send_freq_ms: 500,
            max_packet_bytes: 30_000,
            max_queue_depth: 256,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            tick_ms: 10,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: data_dir().join("snapshots"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            demo_size_bytes: 200_000,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("heapwire")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("heapwire")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HeapwireConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            HeapwireConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("HEAPWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HeapwireConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply HEAPWIRE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("HEAPWIRE_NETWORK__HOST") {
            self.network.host = v;
        }
        if let Some(p) = lookup("HEAPWIRE_NETWORK__SESSION_PORT").and_then(|v| v.parse().ok()) {
            self.network.session_port = p;
        }
        if let Some(p) = lookup("HEAPWIRE_NETWORK__SNAPSHOT_PORT").and_then(|v| v.parse().ok()) {
            self.network.snapshot_port = p;
        }
        if let Some(n) = lookup("HEAPWIRE_NETWORK__RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.network.reconnect_delay_ms = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__GATHER_FREQ_MS").and_then(|v| v.parse().ok()) {
            self.stats.gather_freq_ms = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__SEND_FREQ_MS").and_then(|v| v.parse().ok()) {
            self.stats.send_freq_ms = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__MAX_PACKET_BYTES").and_then(|v| v.parse().ok()) {
            self.stats.max_packet_bytes = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__MAX_QUEUE_DEPTH").and_then(|v| v.parse().ok()) {
            self.stats.max_queue_depth = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__POOL_CAPACITY").and_then(|v| v.parse().ok()) {
            self.stats.pool_capacity = n;
        }
        if let Some(n) = lookup("HEAPWIRE_STATS__TICK_MS").and_then(|v| v.parse().ok()) {
            self.stats.tick_ms = n;
        }
        if let Some(v) = lookup("HEAPWIRE_SNAPSHOT__OUTPUT_DIR") {
            self.snapshot.output_dir = PathBuf::from(v);
        }
        if let Some(n) = lookup("HEAPWIRE_SNAPSHOT__CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.snapshot.chunk_size = n;
        }
        if let Some(n) = lookup("HEAPWIRE_SNAPSHOT__DEMO_SIZE_BYTES").and_then(|v| v.parse().ok()) {
            self.snapshot.demo_size_bytes = n;
        }
    }
}
