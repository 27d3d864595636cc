//! `heapwired attach` — the tool side.
//!
//! Dials the server, reconnecting after a fixed delay whenever the session
//! drops, and presents the remembered token on every reconnect. Received
//! statistics are logged; received snapshots are written to disk by the
//! snapshot receiver thread.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use heapwire_core::config::HeapwireConfig;
use heapwire_core::{ChannelEvent, Disconnected, Status};
use heapwire_services::{
    ClientSession, Endpoint, LocalFiles, SessionObserver, SnapshotReceiver,
};
use zerocopy::FromBytes;

use crate::demo::{SampleLayout, StatSample, SAMPLE_LEN};
use crate::net::{channel_of, next_event, Link};
use crate::sink::FileSink;
use crate::transfer::{self, Connect};

#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    /// Request a snapshot this often while connected.
    pub snapshot_every: Option<Duration>,
}

/// Logs what the server sends.
#[derive(Debug, Default)]
struct ConsoleObserver {
    layout: Option<SampleLayout>,
    batches: u64,
}

impl SessionObserver for ConsoleObserver {
    fn on_new_session(&mut self, config: &[u8]) {
        match serde_json::from_slice::<SampleLayout>(config) {
            Ok(layout) => {
                tracing::info!(
                    format = %layout.format,
                    sample_size = layout.sample_size,
                    gather_freq_ms = layout.gather_freq_ms,
                    send_freq_ms = layout.send_freq_ms,
                    "new session"
                );
                self.layout = Some(layout);
            }
            Err(e) => {
                tracing::info!(config_bytes = config.len(), error = %e, "new session, unrecognised sample layout");
                self.layout = None;
            }
        }
        self.batches = 0;
    }

    fn on_resumed_session(&mut self) {
        tracing::info!(batches = self.batches, "session resumed");
    }

    fn on_stats(&mut self, items: &[u8], item_count: u16) {
        self.batches += 1;
        let latest = match &self.layout {
            Some(layout) if layout.is_demo() => items
                .chunks_exact(SAMPLE_LEN)
                .take(item_count as usize)
                .last()
                .and_then(StatSample::read_from),
            _ => None,
        };
        match latest {
            Some(sample) => tracing::info!(
                items = item_count,
                timestamp_ms = sample.timestamp_ms.get(),
                vm_rss_kb = sample.vm_rss_kb.get(),
                vm_size_kb = sample.vm_size_kb.get(),
                threads = sample.threads.get(),
                "stats"
            ),
            None => tracing::info!(items = item_count, bytes = items.len(), "stats"),
        }
    }

    fn on_snapshot_reply(&mut self, status: Status) {
        match status {
            Status::Success => tracing::info!("snapshot captured, transfer starting"),
            other => tracing::warn!(status = ?other, "snapshot request refused"),
        }
    }

    fn on_connection_lost(&mut self, reason: &str) {
        tracing::warn!(reason, "connection to server lost");
    }
}

async fn next_tick(timer: &mut Option<Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

pub async fn run(
    config: HeapwireConfig,
    options: AttachOptions,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let reconnect_delay = Duration::from_millis(config.network.reconnect_delay_ms.max(1));
    let sink = FileSink::new(Arc::new(LocalFiles), config.snapshot.output_dir.clone());
    let (transfer, transfer_thread) = transfer::spawn(
        "heapwire-snapshot",
        SnapshotReceiver::new(Box::new(sink)),
        Connect::Dial {
            port: config.network.snapshot_port,
            reconnect_delay,
        },
    )?;

    let host = config.network.host.clone();
    let addr = format!("{host}:{}", config.network.session_port);
    let mut session = ClientSession::new(Box::new(ConsoleObserver::default()), transfer.clone(), host);
    tracing::info!(
        %addr,
        output_dir = %config.snapshot.output_dir.display(),
        "attaching"
    );

    let mut snapshot_timer = options.snapshot_every.map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });
    let mut link: Option<Link> = None;
    let mut offline = Disconnected;
    let mut next_dial = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("client loop shutting down");
                break;
            }

            _ = tokio::time::sleep_until(next_dial), if link.is_none() => {
                match tokio::time::timeout(reconnect_delay, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => match Link::spawn(stream) {
                        Ok(new_link) => {
                            tracing::info!(peer = %new_link.peer, "connected");
                            let new_link = link.insert(new_link);
                            session.handle(ChannelEvent::Opened, &mut new_link.channel);
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to set up session link"),
                    },
                    Ok(Err(e)) => tracing::debug!(%addr, error = %e, "connect failed"),
                    Err(_) => tracing::debug!(%addr, "connect timed out"),
                }
                next_dial = Instant::now() + reconnect_delay;
            }

            event = next_event(&mut link) => {
                let closed = matches!(event, ChannelEvent::Closed(_));
                session.handle(event, channel_of(&mut link, &mut offline));
                if closed {
                    link = None;
                    next_dial = Instant::now() + reconnect_delay;
                }
            }

            _ = next_tick(&mut snapshot_timer) => {
                if let Some(link) = link.as_mut() {
                    if session.request_snapshot(&mut link.channel) {
                        tracing::info!("snapshot requested");
                    }
                }
            }
        }
    }

    drop(link);
    transfer.shutdown();
    tokio::task::spawn_blocking(move || transfer_thread.join())
        .await
        .context("snapshot thread join task failed")?
        .map_err(|_| anyhow::anyhow!("snapshot thread panicked"))?;
    Ok(())
}
