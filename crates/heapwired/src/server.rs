//! `heapwired serve` — the instrumented-process side.
//!
//! One primary connection at a time. The session loop multiplexes the
//! link's events, the sampling tick and shutdown; the snapshot sender runs
//! on its own thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use heapwire_core::config::HeapwireConfig;
use heapwire_core::{ChannelEvent, Disconnected};
use heapwire_services::{Endpoint, FileStore, LocalFiles, ServerSession, SnapshotSender};

use crate::demo::{DemoSnapshots, DemoStats, SampleLayout};
use crate::net::{channel_of, next_event, Link};
use crate::transfer::{self, Connect};

fn bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

pub async fn run(config: HeapwireConfig, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let files: Arc<dyn FileStore> = Arc::new(LocalFiles);
    let snapshot_dir = config.snapshot.output_dir.join("outgoing");

    let sender = SnapshotSender::new(files.clone(), config.snapshot.chunk_size);
    let (transfer, transfer_thread) = transfer::spawn(
        "heapwire-snapshot",
        sender,
        Connect::Listen(bind_addr(&config.network.host, config.network.snapshot_port)?),
    )?;

    let layout = SampleLayout::demo(config.stats.gather_freq_ms, config.stats.send_freq_ms);
    let stats = DemoStats::new(&layout).context("failed to encode sample layout")?;
    let mut session = ServerSession::new(
        &config.stats,
        Box::new(stats),
        Box::new(DemoSnapshots::new(files.clone(), config.snapshot.demo_size_bytes)),
        files,
        transfer.clone(),
        snapshot_dir.clone(),
        &mut rand::thread_rng(),
        Instant::now(),
    );

    let addr = bind_addr(&config.network.host, config.network.session_port)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind session listener on {addr}"))?;
    let settings = session.batch_settings();
    tracing::info!(
        addr = %listener.local_addr()?,
        snapshot_port = config.network.snapshot_port,
        snapshot_dir = %snapshot_dir.display(),
        max_items = settings.max_items,
        "serving"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(config.stats.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut link: Option<Link> = None;
    let mut offline = Disconnected;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("session loop shutting down");
                break;
            }

            accepted = listener.accept(), if link.is_none() => match accepted {
                Ok((stream, peer)) => match Link::spawn(stream) {
                    Ok(new_link) => {
                        tracing::info!(%peer, "tool connected");
                        let new_link = link.insert(new_link);
                        session.handle(ChannelEvent::Opened, &mut new_link.channel);
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "failed to set up session link"),
                },
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },

            event = next_event(&mut link) => {
                let closed = matches!(event, ChannelEvent::Closed(_));
                session.handle(event, channel_of(&mut link, &mut offline));
                if closed {
                    link = None;
                }
            }

            now = ticker.tick() => {
                session.handle(ChannelEvent::Tick(now.into_std()), channel_of(&mut link, &mut offline));
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
