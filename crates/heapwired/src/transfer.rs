//! Snapshot endpoint driver — its own OS thread, its own runtime.
//!
//! Bulk file reads and chunk writes happen here, never on the session
//! loop. The session loop reaches this thread only through the
//! [`SnapshotHandle`] command queue.
//!
//! The sub-connection exists only between `Start` and `Stop`. On the
//! server the listener is bound for the life of the thread but accepts
//! only while started; on the client the peer from `Start` is dialled,
//! and re-dialled after `reconnect_delay` if the connection fails.

use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use heapwire_core::{ChannelEvent, Disconnected};
use heapwire_services::{SnapshotCommand, SnapshotEndpoint, SnapshotHandle};

use crate::net::{channel_of, next_event, Link};

/// How the sub-connection is established.
#[derive(Debug, Clone)]
pub enum Connect {
    /// Server: accept on this address.
    Listen(SocketAddr),
    /// Client: dial the session peer on this port.
    Dial { port: u16, reconnect_delay: Duration },
}

enum Connector {
    Listen(TcpListener),
    Dial { port: u16, reconnect_delay: Duration },
}

impl Connector {
    async fn bind(connect: Connect) -> anyhow::Result<Self> {
        Ok(match connect {
            Connect::Listen(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind snapshot listener on {addr}"))?;
                tracing::info!(addr = %listener.local_addr()?, "snapshot listener bound");
                Connector::Listen(listener)
            }
            Connect::Dial {
                port,
                reconnect_delay,
            } => Connector::Dial {
                port,
                reconnect_delay,
            },
        })
    }

    /// Resolves once a connection is up. Cancelled and restarted by the
    /// driver loop as other events arrive.
    async fn next(&self, peer: Option<&str>) -> TcpStream {
        match self {
            Connector::Listen(listener) => loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "snapshot connection accepted");
                        return stream;
                    }
                    Err(e) => tracing::warn!(error = %e, "snapshot accept failed"),
                }
            },
            Connector::Dial {
                port,
                reconnect_delay,
            } => {
                let Some(host) = peer else {
                    return std::future::pending().await;
                };
                loop {
                    match TcpStream::connect((host, *port)).await {
                        Ok(stream) => return stream,
                        Err(e) => {
                            tracing::debug!(host, port, error = %e, "snapshot dial failed, retrying");
                            tokio::time::sleep(*reconnect_delay).await;
                        }
                    }
                }
            }
        }
    }
}

/// Start `endpoint` on a dedicated thread. Returns the handle used to
/// command it and the thread to join at exit.
pub fn spawn<E>(name: &str, endpoint: E, connect: Connect) -> anyhow::Result<(SnapshotHandle, JoinHandle<()>)>
where
    E: SnapshotEndpoint + 'static,
{
    let (handle, commands) = SnapshotHandle::channel();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build snapshot runtime")?;

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = drive(endpoint, connect, commands).await {
                    tracing::error!(error = %e, "snapshot endpoint failed");
                }
            });
        })
        .context("failed to spawn snapshot thread")?;
    Ok((handle, thread))
}

async fn drive<E>(
    mut endpoint: E,
    connect: Connect,
    mut commands: mpsc::UnboundedReceiver<SnapshotCommand>,
) -> anyhow::Result<()>
where
    E: SnapshotEndpoint,
{
    let connector = Connector::bind(connect).await?;
    let mut link: Option<Link> = None;
    let mut started = false;
    let mut peer: Option<String> = None;
    let mut offline = Disconnected;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let command = command.unwrap_or(SnapshotCommand::Shutdown);
                if command == SnapshotCommand::Shutdown {
                    endpoint.apply(command, &mut offline);
                    tracing::info!("snapshot endpoint shutting down");
                    return Ok(());
                }
                match &command {
                    SnapshotCommand::Start { peer: p, .. } => {
                        link = None;
                        started = true;
                        peer = p.clone();
                    }
                    SnapshotCommand::Stop => {
                        link = None;
                        started = false;
                    }
                    _ => {}
                }
                endpoint.apply(command, channel_of(&mut link, &mut offline));
            }

            stream = connector.next(peer.as_deref()), if started && link.is_none() => {
                match Link::spawn(stream) {
                    Ok(new_link) => {
                        tracing::info!(peer = %new_link.peer, "snapshot channel up");
                        let new_link = link.insert(new_link);
                        endpoint.handle(ChannelEvent::Opened, &mut new_link.channel);
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to set up snapshot link"),
                }
            }

            event = next_event(&mut link) => {
                let closed = matches!(event, ChannelEvent::Closed(_));
                endpoint.handle(event, channel_of(&mut link, &mut offline));
                if closed {
                    link = None;
                }
            }
        }
    }
}
