//! A live TCP connection bound to the channel seam.
//!
//! A reader task turns incoming messages into `Received` events and a
//! writer task writes one frame at a time, posting `Delivered` once each
//! write completes. Both report failures as `Closed`. The endpoint loop
//! owns the [`Link`]; dropping it stops both tasks, so no event from an
//! old connection can reach a later one.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use heapwire_core::{Channel, ChannelEvent, Disconnected};

use super::framing::{read_frame, write_frame};

/// Sending half handed to endpoints.
#[derive(Debug, Clone)]
pub struct LinkChannel {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Channel for LinkChannel {
    fn send(&mut self, frame: &[u8]) {
        if self.tx.send(Bytes::copy_from_slice(frame)).is_err() {
            tracing::debug!(len = frame.len(), "writer gone, frame dropped");
        }
    }
}

#[derive(Debug)]
pub struct Link {
    pub peer: SocketAddr,
    pub channel: LinkChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Take over `stream`. Must be called inside a tokio runtime.
    pub fn spawn(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::from_parts(peer, read_half, write_half))
    }

    pub fn from_parts<R, W>(peer: SocketAddr, read_half: R, write_half: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read_half, event_tx.clone()));
        let writer = tokio::spawn(write_loop(write_half, frame_rx, event_tx));
        tracing::debug!(%peer, "link up");
        Self {
            peer,
            channel: LinkChannel { tx: frame_tx },
            events,
            reader,
            writer,
        }
    }

    /// Next event. A link whose tasks have both ended reports `Closed`.
    pub async fn next_event(&mut self) -> ChannelEvent {
        self.events
            .recv()
            .await
            .unwrap_or_else(|| ChannelEvent::Closed("link tasks ended".into()))
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        tracing::debug!(peer = %self.peer, "link dropped");
    }
}

/// Next event from `link`, or never if there is none. For `select!` arms.
pub async fn next_event(link: &mut Option<Link>) -> ChannelEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

/// The link's channel, or `offline` when there is no link.
pub fn channel_of<'a>(link: &'a mut Option<Link>, offline: &'a mut Disconnected) -> &'a mut dyn Channel {
    match link {
        Some(link) => &mut link.channel,
        None => offline,
    }
}

async fn read_loop<R>(mut reader: R, events: mpsc::UnboundedSender<ChannelEvent>)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if events.send(ChannelEvent::Received(frame)).is_err() {
                    return;
                }
            }
            Ok(None) => break "connection closed by peer".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    let _ = events.send(ChannelEvent::Closed(reason));
}

async fn write_loop<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            let _ = events.send(ChannelEvent::Closed(e.to_string()));
            return;
        }
        tracing::trace!(len = frame.len(), "frame delivered");
        if events.send(ChannelEvent::Delivered).is_err() {
            return;
        }
    }
}
