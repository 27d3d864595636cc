//! Channel seam — what the protocol needs from a transport.
//!
//! A transport delivers whole messages and reports four lifecycle events.
//! Endpoints consume those events, plus a periodic tick, as one
//! [`ChannelEvent`] stream on a single loop.

use std::time::Instant;

use bytes::Bytes;

/// Everything an endpoint loop reacts to.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection is up.
    Opened,
    /// The connection went away. Carries the transport's reason.
    Closed(String),
    /// One complete message, not yet framing-checked.
    Received(Bytes),
    /// The transport finished sending the in-flight message.
    Delivered,
    /// Periodic timer. Drives statistics sampling on the server.
    Tick(Instant),
}

/// Sending half of a transport.
///
/// `send` never fails synchronously; a broken transport reports
/// [`ChannelEvent::Closed`] instead.
pub trait Channel {
    fn send(&mut self, frame: &[u8]);
}

/// Stand-in used while no connection exists. Endpoints do not send while
/// disconnected, so anything that reaches it is dropped and logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Disconnected;

impl Channel for Disconnected {
    fn send(&mut self, frame: &[u8]) {
        tracing::debug!(len = frame.len(), "send without a connection, frame dropped");
    }
}

/// Records every frame it is asked to send. Handy for driving endpoints
/// without a transport.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub sent: Vec<Vec<u8>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything sent so far.
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl Channel for Recorder {
    fn send(&mut self, frame: &[u8]) {
        self.sent.push(frame.to_vec());
    }
}
