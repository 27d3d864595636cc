//! Endpoint trait — the seam between the daemon's loops and the protocol.
//!
//! The daemon owns sockets, timers and threads. Endpoints own protocol
//! state. The only thing that crosses is a [`ChannelEvent`] in and frames
//! out through a [`Channel`].

use heapwire_core::{Channel, ChannelEvent};

/// A protocol participant driven by a single-threaded event loop.
///
/// All calls for one endpoint must come from the same loop. Nothing
/// inside an endpoint locks.
pub trait Endpoint {
    /// React to one event. Frames to send go through `channel`, which is
    /// the connection the event came from.
    fn handle(&mut self, event: ChannelEvent, channel: &mut dyn Channel);
}
