//! Outbound queue — single-in-flight send discipline for one channel.
//!
//! The head of the queue is the packet in flight. It is sent the moment it
//! becomes the head: either on enqueue into an empty queue, or when the
//! previous head is acknowledged. Nothing else is ever handed to the
//! channel, so delivery order equals enqueue order.

use std::collections::VecDeque;

use crate::channel::Channel;
use crate::wire::Packet;

#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<Packet>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `packet`. Sends it immediately if the queue was empty.
    pub fn enqueue(&mut self, packet: Packet, channel: &mut dyn Channel) {
        self.pending.push_back(packet);
        if self.pending.len() == 1 {
            channel.send(self.pending[0].as_bytes());
        }
    }

    /// The in-flight packet was delivered: pop it and send the next head.
    ///
    /// Returns the delivered packet so the caller can recycle its buffer,
    /// or `None` when nothing was in flight. That happens when a write
    /// completes after [`clear`](Self::clear) dropped the connection's
    /// packets; the acknowledgement is stale and nothing is sent.
    pub fn on_delivered(&mut self, channel: &mut dyn Channel) -> Option<Packet> {
        let delivered = self.pending.pop_front()?;
        if let Some(next) = self.pending.front() {
            channel.send(next.as_bytes());
        }
        Some(delivered)
    }

    /// Discard everything, in-flight head included. Used when the channel
    /// closes; the caller recycles the returned packets.
    pub fn clear(&mut self) -> Vec<Packet> {
        self.pending.drain(..).collect()
    }

    /// Packets waiting, including the one in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True while a sent packet awaits its delivery acknowledgment.
    pub fn in_flight(&self) -> bool {
        !self.pending.is_empty()
    }
}
