//! heapwire-core — wire format, packet buffers and the channel seam.
//! The protocol endpoints in heapwire-services and the daemon build on this.

pub mod channel;
pub mod config;
pub mod pool;
pub mod queue;
pub mod wire;

pub use channel::{Channel, ChannelEvent, Disconnected, Recorder};
pub use pool::PacketPool;
pub use queue::OutboundQueue;
pub use wire::{MessageType, Packet, PacketHeader, SnapshotChunkParams, Status};
