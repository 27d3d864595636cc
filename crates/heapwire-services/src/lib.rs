//! heapwire-services — the protocol endpoints.
//!
//! Every endpoint here is sans-IO: it consumes [`ChannelEvent`]s on one
//! loop and writes through a [`Channel`]. The daemon supplies the loops,
//! sockets and threads.
//!
//! [`ChannelEvent`]: heapwire_core::ChannelEvent
//! [`Channel`]: heapwire_core::Channel

pub mod batch;
pub mod files;
pub mod observer;
pub mod producer;
pub mod service;
pub mod session;
pub mod snapshot;

pub use batch::{BatchSettings, StatBatcher};
pub use files::{FileStore, LocalFiles};
pub use observer::{SessionObserver, SnapshotChunk, SnapshotSink};
pub use producer::{SnapshotProducer, StatsProducer};
pub use service::Endpoint;
pub use session::client::{ClientSession, ClientState};
pub use session::server::{ServerSession, ServerState};
pub use snapshot::receiver::SnapshotReceiver;
pub use snapshot::sender::SnapshotSender;
pub use snapshot::{SnapshotCommand, SnapshotEndpoint, SnapshotHandle, SnapshotJob, TransferError};
