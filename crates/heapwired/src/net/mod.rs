//! TCP binding for the channel seam.

pub mod framing;
pub mod link;

pub use link::{channel_of, next_event, Link};
