//! Client role — runs inside the profiling tool.
//!
//! Requests a token as soon as the channel opens, remembering the last
//! token across reconnects so the server can recognise a resumed session.
//! At most one snapshot request is outstanding at a time.

use heapwire_core::wire::parse_frame;
use heapwire_core::{Channel, ChannelEvent, MessageType, OutboundQueue, Packet, Status};

use super::token_hex;
use crate::observer::SessionObserver;
use crate::service::Endpoint;
use crate::snapshot::SnapshotHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    TokenRequested,
    Active,
}

pub struct ClientSession {
    state: ClientState,
    /// Last token the server gave us. 0 before the first handshake.
    token: u32,
    token_requested: bool,
    can_request_snapshot: bool,
    observer: Box<dyn SessionObserver>,
    transfer: SnapshotHandle,
    /// Host the snapshot endpoint dials.
    peer: String,
    queue: OutboundQueue,
}

impl ClientSession {
    pub fn new(observer: Box<dyn SessionObserver>, transfer: SnapshotHandle, peer: impl Into<String>) -> Self {
        Self {
            state: ClientState::Idle,
            token: 0,
            token_requested: false,
            can_request_snapshot: false,
            observer,
            transfer,
            peer: peer.into(),
            queue: OutboundQueue::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn token(&self) -> u32 {
        self.token
    }

    /// Ask the server for a heap snapshot.
    ///
    /// Returns false, sending nothing, before the token request went out
    /// or while an earlier request is still unanswered.
    pub fn request_snapshot(&mut self, channel: &mut dyn Channel) -> bool {
        if !(self.token_requested && self.can_request_snapshot) {
            tracing::debug!(state = ?self.state, "snapshot request not allowed now");
            return false;
        }
        self.can_request_snapshot = false;
        self.queue.enqueue(
            Packet::bare(MessageType::RequestSnapshot, Status::Success, self.token),
            channel,
        );
        true
    }

    fn on_opened(&mut self, channel: &mut dyn Channel) {
        tracing::debug!(token = %token_hex(self.token), "requesting session token");
        self.queue.enqueue(
            Packet::bare(MessageType::RequestToken, Status::Success, self.token),
            channel,
        );
        self.state = ClientState::TokenRequested;
        self.token_requested = true;
        self.can_request_snapshot = true;
    }

    fn on_closed(&mut self, reason: &str) {
        tracing::info!(reason, "connection lost");
        self.queue.clear();
        self.state = ClientState::Idle;
        self.token_requested = false;
        self.can_request_snapshot = false;
        self.observer.on_connection_lost(reason);
        self.transfer.stop();
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let frame = match parse_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(error = %e, "malformed frame dropped");
                return;
            }
        };
        match frame.kind() {
            Ok(MessageType::ReplyToken) => {
                let new_session = !frame.payload.is_empty();
                if new_session {
                    self.observer.on_new_session(frame.payload);
                } else {
                    self.observer.on_resumed_session();
                }
                self.token = frame.token();
                self.state = ClientState::Active;
                tracing::info!(new_session, token = %token_hex(self.token), "session established");
                self.transfer
                    .start(new_session, self.token, Some(self.peer.clone()));
            }
            Ok(MessageType::ReplySnapshot) => {
                self.can_request_snapshot = true;
                let status = frame.status().unwrap_or(Status::Error);
                tracing::debug!(?status, "snapshot reply");
                self.observer.on_snapshot_reply(status);
            }
            Ok(MessageType::AutoStat) => {
                self.observer.on_stats(frame.payload, frame.item_count());
            }
            Ok(kind) => tracing::trace!(?kind, "unexpected frame dropped"),
            Err(e) => tracing::trace!(error = %e, "frame dropped"),
        }
    }
}

impl Endpoint for ClientSession {
    fn handle(&mut self, event: ChannelEvent, channel: &mut dyn Channel) {
        match event {
            ChannelEvent::Opened => self.on_opened(channel),
            ChannelEvent::Closed(reason) => self.on_closed(&reason),
            ChannelEvent::Received(bytes) => self.on_frame(&bytes),
            ChannelEvent::Delivered => {
                if self.queue.on_delivered(channel).is_none() {
                    tracing::warn!("delivery acknowledged with nothing in flight, ignored");
                }
            }
            ChannelEvent::Tick(_) => {}
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state)
            .field("token", &token_hex(self.token))
            .field("can_request_snapshot", &self.can_request_snapshot)
            .field("peer", &self.peer)
            .finish()
    }
}
