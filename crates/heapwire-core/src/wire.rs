//! heapwire wire format — the bytes that cross both channels.
//!
//! Every message is a 16-byte [`PacketHeader`] followed by its payload.
//! Snapshot chunks carry a 16-byte [`SnapshotChunkParams`] block between
//! the header and the chunk bytes.
//!
//! All integers are little-endian on the wire, whatever the host order.
//! The structs are built from zerocopy byte-order integers, so they have
//! alignment 1 and can be viewed in place over any receive buffer. There is
//! no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::pool::PoolSlot;

type U16Le = U16<LittleEndian>;
type U32Le = U32<LittleEndian>;

// ── Packet Header ─────────────────────────────────────────────────────────────

/// Fixed header at the start of every message on either channel.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Total message length in bytes, header included.
    /// Receivers drop any message whose byte count disagrees.
    pub length: U32Le,

    /// Message kind, see [`MessageType`].
    pub kind: U16Le,

    /// Result code, see [`Status`].
    pub status: U16Le,

    /// Number of fixed-size items batched in the payload. 0 if not applicable.
    pub item_count: U16Le,

    /// Reserved, always zero.
    pub flags: U16Le,

    /// Session token. 0 is never an assigned token.
    pub token: U32Le,
}

assert_eq_size!(PacketHeader, [u8; 16]);

/// Header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<PacketHeader>();

// ── Snapshot Chunk Params ─────────────────────────────────────────────────────

/// Describes one slice of a snapshot file. Follows the header in every
/// successful `AUTO_SNAPSHOT` message; the chunk bytes follow it.
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct SnapshotChunkParams {
    /// bit 0: payload compressed. Never set by this implementation.
    pub flags: U32Le,

    /// Full size of the file being transferred.
    pub total_size: U32Le,

    /// Offset of this chunk within the file.
    pub chunk_offset: U32Le,

    /// Length of the chunk bytes that follow.
    pub chunk_size: U32Le,
}

assert_eq_size!(SnapshotChunkParams, [u8; 16]);

/// Chunk parameter block size in bytes.
pub const PARAMS_LEN: usize = std::mem::size_of::<SnapshotChunkParams>();

impl SnapshotChunkParams {
    pub fn new(total_size: u32, chunk_offset: u32, chunk_size: u32) -> Self {
        Self {
            flags: U32Le::new(0),
            total_size: U32Le::new(total_size),
            chunk_offset: U32Le::new(chunk_offset),
            chunk_size: U32Le::new(chunk_size),
        }
    }
}

// ── Message Types ─────────────────────────────────────────────────────────────

/// Value of [`PacketHeader::kind`].
///
/// Requests go client → server, replies answer them, `Auto*` messages are
/// unsolicited server pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    RequestToken = 0,
    RequestSnapshot = 1,
    ReplyToken = 100,
    ReplySnapshot = 101,
    AutoStat = 200,
    AutoSnapshot = 201,
}

impl TryFrom<u16> for MessageType {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, WireError> {
        match value {
            0 => Ok(MessageType::RequestToken),
            1 => Ok(MessageType::RequestSnapshot),
            100 => Ok(MessageType::ReplyToken),
            101 => Ok(MessageType::ReplySnapshot),
            200 => Ok(MessageType::AutoStat),
            201 => Ok(MessageType::AutoSnapshot),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(kind: MessageType) -> u16 {
        kind as u16
    }
}

/// Value of [`PacketHeader::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0,
    Error = 1,
    /// The request arrived before the token handshake completed.
    TokenRequired = 2,
    /// Reserved. The peer cannot fulfil the request right now.
    Busy = 3,
}

impl TryFrom<u16> for Status {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, WireError> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::Error),
            2 => Ok(Status::TokenRequired),
            3 => Ok(Status::Busy),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 {
        status as u16
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest message either side will emit or accept, header included.
pub const MAX_FRAME_LEN: usize = 63 * 1024;

/// Default snapshot chunk size: whatever fits in one frame after the
/// header and parameter block.
pub const DEFAULT_CHUNK_SIZE: u32 = (MAX_FRAME_LEN - HEADER_LEN - PARAMS_LEN) as u32;

// ── Packet ────────────────────────────────────────────────────────────────────

/// A complete outgoing message: header and payload in one allocation.
///
/// The buffer is zeroed on construction. The header stays zero until the
/// owner calls [`Packet::fill_header`]; `length` always tracks the real
/// buffer size once filled.
#[derive(Debug)]
pub struct Packet {
    buf: Vec<u8>,
    slot: Option<PoolSlot>,
}

impl Packet {
    /// Allocate a packet whose payload holds exactly `payload_len` bytes.
    pub fn new(payload_len: usize) -> Self {
        Self {
            buf: vec![0u8; HEADER_LEN + payload_len],
            slot: None,
        }
    }

    /// Wrap a buffer checked out of a [`PacketPool`](crate::PacketPool).
    pub(crate) fn pooled(buf: Vec<u8>, slot: PoolSlot) -> Self {
        debug_assert!(buf.len() >= HEADER_LEN);
        Self {
            buf,
            slot: Some(slot),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, Option<PoolSlot>) {
        (self.buf, self.slot)
    }

    /// Build a successful `AUTO_SNAPSHOT` chunk with room for
    /// `params.chunk_size` bytes. The caller fills [`Packet::chunk_bytes_mut`].
    pub fn snapshot_chunk(token: u32, params: &SnapshotChunkParams) -> Self {
        let mut packet = Packet::new(PARAMS_LEN + params.chunk_size.get() as usize);
        packet.fill_header(MessageType::AutoSnapshot, Status::Success, 0, token);
        packet.payload_mut()[..PARAMS_LEN].copy_from_slice(params.as_bytes());
        packet
    }

    /// Header-only message.
    pub fn bare(kind: MessageType, status: Status, token: u32) -> Self {
        let mut packet = Packet::new(0);
        packet.fill_header(kind, status, 0, token);
        packet
    }

    /// Total byte length, header included.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn payload_len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    /// True if this packet's buffer belongs to a pool slot.
    pub fn is_pooled(&self) -> bool {
        self.slot.is_some()
    }

    pub fn header(&self) -> &PacketHeader {
        PacketHeader::ref_from_prefix(&self.buf).expect("packet buffer is never shorter than a header")
    }

    pub fn header_mut(&mut self) -> &mut PacketHeader {
        PacketHeader::mut_from_prefix(&mut self.buf)
            .expect("packet buffer is never shorter than a header")
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HEADER_LEN..]
    }

    /// Chunk bytes of a packet built by [`Packet::snapshot_chunk`].
    pub fn chunk_bytes_mut(&mut self) -> &mut [u8] {
        let start = (HEADER_LEN + PARAMS_LEN).min(self.buf.len());
        &mut self.buf[start..]
    }

    /// The exact bytes handed to the channel.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Populate every header field. `length` is set from the buffer size.
    pub fn fill_header(&mut self, kind: MessageType, status: Status, item_count: u16, token: u32) {
        let length = self.buf.len() as u32;
        let header = self.header_mut();
        header.length.set(length);
        header.kind.set(kind.into());
        header.status.set(status.into());
        header.item_count.set(item_count);
        header.flags.set(0);
        header.token.set(token);
    }

    /// Shrink the payload to `payload_len` bytes and keep `length` in step.
    /// No-op if the payload is already that short.
    pub fn truncate_payload(&mut self, payload_len: usize) {
        if payload_len < self.payload_len() {
            self.buf.truncate(HEADER_LEN + payload_len);
            let length = self.buf.len() as u32;
            self.header_mut().length.set(length);
        }
    }
}

// ── Receiving ─────────────────────────────────────────────────────────────────

/// A received message that passed the framing check.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    pub fn kind(&self) -> Result<MessageType, WireError> {
        MessageType::try_from(self.header.kind.get())
    }

    pub fn status(&self) -> Result<Status, WireError> {
        Status::try_from(self.header.status.get())
    }

    pub fn token(&self) -> u32 {
        self.header.token.get()
    }

    pub fn item_count(&self) -> u16 {
        self.header.item_count.get()
    }
}

/// The protocol's only framing-integrity check: at least a full header,
/// and a declared `length` equal to the received byte count.
///
/// This catches truncation and misframing, not corruption. Callers drop
/// failing messages without telling anyone.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame<'_>, WireError> {
    let header = PacketHeader::read_from_prefix(bytes).ok_or(WireError::TooShort(bytes.len()))?;
    let declared = header.length.get() as usize;
    if declared != bytes.len() {
        return Err(WireError::LengthMismatch {
            declared,
            received: bytes.len(),
        });
    }
    Ok(Frame {
        header,
        payload: &bytes[HEADER_LEN..],
    })
}

/// Split a successful `AUTO_SNAPSHOT` payload into its parameter block and
/// chunk bytes. The trailing byte count must equal `chunk_size`.
pub fn decode_chunk(payload: &[u8]) -> Result<(SnapshotChunkParams, &[u8]), WireError> {
    let params =
        SnapshotChunkParams::read_from_prefix(payload).ok_or(WireError::TooShort(payload.len()))?;
    let bytes = &payload[PARAMS_LEN..];
    let declared = params.chunk_size.get() as usize;
    if declared != bytes.len() {
        return Err(WireError::LengthMismatch {
            declared,
            received: bytes.len(),
        });
    }
    Ok((params, bytes))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message too short: {0} bytes")]
    TooShort(usize),

    #[error("declared length {declared} does not match {received} received bytes")]
    LengthMismatch { declared: usize, received: usize },

    #[error("unknown message type: {0}")]
    UnknownType(u16),

    #[error("unknown status: {0}")]
    UnknownStatus(u16),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
