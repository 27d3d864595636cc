//! Message delimiting on a byte stream.
//!
//! TCP has no message boundaries, so the header's `length` field doubles
//! as the delimiter: read 16 bytes, then the rest of the declared length.
//! A length that cannot belong to a real message (shorter than a header,
//! longer than the largest frame) means the stream is out of step and the
//! connection is unusable.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use heapwire_core::wire::{HEADER_LEN, MAX_FRAME_LEN};

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("declared length {0} cannot be delimited")]
    BadLength(u32),

    #[error("stream ended inside a frame")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Read one whole message. `Ok(None)` is a clean end of stream between
/// messages.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(FramingError::Truncated),
            n => filled += n,
        }
    }

    // `length` is the first field, little-endian.
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let total = length as usize;
    if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&total) {
        return Err(FramingError::BadLength(length));
    }

    let mut frame = BytesMut::with_capacity(total);
    frame.extend_from_slice(&header);
    frame.resize(total, 0);
    reader
        .read_exact(&mut frame[HEADER_LEN..])
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FramingError::Truncated,
            _ => FramingError::Io(e),
        })?;
    Ok(Some(frame.freeze()))
}

/// Write one message and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
