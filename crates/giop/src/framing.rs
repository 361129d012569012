//! GIOP framing over byte streams
//!
//! GIOP messages are self-delimiting through the size field of the fixed
//! header. [`FrameDecoder`] cuts a byte stream into frames:
//!
//! ```text
//!            header complete,               body complete
//!            size <= max                    -> Frame::Message
//! AwaitingHeader ---------> AwaitingBody ------------------+
//!      ^   |                                               |
//!      |   | size > max                                    |
//!      |   +-----------> Discarding (keeps a short prefix) |
//!      |                     | all declared bytes skipped  |
//!      |                     v -> Frame::Oversized         |
//!      +-----------------------------------------------------+
//! ```
//!
//! An oversized frame is never buffered; only enough of its start is kept
//! to recover the request id, so a single request can be failed while the
//! connection stays usable.

use crate::error::{GiopError, Result};
use crate::message::{peek_request_id, Message, MessageHeader, HEADER_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

/// Default ceiling for a single GIOP message (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Bytes of an oversized frame kept for request id recovery
const OVERSIZED_PREFIX: usize = 256;

/// Output of the frame decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Message),
    /// A frame that exceeded the size limit and was skipped
    Oversized {
        header: MessageHeader,
        request_id: Option<u32>,
    },
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingBody(MessageHeader),
    Discarding {
        header: MessageHeader,
        remaining: usize,
        prefix: BytesMut,
    },
}

/// Incremental GIOP frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    max_message_size: usize,
    state: State,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            state: State::AwaitingHeader,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Whether the decoder sits between frames
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingHeader)
    }

    /// Try to take one frame out of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A malformed header is
    /// an error; the stream cannot be resynchronized after one.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match &mut self.state {
                State::AwaitingHeader => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = MessageHeader::decode(&buf[..HEADER_SIZE])?;
                    let frame_len = header.frame_len();
                    if frame_len > self.max_message_size {
                        warn!(
                            size = frame_len,
                            max = self.max_message_size,
                            "discarding oversized {:?} frame",
                            header.msg_type
                        );
                        self.state = State::Discarding {
                            header,
                            remaining: frame_len,
                            prefix: BytesMut::with_capacity(OVERSIZED_PREFIX),
                        };
                    } else {
                        self.state = State::AwaitingBody(header);
                    }
                }
                State::AwaitingBody(header) => {
                    let frame_len = header.frame_len();
                    if buf.len() < frame_len {
                        buf.reserve(frame_len - buf.len());
                        return Ok(None);
                    }
                    let header = *header;
                    let frame: Bytes = buf.split_to(frame_len).freeze();
                    self.state = State::AwaitingHeader;
                    trace!(len = frame_len, "frame {:?}", header.msg_type);
                    return Ok(Some(Frame::Message(Message { header, frame })));
                }
                State::Discarding {
                    header,
                    remaining,
                    prefix,
                } => {
                    let take = (*remaining).min(buf.len());
                    let keep = take.min(OVERSIZED_PREFIX - prefix.len());
                    prefix.extend_from_slice(&buf[..keep]);
                    buf.advance(take);
                    *remaining -= take;
                    if *remaining > 0 {
                        return Ok(None);
                    }
                    let header = *header;
                    let request_id = peek_request_id(&header, &prefix[..]);
                    self.state = State::AwaitingHeader;
                    return Ok(Some(Frame::Oversized { header, request_id }));
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

/// GIOP transport for reading and writing whole frames
pub struct GiopTransport<T> {
    inner: T,
    read_buf: BytesMut,
    decoder: FrameDecoder,
}

impl<T> GiopTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            read_buf: BytesMut::with_capacity(8192),
            decoder: FrameDecoder::default(),
        }
    }

    pub fn with_max_message_size(mut self, max_size: usize) -> Self {
        self.decoder = FrameDecoder::new(max_size);
        self
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: AsyncRead + Unpin> GiopTransport<T> {
    /// Read the next frame
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(frame);
            }
            if self.read_buf.capacity() - self.read_buf.len() < 4096 {
                self.read_buf.reserve(8192);
            }
            let n = self.inner.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() && self.decoder.is_idle() {
                    return Err(GiopError::ConnectionClosed);
                }
                return Err(GiopError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("connection closed inside a frame ({} bytes buffered)", self.read_buf.len()),
                )));
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> GiopTransport<T> {
    /// Write an encoded frame
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_frames(&mut self, frames: &[Bytes]) -> Result<()> {
        for frame in frames {
            self.inner.write_all(frame).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
