//! GIOP message fragmentation
//!
//! A message larger than the negotiated fragment size is sent as an
//! initial message with the MORE_FRAGMENTS flag set, followed by Fragment
//! messages carrying the rest of the bytes:
//!
//! ```text
//! GIOP 1.1   [header|more][body part 1]  [Fragment|more][part 2] ... [Fragment][part n]
//! GIOP 1.2   [header|more][body part 1]  [Fragment|more][request_id][part 2] ...
//! ```
//!
//! GIOP 1.2 fragments name the request they continue, so fragments of
//! several requests may interleave on one connection; every fragment but
//! the last ends on an 8-octet boundary. GIOP 1.1 allows one fragmented
//! message in flight per direction. GIOP 1.0 never fragments.
//!
//! The receiver rebuilds the original message by concatenating the
//! fragment payloads, so body alignment is the same as if the message had
//! been sent whole. Each partial message is bounded by the maximum message
//! size, and the number of partial messages open at once is bounded too,
//! so a peer cannot hold unbounded memory by never finishing them.

use crate::error::{GiopError, Result};
use crate::message::{flags, peek_request_id, Message, MessageHeader, MsgType, HEADER_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Smallest fragment size the generator will work with
pub const MIN_FRAGMENT_SIZE: usize = 64;

/// Fragmented messages one connection may have open at once, counting
/// refused ones whose last fragment has not arrived
pub const DEFAULT_MAX_PARTIALS: usize = 64;

fn round_down_8(n: usize) -> usize {
    n & !7
}

/// Splits outgoing messages into fragments
pub struct FragmentGenerator;

impl FragmentGenerator {
    /// Split a complete message into frames no longer than `max_fragment`.
    ///
    /// Returns the message unchanged when it fits, or when the version has
    /// no fragmentation.
    pub fn fragment(message: &Message, max_fragment: usize) -> Result<Vec<Bytes>> {
        let version = message.header.version;
        let max_fragment = max_fragment.max(MIN_FRAGMENT_SIZE);
        if !version.supports_fragments() || message.frame.len() <= max_fragment {
            return Ok(vec![message.frame.clone()]);
        }

        let request_id = if version.minor >= 2 {
            Some(message.request_id().ok_or_else(|| {
                GiopError::Fragment(format!(
                    "{:?} message cannot be fragmented",
                    message.header.msg_type
                ))
            })?)
        } else {
            None
        };

        let ctx = message.header.context();
        let frame = &message.frame;
        let first_len = round_down_8(max_fragment);
        let mut out = Vec::new();

        let mut first = BytesMut::from(&frame[..first_len]);
        let header = MessageHeader {
            flags: message.header.flags | flags::MORE_FRAGMENTS,
            size: (first_len - HEADER_SIZE) as u32,
            ..message.header
        };
        first[..HEADER_SIZE].copy_from_slice(&header.encode());
        out.push(first.freeze());

        let overhead = HEADER_SIZE + if request_id.is_some() { 4 } else { 0 };
        let chunk = round_down_8(max_fragment - overhead);
        let mut offset = first_len;
        while offset < frame.len() {
            let end = (offset + chunk).min(frame.len());
            let last = end == frame.len();
            let header = MessageHeader {
                version,
                flags: ctx.flag() | if last { 0 } else { flags::MORE_FRAGMENTS },
                msg_type: MsgType::Fragment,
                size: (overhead - HEADER_SIZE + end - offset) as u32,
            };
            let mut buf = BytesMut::with_capacity(header.frame_len());
            buf.put_slice(&header.encode());
            if let Some(id) = request_id {
                buf.put_slice(&ctx.u32_bytes(id));
            }
            buf.put_slice(&frame[offset..end]);
            out.push(buf.freeze());
            offset = end;
        }

        trace!(
            fragments = out.len(),
            total = frame.len(),
            "fragmented {:?} message",
            message.header.msg_type
        );
        Ok(out)
    }
}

struct Partial {
    header: MessageHeader,
    data: BytesMut,
}

/// Rebuilds fragmented incoming messages
pub struct FragmentAssembler {
    max_message_size: usize,
    max_partials: usize,
    /// GIOP 1.1 permits a single fragmented message at a time
    pending_v1_1: Option<Partial>,
    pending_v1_2: HashMap<u32, Partial>,
    /// Messages refused as too large whose remaining fragments are dropped
    refused_v1_1: bool,
    refused_v1_2: HashSet<u32>,
}

impl FragmentAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            max_partials: DEFAULT_MAX_PARTIALS,
            pending_v1_1: None,
            pending_v1_2: HashMap::new(),
            refused_v1_1: false,
            refused_v1_2: HashSet::new(),
        }
    }

    pub fn with_max_partials(mut self, max_partials: usize) -> Self {
        self.max_partials = max_partials.max(1);
        self
    }

    /// Number of messages still waiting for fragments
    pub fn pending(&self) -> usize {
        self.pending_v1_2.len() + self.pending_v1_1.is_some() as usize
    }

    /// Feed one received message.
    ///
    /// # Returns
    /// * `Ok(Some(message))` - a complete message, possibly reassembled
    /// * `Ok(None)` - the message was a fragment and more are expected
    /// * `Err(_)` - fragmentation protocol violation
    pub fn push(&mut self, message: Message) -> Result<Option<Message>> {
        let header = message.header;
        if header.msg_type != MsgType::Fragment {
            if !header.more_fragments() {
                return Ok(Some(message));
            }
            return self.start(message).map(|_| None);
        }

        if !header.version.supports_fragments() {
            return Err(GiopError::Fragment("Fragment message in GIOP 1.0".into()));
        }

        let (key, payload_start) = if header.version.minor >= 2 {
            let id = peek_request_id(&header, &message.frame)
                .ok_or_else(|| GiopError::Fragment("fragment without request id".into()))?;
            (Some(id), HEADER_SIZE + 4)
        } else {
            (None, HEADER_SIZE)
        };

        if self.skip_refused(key, header.more_fragments()) {
            return Ok(None);
        }

        let mut partial = match key {
            Some(id) => self.pending_v1_2.remove(&id),
            None => self.pending_v1_1.take(),
        }
        .ok_or_else(|| GiopError::Fragment(format!("unexpected fragment for {:?}", key)))?;

        let payload = message.frame.get(payload_start..).unwrap_or_default();
        if partial.data.len() + payload.len() > self.max_message_size {
            if header.more_fragments() {
                match key {
                    Some(id) => {
                        self.refused_v1_2.insert(id);
                    }
                    None => self.refused_v1_1 = true,
                }
            }
            return Err(GiopError::MessageTooLarge {
                size: partial.data.len() + payload.len(),
                max: self.max_message_size,
                request_id: key.or_else(|| peek_request_id(&partial.header, &partial.data)),
            });
        }
        partial.data.extend_from_slice(payload);

        if header.more_fragments() {
            match key {
                Some(id) => {
                    self.pending_v1_2.insert(id, partial);
                }
                None => self.pending_v1_1 = Some(partial),
            }
            return Ok(None);
        }

        Ok(Some(Self::finish(partial)?))
    }

    /// Whether a fragment belongs to a refused message; the last one
    /// clears the mark
    fn skip_refused(&mut self, key: Option<u32>, more: bool) -> bool {
        let refused = match key {
            Some(id) if more => self.refused_v1_2.contains(&id),
            Some(id) => self.refused_v1_2.remove(&id),
            None => {
                let refused = self.refused_v1_1;
                self.refused_v1_1 = refused && more;
                refused
            }
        };
        if refused {
            trace!(request_id = ?key, "dropped fragment of refused message");
        }
        refused
    }

    fn start(&mut self, message: Message) -> Result<()> {
        let header = message.header;
        let partial = Partial {
            header,
            data: BytesMut::from(&message.frame[..]),
        };
        if header.version.minor >= 2 {
            let id = message.request_id().ok_or_else(|| {
                GiopError::Fragment(format!("{:?} cannot be fragmented", header.msg_type))
            })?;
            let open = self.pending_v1_2.len() + self.refused_v1_2.len();
            if open >= self.max_partials && !self.pending_v1_2.contains_key(&id) {
                return Err(GiopError::Fragment(format!(
                    "request {} would exceed {} open fragmented messages",
                    id, self.max_partials
                )));
            }
            if self.pending_v1_2.insert(id, partial).is_some() {
                return Err(GiopError::Fragment(format!(
                    "request {} restarted while fragments pending",
                    id
                )));
            }
        } else {
            if self.pending_v1_1.is_some() {
                return Err(GiopError::Fragment(
                    "second fragmented message before the first completed".into(),
                ));
            }
            self.pending_v1_1 = Some(partial);
        }
        Ok(())
    }

    fn finish(partial: Partial) -> Result<Message> {
        let mut data = partial.data;
        let header = MessageHeader {
            flags: partial.header.flags & !flags::MORE_FRAGMENTS,
            size: (data.len() - HEADER_SIZE) as u32,
            ..partial.header
        };
        data[..HEADER_SIZE].copy_from_slice(&header.encode());
        Ok(Message {
            header,
            frame: data.freeze(),
        })
    }

    /// Drop any partial message for a request, e.g. after it was cancelled
    pub fn discard(&mut self, request_id: u32) {
        self.pending_v1_2.remove(&request_id);
    }
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}
