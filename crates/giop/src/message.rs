//! GIOP messages
//!
//! Every GIOP message starts with a fixed 12-byte header:
//!
//! ```text
//! 0       4       5       6       7       8              12
//! +-------+-------+-------+-------+-------+--------------+
//! | magic | major | minor | flags | type  | message size |
//! | GIOP  |       |       |       |       | (ulong)      |
//! +-------+-------+-------+-------+-------+--------------+
//! ```
//!
//! `flags` bit 0 is the byte order of everything that follows (1 = little
//! endian) and bit 1 marks a message continued by Fragment messages. In
//! GIOP 1.0 the octet is a plain byte-order boolean. CDR alignment of the
//! body is measured from the first byte of the header.
//!
//! Request header layouts differ per minor version:
//!
//! ```text
//! 1.0  service_contexts, request_id, response_expected,
//!      object_key, operation, requesting_principal
//! 1.1  as 1.0, with 3 reserved octets after response_expected
//! 1.2  request_id, response_flags, 3 reserved octets, target (union),
//!      operation, service_contexts; body aligned to 8
//! ```

use crate::error::{GiopError, Result};
use bytes::Bytes;
use corba_cdr::{
    CdrContext, CdrDecode, CdrEncode, CdrReader, CdrWriter, IiopProfile, Ior, TaggedProfile,
};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// GIOP magic bytes
pub const MAGIC: [u8; 4] = *b"GIOP";

/// Size of the fixed message header
pub const HEADER_SIZE: usize = 12;

/// Header flag bits
pub mod flags {
    /// Little-endian body
    pub const BYTE_ORDER: u8 = 0x01;
    /// More fragments follow
    pub const MORE_FRAGMENTS: u8 = 0x02;
}

/// GIOP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };
    pub const V1_1: Version = Version { major: 1, minor: 1 };
    pub const V1_2: Version = Version { major: 1, minor: 2 };

    pub fn new(major: u8, minor: u8) -> Result<Self> {
        if major != 1 || minor > 2 {
            return Err(GiopError::UnsupportedVersion(major, minor));
        }
        Ok(Self { major, minor })
    }

    /// GIOP 1.0 has no Fragment messages
    pub fn supports_fragments(self) -> bool {
        self.minor >= 1
    }

    /// Whether repeated TypeCodes in one message may use indirection
    pub fn reuses_typecodes(self) -> bool {
        self.minor >= 1
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::V1_2
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for Version {
    type Err = GiopError;

    fn from_str(s: &str) -> Result<Self> {
        let (major, minor) = s
            .split_once('.')
            .ok_or_else(|| GiopError::Protocol(format!("bad GIOP version {:?}", s)))?;
        let major = major
            .parse()
            .map_err(|_| GiopError::Protocol(format!("bad GIOP version {:?}", s)))?;
        let minor = minor
            .parse()
            .map_err(|_| GiopError::Protocol(format!("bad GIOP version {:?}", s)))?;
        Version::new(major, minor)
    }
}

/// GIOP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Request = 0,
    Reply = 1,
    CancelRequest = 2,
    LocateRequest = 3,
    LocateReply = 4,
    CloseConnection = 5,
    MessageError = 6,
    Fragment = 7,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0 => MsgType::Request,
            1 => MsgType::Reply,
            2 => MsgType::CancelRequest,
            3 => MsgType::LocateRequest,
            4 => MsgType::LocateReply,
            5 => MsgType::CloseConnection,
            6 => MsgType::MessageError,
            7 => MsgType::Fragment,
            other => return Err(GiopError::InvalidMessageType(other)),
        })
    }
}

/// Fixed GIOP message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: Version,
    pub flags: u8,
    pub msg_type: MsgType,
    /// Bytes following the header
    pub size: u32,
}

impl MessageHeader {
    pub fn little_endian(&self) -> bool {
        self.flags & flags::BYTE_ORDER != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.version.supports_fragments() && self.flags & flags::MORE_FRAGMENTS != 0
    }

    pub fn context(&self) -> CdrContext {
        CdrContext::with_byte_order(self.little_endian())
    }

    /// Parse and validate the first [`HEADER_SIZE`] bytes of a frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(GiopError::Cdr(corba_cdr::CdrError::BufferUnderflow {
                needed: HEADER_SIZE,
                have: data.len(),
            }));
        }
        let magic = [data[0], data[1], data[2], data[3]];
        if magic != MAGIC {
            return Err(GiopError::BadMagic(magic));
        }
        let version = Version::new(data[4], data[5])?;
        let bits = data[6];
        if version == Version::V1_0 && bits > 1 {
            return Err(GiopError::Protocol(format!(
                "GIOP 1.0 byte order octet {}",
                bits
            )));
        }
        let msg_type = MsgType::from_u8(data[7])?;
        let ctx = CdrContext::with_byte_order(bits & flags::BYTE_ORDER != 0);
        let size = ctx.get_u32([data[8], data[9], data[10], data[11]]);
        Ok(Self {
            version,
            flags: bits,
            msg_type,
            size,
        })
    }

    /// Header bytes in the byte order the flags declare
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&MAGIC);
        out[4] = self.version.major;
        out[5] = self.version.minor;
        out[6] = self.flags;
        out[7] = self.msg_type as u8;
        out[8..].copy_from_slice(&self.context().u32_bytes(self.size));
        out
    }

    /// Total frame length including the header
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }
}

/// Service context entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub context_id: u32,
    pub data: Vec<u8>,
}

impl CdrEncode for ServiceContext {
    fn cdr_encode(&self, w: &mut CdrWriter) -> corba_cdr::Result<()> {
        w.write_ulong(self.context_id);
        w.write_octets(&self.data)
    }
}

impl CdrDecode for ServiceContext {
    fn cdr_decode(r: &mut CdrReader<'_>) -> corba_cdr::Result<Self> {
        Ok(Self {
            context_id: r.read_ulong()?,
            data: r.read_octets()?,
        })
    }
}

/// GIOP 1.2 request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Key(Vec<u8>),
    Profile(TaggedProfile),
    Reference { selected_profile_index: u32, ior: Ior },
}

impl TargetAddress {
    /// Object key carried directly or through the selected profile
    pub fn object_key(&self) -> Option<Vec<u8>> {
        match self {
            TargetAddress::Key(key) => Some(key.clone()),
            TargetAddress::Profile(profile) => {
                IiopProfile::from_tagged(profile).ok().map(|p| p.object_key)
            }
            TargetAddress::Reference {
                selected_profile_index,
                ior,
            } => ior
                .profiles
                .get(*selected_profile_index as usize)
                .and_then(|p| IiopProfile::from_tagged(p).ok())
                .map(|p| p.object_key),
        }
    }
}

impl CdrEncode for TargetAddress {
    fn cdr_encode(&self, w: &mut CdrWriter) -> corba_cdr::Result<()> {
        match self {
            TargetAddress::Key(key) => {
                w.write_short(0);
                w.write_octets(key)
            }
            TargetAddress::Profile(profile) => {
                w.write_short(1);
                w.write(profile)
            }
            TargetAddress::Reference {
                selected_profile_index,
                ior,
            } => {
                w.write_short(2);
                w.write_ulong(*selected_profile_index);
                w.write(ior)
            }
        }
    }
}

impl CdrDecode for TargetAddress {
    fn cdr_decode(r: &mut CdrReader<'_>) -> corba_cdr::Result<Self> {
        match r.read_short()? {
            0 => Ok(TargetAddress::Key(r.read_octets()?)),
            1 => Ok(TargetAddress::Profile(r.read()?)),
            2 => Ok(TargetAddress::Reference {
                selected_profile_index: r.read_ulong()?,
                ior: r.read()?,
            }),
            other => Err(corba_cdr::CdrError::InvalidDiscriminant(format!(
                "addressing disposition {}",
                other
            ))),
        }
    }
}

/// Request message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub request_id: u32,
    pub response_expected: bool,
    pub target: TargetAddress,
    pub operation: String,
    pub service_contexts: Vec<ServiceContext>,
    /// Only carried by GIOP 1.0 and 1.1
    pub principal: Vec<u8>,
}

impl RequestHeader {
    pub fn new(request_id: u32, object_key: Vec<u8>, operation: impl Into<String>) -> Self {
        Self {
            request_id,
            response_expected: true,
            target: TargetAddress::Key(object_key),
            operation: operation.into(),
            service_contexts: Vec::new(),
            principal: Vec::new(),
        }
    }

    pub fn oneway(mut self) -> Self {
        self.response_expected = false;
        self
    }

    pub fn object_key(&self) -> Option<Vec<u8>> {
        self.target.object_key()
    }

    /// Write the header; afterwards the writer is positioned at the body
    pub fn encode(&self, w: &mut MessageWriter) -> Result<()> {
        let version = w.version();
        if version.minor < 2 {
            let key = self.object_key().ok_or_else(|| {
                GiopError::Protocol("GIOP 1.0/1.1 requests need an object key".into())
            })?;
            w.write(&self.service_contexts)?;
            w.write_ulong(self.request_id);
            w.write_bool(self.response_expected);
            if version.minor == 1 {
                w.write_raw(&[0; 3]);
            }
            w.write_octets(&key)?;
            w.write_string(&self.operation)?;
            w.write_octets(&self.principal)?;
        } else {
            w.write_ulong(self.request_id);
            w.write_octet(if self.response_expected { 0x03 } else { 0x00 });
            w.write_raw(&[0; 3]);
            w.write(&self.target)?;
            w.write_string(&self.operation)?;
            w.write(&self.service_contexts)?;
            w.begin_body();
        }
        Ok(())
    }

    /// Read the header; afterwards the reader is positioned at the body
    pub fn decode(r: &mut CdrReader<'_>, version: Version) -> Result<Self> {
        if version.minor < 2 {
            let service_contexts = r.read()?;
            let request_id = r.read_ulong()?;
            let response_expected = r.read_bool()?;
            if version.minor == 1 {
                r.read_raw(3)?;
            }
            let key = r.read_octets()?;
            let operation = r.read_string()?;
            let principal = r.read_octets()?;
            Ok(Self {
                request_id,
                response_expected,
                target: TargetAddress::Key(key),
                operation,
                service_contexts,
                principal,
            })
        } else {
            let request_id = r.read_ulong()?;
            let response_flags = r.read_octet()?;
            r.read_raw(3)?;
            let target = r.read()?;
            let operation = r.read_string()?;
            let service_contexts = r.read()?;
            align_body(r, version)?;
            Ok(Self {
                request_id,
                response_expected: response_flags & 0x01 != 0,
                target,
                operation,
                service_contexts,
                principal: Vec::new(),
            })
        }
    }
}

/// Reply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReplyStatus {
    NoException = 0,
    UserException = 1,
    SystemException = 2,
    LocationForward = 3,
    LocationForwardPerm = 4,
    NeedsAddressingMode = 5,
}

impl ReplyStatus {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => ReplyStatus::NoException,
            1 => ReplyStatus::UserException,
            2 => ReplyStatus::SystemException,
            3 => ReplyStatus::LocationForward,
            4 => ReplyStatus::LocationForwardPerm,
            5 => ReplyStatus::NeedsAddressingMode,
            other => return Err(GiopError::Protocol(format!("reply status {}", other))),
        })
    }
}

/// Reply message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub request_id: u32,
    pub status: ReplyStatus,
    pub service_contexts: Vec<ServiceContext>,
}

impl ReplyHeader {
    pub fn new(request_id: u32, status: ReplyStatus) -> Self {
        Self {
            request_id,
            status,
            service_contexts: Vec::new(),
        }
    }

    pub fn encode(&self, w: &mut MessageWriter) -> Result<()> {
        if w.version().minor < 2 {
            w.write(&self.service_contexts)?;
            w.write_ulong(self.request_id);
            w.write_ulong(self.status as u32);
        } else {
            w.write_ulong(self.request_id);
            w.write_ulong(self.status as u32);
            w.write(&self.service_contexts)?;
            w.begin_body();
        }
        Ok(())
    }

    pub fn decode(r: &mut CdrReader<'_>, version: Version) -> Result<Self> {
        if version.minor < 2 {
            let service_contexts = r.read()?;
            let request_id = r.read_ulong()?;
            let status = ReplyStatus::from_u32(r.read_ulong()?)?;
            Ok(Self {
                request_id,
                status,
                service_contexts,
            })
        } else {
            let request_id = r.read_ulong()?;
            let status = ReplyStatus::from_u32(r.read_ulong()?)?;
            let service_contexts = r.read()?;
            align_body(r, version)?;
            Ok(Self {
                request_id,
                status,
                service_contexts,
            })
        }
    }
}

/// LocateRequest message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateRequestHeader {
    pub request_id: u32,
    pub target: TargetAddress,
}

impl LocateRequestHeader {
    pub fn encode(&self, w: &mut MessageWriter) -> Result<()> {
        w.write_ulong(self.request_id);
        if w.version().minor < 2 {
            let key = self
                .target
                .object_key()
                .ok_or_else(|| GiopError::Protocol("locate request needs an object key".into()))?;
            w.write_octets(&key)?;
        } else {
            w.write(&self.target)?;
        }
        Ok(())
    }

    pub fn decode(r: &mut CdrReader<'_>, version: Version) -> Result<Self> {
        let request_id = r.read_ulong()?;
        let target = if version.minor < 2 {
            TargetAddress::Key(r.read_octets()?)
        } else {
            r.read()?
        };
        Ok(Self { request_id, target })
    }
}

/// LocateReply status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LocateStatus {
    UnknownObject = 0,
    ObjectHere = 1,
    ObjectForward = 2,
    ObjectForwardPerm = 3,
    LocSystemException = 4,
    LocNeedsAddressingMode = 5,
}

impl LocateStatus {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => LocateStatus::UnknownObject,
            1 => LocateStatus::ObjectHere,
            2 => LocateStatus::ObjectForward,
            3 => LocateStatus::ObjectForwardPerm,
            4 => LocateStatus::LocSystemException,
            5 => LocateStatus::LocNeedsAddressingMode,
            other => return Err(GiopError::Protocol(format!("locate status {}", other))),
        })
    }
}

/// LocateReply message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateReplyHeader {
    pub request_id: u32,
    pub status: LocateStatus,
}

impl LocateReplyHeader {
    pub fn encode(&self, w: &mut MessageWriter) -> Result<()> {
        w.write_ulong(self.request_id);
        w.write_ulong(self.status as u32);
        w.begin_body();
        Ok(())
    }

    pub fn decode(r: &mut CdrReader<'_>, version: Version) -> Result<Self> {
        let request_id = r.read_ulong()?;
        let status = LocateStatus::from_u32(r.read_ulong()?)?;
        align_body(r, version)?;
        Ok(Self { request_id, status })
    }
}

/// CancelRequest message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequestHeader {
    pub request_id: u32,
}

fn align_body(r: &mut CdrReader<'_>, version: Version) -> Result<()> {
    // an empty body carries no padding
    if version.minor >= 2 && r.remaining() > 0 {
        r.align(8)?;
    }
    Ok(())
}

/// Builds one complete message: header placeholder, then CDR content.
///
/// The writer dereferences to the underlying [`CdrWriter`], so header and
/// body fields are written the same way.
pub struct MessageWriter {
    version: Version,
    msg_type: MsgType,
    w: CdrWriter,
}

impl MessageWriter {
    pub fn new(version: Version, msg_type: MsgType) -> Self {
        Self::with_context(version, msg_type, CdrContext::native())
    }

    pub fn with_context(version: Version, msg_type: MsgType, ctx: CdrContext) -> Self {
        let mut w = CdrWriter::with_capacity(ctx, 256).with_typecode_reuse(version.reuses_typecodes());
        w.write_raw(&[0; HEADER_SIZE]);
        Self {
            version,
            msg_type,
            w,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// Pad to the body alignment of this version
    pub fn begin_body(&mut self) {
        if self.version.minor >= 2 {
            self.w.align(8);
        }
    }

    /// Patch the header and produce the message
    pub fn finish(self) -> Result<Message> {
        let size = self.w.len() - HEADER_SIZE;
        let size = u32::try_from(size).map_err(|_| GiopError::MessageTooLarge {
            size,
            max: u32::MAX as usize,
            request_id: None,
        })?;
        let header = MessageHeader {
            version: self.version,
            flags: self.w.context().flag(),
            msg_type: self.msg_type,
            size,
        };
        let mut buf = self.w.into_inner();
        buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        Ok(Message {
            header,
            frame: buf.freeze(),
        })
    }
}

impl Deref for MessageWriter {
    type Target = CdrWriter;

    fn deref(&self) -> &CdrWriter {
        &self.w
    }
}

impl DerefMut for MessageWriter {
    fn deref_mut(&mut self) -> &mut CdrWriter {
        &mut self.w
    }
}

/// A complete GIOP message: header plus the whole frame it was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub frame: Bytes,
}

impl Message {
    /// Wrap a frame, validating its header and length
    pub fn from_frame(frame: Bytes) -> Result<Self> {
        let header = MessageHeader::decode(&frame)?;
        if frame.len() != header.frame_len() {
            return Err(GiopError::Protocol(format!(
                "frame of {} bytes declares {}",
                frame.len(),
                header.frame_len()
            )));
        }
        Ok(Self { header, frame })
    }

    /// A message with no body, such as CloseConnection or MessageError
    pub fn header_only(version: Version, msg_type: MsgType) -> Self {
        let header = MessageHeader {
            version,
            flags: CdrContext::native().flag(),
            msg_type,
            size: 0,
        };
        Self {
            header,
            frame: Bytes::copy_from_slice(&header.encode()),
        }
    }

    pub fn cancel_request(version: Version, request_id: u32) -> Result<Self> {
        let mut w = MessageWriter::new(version, MsgType::CancelRequest);
        w.write_ulong(request_id);
        w.finish()
    }

    pub fn msg_type(&self) -> MsgType {
        self.header.msg_type
    }

    pub fn version(&self) -> Version {
        self.header.version
    }

    pub fn body(&self) -> Bytes {
        self.frame.slice(HEADER_SIZE..)
    }

    /// Reader positioned after the fixed header, aligned from frame start
    pub fn reader(&self) -> CdrReader<'_> {
        let mut r = CdrReader::new(&self.frame, self.header.context());
        // the frame is at least HEADER_SIZE long, so this cannot fail
        let _ = r.set_position(HEADER_SIZE);
        r
    }

    /// Request id of any message kind that carries one
    pub fn request_id(&self) -> Option<u32> {
        peek_request_id(&self.header, &self.frame)
    }
}

/// Recover the request id from the start of a frame.
///
/// Works on a truncated prefix as long as the id itself is present.
pub fn peek_request_id(header: &MessageHeader, frame: &[u8]) -> Option<u32> {
    let mut r = CdrReader::new(frame, header.context());
    r.set_position(HEADER_SIZE).ok()?;
    match header.msg_type {
        MsgType::Request | MsgType::Reply if header.version.minor < 2 => {
            let _: Vec<ServiceContext> = r.read().ok()?;
            r.read_ulong().ok()
        }
        MsgType::Request
        | MsgType::Reply
        | MsgType::CancelRequest
        | MsgType::LocateRequest
        | MsgType::LocateReply => r.read_ulong().ok(),
        MsgType::Fragment if header.version.minor >= 2 => r.read_ulong().ok(),
        _ => None,
    }
}
