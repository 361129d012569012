//! General Inter-ORB Protocol
//!
//! Message codec, fragmentation, framing and connection handling for GIOP
//! 1.0, 1.1 and 1.2 over any reliable byte stream (IIOP when the stream is
//! TCP).
//!
//! ```text
//! +-------------------+  +--------------------+
//! | Connection (pool) |  | GiopServer         |   request/reply matching
//! +-------------------+  +--------------------+
//! | FragmentGenerator / FragmentAssembler     |   1.1/1.2 fragments
//! +-------------------------------------------+
//! | GiopTransport / FrameDecoder              |   12-octet headers, size limit
//! +-------------------------------------------+
//! | Transport (TcpTransport)                  |   byte streams
//! +-------------------------------------------+
//! ```

pub mod connection;
pub mod error;
pub mod exception;
pub mod fragmentation;
pub mod framing;
pub mod message;
pub mod server;
pub mod transport;

pub use connection::{
    Connection, ConnectionConfig, ConnectionLease, ConnectionPool, PendingReply, ReplyResult,
};
pub use error::{GiopError, Result};
pub use exception::{cdr_error_exception, CompletionStatus, SystemException, SystemExceptionKind};
pub use fragmentation::{FragmentAssembler, FragmentGenerator, MIN_FRAGMENT_SIZE};
pub use framing::{Frame, FrameDecoder, GiopTransport, DEFAULT_MAX_MESSAGE_SIZE};
pub use message::{
    flags, peek_request_id, CancelRequestHeader, LocateReplyHeader, LocateRequestHeader,
    LocateStatus, Message, MessageHeader, MessageWriter, MsgType, ReplyHeader, ReplyStatus,
    RequestHeader, ServiceContext, TargetAddress, Version, HEADER_SIZE, MAGIC,
};
pub use server::{
    system_exception_reply, GiopServer, GiopServerConfig, IncomingRequest, RequestHandler,
    ServerStats, ServerStatsSnapshot,
};
pub use transport::{
    AsyncStream, BoxedStream, Endpoint, TcpTransport, Transport, TransportListener,
};
