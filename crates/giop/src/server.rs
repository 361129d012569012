//! GIOP server
//!
//! Accepts connections and hands each complete Request or LocateRequest to
//! a [`RequestHandler`].
//!
//! # Concurrency
//!
//! - Each connection runs in its own Tokio task
//! - Each request runs in its own task, so a slow operation never blocks
//!   the connection it arrived on
//! - A semaphore bounds the number of open connections
//! - Replies share a per-connection writer and may leave in any order
//! - On shutdown a connection stops reading, lets the requests it already
//!   accepted reply, and only then sends CloseConnection

use crate::error::{GiopError, Result};
use crate::exception::{CompletionStatus, SystemException, SystemExceptionKind};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::framing::{Frame, GiopTransport, DEFAULT_MAX_MESSAGE_SIZE};
use crate::message::{
    LocateRequestHeader, Message, MessageWriter, MsgType, ReplyHeader, ReplyStatus, RequestHeader,
    Version,
};
use crate::transport::{BoxedStream, Endpoint, TcpTransport, Transport, TransportListener};
use async_trait::async_trait;
use corba_cdr::CdrReader;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::WriteHalf;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tracing::{debug, info, trace, warn};

/// A decoded request waiting to be dispatched
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub header: RequestHeader,
    pub message: Message,
    body_offset: usize,
    pub peer: String,
}

impl IncomingRequest {
    /// Decode the request header of a complete Request message
    pub fn decode(message: Message, peer: impl Into<String>) -> Result<Self> {
        let (header, body_offset) = {
            let mut r = message.reader();
            let header = RequestHeader::decode(&mut r, message.version())?;
            (header, r.position())
        };
        Ok(Self {
            header,
            message,
            body_offset,
            peer: peer.into(),
        })
    }

    pub fn version(&self) -> Version {
        self.message.version()
    }

    /// Reader positioned at the first argument
    pub fn body_reader(&self) -> CdrReader<'_> {
        let mut r = self.message.reader();
        // body_offset was reached by decoding this very frame
        let _ = r.set_position(self.body_offset);
        r
    }
}

/// Build a Reply carrying a system exception
pub fn system_exception_reply(
    version: Version,
    request_id: u32,
    ex: &SystemException,
) -> Result<Message> {
    let mut w = MessageWriter::new(version, MsgType::Reply);
    ReplyHeader::new(request_id, ReplyStatus::SystemException).encode(&mut w)?;
    w.write(ex)?;
    w.finish()
}

/// Application side of a GIOP server
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Process one request. The returned message is sent when the client
    /// expects a response.
    async fn handle_request(&self, request: IncomingRequest) -> Option<Message>;

    /// Answer a LocateRequest
    async fn handle_locate(&self, version: Version, request: LocateRequestHeader) -> Message;
}

/// GIOP server configuration
#[derive(Debug, Clone)]
pub struct GiopServerConfig {
    pub max_message_size: usize,
    pub max_connections: usize,
    pub max_fragment_size: usize,
    /// Version used for messages not answering a request
    pub version: Version,
}

impl GiopServerConfig {
    /// `max_connections` as a semaphore permit count
    pub fn connection_permits(&self) -> Result<u32> {
        u32::try_from(self.max_connections)
            .ok()
            .filter(|&n| n > 0 && n as usize <= Semaphore::MAX_PERMITS)
            .ok_or_else(|| {
                GiopError::InvalidConfig(format!(
                    "max_connections {} out of range",
                    self.max_connections
                ))
            })
    }
}

impl Default for GiopServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_connections: 10000,
            max_fragment_size: 64 * 1024,
            version: Version::V1_2,
        }
    }
}

/// Server statistics
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_processed: AtomicU64,
    pub requests_failed: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_processed: self.requests_processed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of server statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub requests_received: u64,
    pub requests_processed: u64,
    pub requests_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// GIOP server
pub struct GiopServer {
    handler: Arc<dyn RequestHandler>,
    transport: Arc<dyn Transport>,
    config: GiopServerConfig,
    stats: Arc<ServerStats>,
}

impl GiopServer {
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self::with_config(handler, GiopServerConfig::default())
    }

    pub fn with_config(handler: Arc<dyn RequestHandler>, config: GiopServerConfig) -> Self {
        Self {
            handler,
            transport: Arc::new(TcpTransport::new()),
            config,
            stats: Arc::new(ServerStats::default()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &GiopServerConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Open a listener without serving it yet
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportListener>> {
        self.config.connection_permits()?;
        let listener = self.transport.listen(endpoint).await?;
        info!(
            "GIOP server listening on {} (max_connections: {})",
            listener.local_endpoint()?,
            self.config.max_connections
        );
        Ok(listener)
    }

    /// Bind and serve forever
    pub async fn run(&self, endpoint: &Endpoint) -> Result<()> {
        let listener = self.bind(endpoint).await?;
        self.serve_until(listener, std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn run_until<F: Future<Output = ()>>(
        &self,
        endpoint: &Endpoint,
        shutdown: F,
    ) -> Result<()> {
        let listener = self.bind(endpoint).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` resolves.
    ///
    /// On shutdown every open connection receives CloseConnection and the
    /// call returns once all connection tasks have ended.
    pub async fn serve_until<F: Future<Output = ()>>(
        &self,
        listener: Box<dyn TransportListener>,
        shutdown: F,
    ) -> Result<()> {
        let permits = self.config.connection_permits()?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let (closing_tx, closing_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("GIOP server shutting down");
                    let _ = closing_tx.send(true);
                    let _ = semaphore.acquire_many(permits).await;
                    info!("all GIOP connections closed");
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                            warn!("connection limit reached, rejecting {}", peer);
                            drop(stream);
                            continue;
                        }
                    };

                    self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    debug!("accepted connection from {}", peer);

                    let conn = ServerConnection {
                        peer,
                        handler: self.handler.clone(),
                        config: self.config.clone(),
                        stats: self.stats.clone(),
                    };
                    let closing = closing_rx.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let stats = conn.stats.clone();
                        let peer = conn.peer.clone();
                        match conn.run(stream, closing).await {
                            Ok(()) => debug!("connection from {} closed", peer),
                            Err(e) => warn!("connection from {} failed: {}", peer, e),
                        }
                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
            }
        }
    }
}

type SharedWriter = Arc<Mutex<GiopTransport<WriteHalf<BoxedStream>>>>;

/// Requests of one connection whose handler has not finished
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: self.clone(),
        }
    }

    async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

struct ServerConnection {
    peer: String,
    handler: Arc<dyn RequestHandler>,
    config: GiopServerConfig,
    stats: Arc<ServerStats>,
}

impl ServerConnection {
    async fn run(self, stream: BoxedStream, mut closing: watch::Receiver<bool>) -> Result<()> {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader =
            GiopTransport::new(read_half).with_max_message_size(self.config.max_message_size);
        let writer: SharedWriter = Arc::new(Mutex::new(GiopTransport::new(write_half)));
        let mut assembler = FragmentAssembler::new(self.config.max_message_size);
        let mut version = self.config.version;
        let in_flight = Arc::new(InFlight::default());

        loop {
            let frame = tokio::select! {
                biased;
                _ = closing.changed() => {
                    let running = in_flight.count.load(Ordering::Acquire);
                    if running > 0 {
                        debug!(running, "waiting for requests from {} before closing", self.peer);
                    }
                    in_flight.drained().await;
                    self.send(&writer, &Message::header_only(version, MsgType::CloseConnection))
                        .await?;
                    let _ = writer.lock().await.shutdown().await;
                    return Ok(());
                }
                frame = reader.read_frame() => frame,
            };

            let message = match frame {
                Ok(Frame::Message(message)) => {
                    self.stats
                        .bytes_received
                        .fetch_add(message.frame.len() as u64, Ordering::Relaxed);
                    version = message.version();
                    match assembler.push(message) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(GiopError::MessageTooLarge {
                            request_id: Some(id),
                            size,
                            ..
                        }) => {
                            warn!(request_id = id, size, "reassembled request too large");
                            self.reject(&writer, version, id).await?;
                            continue;
                        }
                        Err(e) => return self.protocol_error(&writer, version, e).await,
                    }
                }
                Ok(Frame::Oversized { header, request_id }) => {
                    self.stats
                        .bytes_received
                        .fetch_add(header.frame_len() as u64, Ordering::Relaxed);
                    match (header.msg_type, request_id) {
                        (MsgType::Request | MsgType::LocateRequest, Some(id)) => {
                            self.reject(&writer, header.version, id).await?;
                        }
                        (kind, _) => warn!("dropped oversized {:?} from {}", kind, self.peer),
                    }
                    continue;
                }
                Err(GiopError::ConnectionClosed) => return Ok(()),
                Err(e @ GiopError::Io(_)) => return Err(e),
                Err(e) => return self.protocol_error(&writer, version, e).await,
            };

            match message.msg_type() {
                MsgType::Request => {
                    self.stats.requests_received.fetch_add(1, Ordering::Relaxed);
                    let request = match IncomingRequest::decode(message.clone(), self.peer.clone()) {
                        Ok(request) => request,
                        Err(e) => match message.request_id() {
                            Some(id) => {
                                warn!(request_id = id, "undecodable request header: {}", e);
                                let ex = e.to_system_exception();
                                let ex = SystemException { completed: CompletionStatus::No, ..ex };
                                let reply = system_exception_reply(version, id, &ex)?;
                                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                                self.send(&writer, &reply).await?;
                                continue;
                            }
                            None => return self.protocol_error(&writer, version, e).await,
                        },
                    };
                    trace!(
                        request_id = request.header.request_id,
                        "request {} from {}",
                        request.header.operation,
                        self.peer
                    );
                    self.spawn_request(request, writer.clone(), in_flight.enter());
                }
                MsgType::LocateRequest => {
                    let header = {
                        let mut r = message.reader();
                        LocateRequestHeader::decode(&mut r, version)
                    };
                    match header {
                        Ok(header) => {
                            let reply = self.handler.handle_locate(version, header).await;
                            self.send(&writer, &reply).await?;
                        }
                        Err(e) => return self.protocol_error(&writer, version, e).await,
                    }
                }
                MsgType::CancelRequest => {
                    let id = message.request_id();
                    debug!("cancel for request {:?} from {} ignored", id, self.peer);
                    if let Some(id) = id {
                        assembler.discard(id);
                    }
                }
                MsgType::CloseConnection => {
                    debug!("{} sent CloseConnection", self.peer);
                    return Ok(());
                }
                MsgType::MessageError => {
                    return Err(GiopError::Protocol(format!(
                        "{} reported a message error",
                        self.peer
                    )));
                }
                other => {
                    let e = GiopError::Protocol(format!("unexpected {:?} from a client", other));
                    return self.protocol_error(&writer, version, e).await;
                }
            }
        }
    }

    fn spawn_request(&self, request: IncomingRequest, writer: SharedWriter, guard: InFlightGuard) {
        let handler = self.handler.clone();
        let stats = self.stats.clone();
        let max_fragment = self.config.max_fragment_size;
        let response_expected = request.header.response_expected;
        let request_id = request.header.request_id;

        tokio::spawn(async move {
            // released once the reply is written, or not sent at all
            let _guard = guard;
            let reply = handler.handle_request(request).await;
            stats.requests_processed.fetch_add(1, Ordering::Relaxed);
            let Some(reply) = reply else {
                return;
            };
            if !response_expected {
                return;
            }
            let frames = match FragmentGenerator::fragment(&reply, max_fragment) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(request_id, "reply not sent: {}", e);
                    stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };
            let len: usize = frames.iter().map(|f| f.len()).sum();
            let mut writer = writer.lock().await;
            match writer.write_frames(&frames).await {
                Ok(()) => {
                    stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!(request_id, "reply lost: {}", e);
                    stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    async fn send(&self, writer: &SharedWriter, message: &Message) -> Result<()> {
        let frames = FragmentGenerator::fragment(message, self.config.max_fragment_size)?;
        let len: usize = frames.iter().map(|f| f.len()).sum();
        writer.lock().await.write_frames(&frames).await?;
        self.stats.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Refuse a request that exceeded the size limit
    async fn reject(&self, writer: &SharedWriter, version: Version, request_id: u32) -> Result<()> {
        self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
        let ex = SystemException::new(SystemExceptionKind::ImpLimit, CompletionStatus::No);
        let reply = system_exception_reply(version, request_id, &ex)?;
        self.send(writer, &reply).await
    }

    async fn protocol_error(
        &self,
        writer: &SharedWriter,
        version: Version,
        error: GiopError,
    ) -> Result<()> {
        warn!("protocol error from {}: {}", self.peer, error);
        let version = match error {
            GiopError::UnsupportedVersion(..) => Version::V1_0,
            _ => version,
        };
        let _ = self
            .send(writer, &Message::header_only(version, MsgType::MessageError))
            .await;
        Err(error)
    }
}
