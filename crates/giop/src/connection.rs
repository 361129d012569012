//! Client-side GIOP connections
//!
//! A [`Connection`] multiplexes any number of outstanding requests over one
//! byte stream. Each request registers a reply slot, keyed by request id,
//! before its bytes are written; a background reader task matches replies
//! to slots. Failures of the stream fail every outstanding request:
//!
//! | Event                          | Exception      | Completed |
//! |--------------------------------|----------------|-----------|
//! | EOF or I/O error               | COMM_FAILURE   | MAYBE     |
//! | CloseConnection, request sent  | COMM_FAILURE   | MAYBE     |
//! | CloseConnection, not yet sent  | TRANSIENT      | NO        |
//! | MessageError from the peer     | COMM_FAILURE   | MAYBE     |
//! | reply larger than the limit    | IMP_LIMIT      | YES       |
//! | per-request timeout            | TIMEOUT        | MAYBE     |
//!
//! Only the last row is local to one request. Marking the connection
//! closed and draining the table happen under one lock, so no request can
//! register a slot that nothing will ever complete.

use crate::error::GiopError;
use crate::exception::{CompletionStatus, SystemException, SystemExceptionKind};
use crate::fragmentation::{FragmentAssembler, FragmentGenerator};
use crate::framing::{Frame, GiopTransport, DEFAULT_MAX_MESSAGE_SIZE};
use crate::message::{Message, MsgType, Version};
use crate::transport::{BoxedStream, Endpoint, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Outcome of one request as delivered to its waiter
pub type ReplyResult = std::result::Result<Message, SystemException>;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_message_size: usize,
    pub max_fragment_size: usize,
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_fragment_size: 64 * 1024,
            request_timeout: None,
        }
    }
}

fn system(kind: SystemExceptionKind, completed: CompletionStatus) -> SystemException {
    SystemException::new(kind, completed)
}

/// Reply slot of one outstanding request
struct Slot {
    tx: oneshot::Sender<ReplyResult>,
    /// every frame of the request reached the stream
    written: bool,
}

/// One client connection to a GIOP server
pub struct Connection {
    endpoint: Endpoint,
    config: ConnectionConfig,
    writer: tokio::sync::Mutex<GiopTransport<WriteHalf<BoxedStream>>>,
    pending: Mutex<HashMap<u32, Slot>>,
    next_id: AtomicU32,
    closed: AtomicBool,
    users: AtomicUsize,
    reader: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl Connection {
    /// Wrap an established stream and start its reader task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(stream: BoxedStream, endpoint: Endpoint, config: ConnectionConfig) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let conn = Arc::new(Self {
            endpoint,
            writer: tokio::sync::Mutex::new(GiopTransport::new(write_half)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            users: AtomicUsize::new(0),
            reader: Mutex::new(None),
            runtime: Handle::current(),
            config,
        });
        let transport =
            GiopTransport::new(read_half).with_max_message_size(conn.config.max_message_size);
        let handle = tokio::spawn(read_loop(Arc::downgrade(&conn), transport));
        *conn.reader.lock() = Some(handle);
        conn
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Requests waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Object references currently using this connection
    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Next request id not currently in flight
    pub fn next_request_id(&self) -> u32 {
        let pending = self.pending.lock();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Send a message. When `expect_reply` is set the returned
    /// [`PendingReply`] resolves to the matching Reply or LocateReply.
    pub async fn send(
        self: &Arc<Self>,
        request_id: u32,
        message: Message,
        expect_reply: bool,
        timeout: Option<Duration>,
    ) -> std::result::Result<Option<PendingReply>, SystemException> {
        let frames = FragmentGenerator::fragment(&message, self.config.max_fragment_size)
            .map_err(|e| e.to_system_exception())?;

        let pending = {
            let mut slots = self.pending.lock();
            if self.is_closed() {
                return Err(system(SystemExceptionKind::CommFailure, CompletionStatus::No));
            }
            if expect_reply {
                // the slot exists before any byte reaches the peer
                let (tx, rx) = oneshot::channel();
                slots.insert(request_id, Slot { tx, written: false });
                Some(PendingReply {
                    request_id,
                    rx: Some(rx),
                    conn: Arc::downgrade(self),
                    timeout: timeout.or(self.config.request_timeout),
                })
            } else {
                None
            }
        };
        trace!(
            request_id,
            frames = frames.len(),
            "sending {:?} to {}",
            message.msg_type(),
            self.endpoint
        );

        let result = {
            let mut writer = self.writer.lock().await;
            writer.write_frames(&frames).await
        };
        if let Err(e) = result {
            warn!("write to {} failed: {}", self.endpoint, e);
            self.pending.lock().remove(&request_id);
            let completed = if frames.len() > 1 {
                CompletionStatus::Maybe
            } else {
                CompletionStatus::No
            };
            self.shutdown(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
            return Err(system(SystemExceptionKind::CommFailure, completed));
        }
        if let Some(slot) = self.pending.lock().get_mut(&request_id) {
            slot.written = true;
        }
        Ok(pending)
    }

    /// Abandon a request: forget its slot and tell the server
    pub fn cancel(self: &Arc<Self>, request_id: u32, version: Version) {
        if self.pending.lock().remove(&request_id).is_none() || self.is_closed() {
            return;
        }
        let conn = self.clone();
        self.runtime.spawn(async move {
            let Ok(message) = Message::cancel_request(version, request_id) else {
                return;
            };
            let mut writer = conn.writer.lock().await;
            if let Err(e) = writer.write_frame(&message.frame).await {
                debug!("cancel of request {} not sent: {}", request_id, e);
            }
        });
    }

    fn complete(&self, request_id: u32, result: ReplyResult) {
        match self.pending.lock().remove(&request_id) {
            Some(slot) => {
                let _ = slot.tx.send(result);
            }
            None => debug!(
                "reply for unknown or abandoned request {} from {}",
                request_id, self.endpoint
            ),
        }
    }

    /// Mark the connection closed and fail every pending request: those
    /// fully written with `sent`, the rest with `unsent`. Returns false if
    /// the connection was already closed.
    fn fail_all(&self, sent: SystemException, unsent: SystemException) -> bool {
        let (first, drained) = {
            let mut slots = self.pending.lock();
            let first = !self.closed.swap(true, Ordering::AcqRel);
            (first, slots.drain().collect::<Vec<_>>())
        };
        if !drained.is_empty() {
            debug!(
                "failing {} pending requests to {} with {}",
                drained.len(),
                self.endpoint,
                sent
            );
        }
        for (_, slot) in drained {
            let ex = if slot.written { sent } else { unsent };
            let _ = slot.tx.send(Err(ex));
        }
        first
    }

    /// Close the connection now, failing anything still pending with `ex`
    pub fn shutdown(&self, ex: SystemException) {
        if !self.fail_all(ex, ex) {
            return;
        }
        debug!("closed connection to {}", self.endpoint);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    /// Close a connection nobody needs any more
    pub fn close(&self) {
        self.shutdown(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
    }

    fn handle_message(&self, message: Message) -> bool {
        match message.msg_type() {
            MsgType::Reply | MsgType::LocateReply => match message.request_id() {
                Some(id) => self.complete(id, Ok(message)),
                None => warn!("reply without request id from {}", self.endpoint),
            },
            MsgType::CloseConnection => {
                debug!("{} closed the connection", self.endpoint);
                // the server answers everything it read before closing
                self.fail_all(
                    system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe),
                    system(SystemExceptionKind::Transient, CompletionStatus::No),
                );
                return false;
            }
            MsgType::MessageError => {
                warn!("{} reported a message error", self.endpoint);
                let ex = system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe);
                self.fail_all(ex, ex);
                return false;
            }
            other => warn!("unexpected {:?} from server {}", other, self.endpoint),
        }
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

async fn read_loop(conn: Weak<Connection>, mut transport: GiopTransport<ReadHalf<BoxedStream>>) {
    let max = match conn.upgrade() {
        Some(c) => c.config.max_message_size,
        None => return,
    };
    let mut assembler = FragmentAssembler::new(max);

    loop {
        let frame = transport.read_frame().await;
        let Some(conn) = conn.upgrade() else {
            return;
        };
        match frame {
            Ok(Frame::Message(message)) => match assembler.push(message) {
                Ok(Some(message)) => {
                    if !conn.handle_message(message) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(GiopError::MessageTooLarge {
                    request_id: Some(id),
                    size,
                    max,
                }) => {
                    warn!(request_id = id, size, max, "reassembled reply too large");
                    conn.complete(id, Err(system(SystemExceptionKind::ImpLimit, CompletionStatus::Yes)));
                }
                Err(e) => {
                    warn!("fragment error from {}: {}", conn.endpoint, e);
                    conn.shutdown(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
                    return;
                }
            },
            Ok(Frame::Oversized { header, request_id }) => match (header.msg_type, request_id) {
                (MsgType::Reply | MsgType::LocateReply, Some(id)) => {
                    conn.complete(id, Err(system(SystemExceptionKind::ImpLimit, CompletionStatus::Yes)));
                }
                (kind, id) => warn!("dropped oversized {:?} (request {:?})", kind, id),
            },
            Err(GiopError::ConnectionClosed) => {
                debug!("connection to {} closed", conn.endpoint);
                conn.shutdown(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
                return;
            }
            Err(e) => {
                warn!("connection to {} failed: {}", conn.endpoint, e);
                conn.shutdown(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
                return;
            }
        }
    }
}

/// A reply that has not arrived yet
#[derive(Debug)]
pub struct PendingReply {
    request_id: u32,
    rx: Option<oneshot::Receiver<ReplyResult>>,
    conn: Weak<Connection>,
    timeout: Option<Duration>,
}

impl PendingReply {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Wait for the reply. A timeout fails only this request.
    pub async fn wait(mut self) -> ReplyResult {
        let Some(rx) = self.rx.take() else {
            return Err(system(SystemExceptionKind::Internal, CompletionStatus::Maybe));
        };
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(request_id = self.request_id, "request timed out");
                    if let Some(conn) = self.conn.upgrade() {
                        conn.pending.lock().remove(&self.request_id);
                    }
                    return Err(system(SystemExceptionKind::Timeout, CompletionStatus::Maybe));
                }
            },
            None => rx.await,
        };
        outcome.unwrap_or_else(|_| Err(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe)))
    }

    /// Wait from synchronous code.
    ///
    /// Outside a runtime this drives the connection's runtime directly; on
    /// a multi-threaded runtime worker it blocks in place. A current-thread
    /// runtime cannot block without stalling the reader that would deliver
    /// the reply, so there the call fails with BAD_INV_ORDER.
    pub fn wait_blocking(self) -> ReplyResult {
        let runtime = match self.conn.upgrade() {
            Some(conn) => conn.runtime.clone(),
            None => return Err(system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe)),
        };
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::CurrentThread) => {
                warn!(
                    request_id = self.request_id,
                    "blocking wait inside a current-thread runtime"
                );
                Err(system(SystemExceptionKind::BadInvOrder, CompletionStatus::Maybe))
            }
            Ok(_) => tokio::task::block_in_place(|| runtime.block_on(self.wait())),
            Err(_) => runtime.block_on(self.wait()),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.rx.is_some() {
            if let Some(conn) = self.conn.upgrade() {
                conn.pending.lock().remove(&self.request_id);
            }
        }
    }
}

/// Marks a connection as in use by an object reference
pub struct ConnectionLease {
    conn: Arc<Connection>,
}

impl ConnectionLease {
    pub fn new(conn: Arc<Connection>) -> Self {
        conn.users.fetch_add(1, Ordering::AcqRel);
        Self { conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Clone for ConnectionLease {
    fn clone(&self) -> Self {
        Self::new(self.conn.clone())
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.conn.users.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::ops::Deref for ConnectionLease {
    type Target = Arc<Connection>;

    fn deref(&self) -> &Arc<Connection> {
        &self.conn
    }
}

/// Shares one connection per endpoint
pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    connections: Mutex<HashMap<Endpoint, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Live connection to `endpoint`, opening one if needed
    pub async fn get(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<ConnectionLease, SystemException> {
        if let Some(conn) = self.connections.lock().get(endpoint) {
            if !conn.is_closed() {
                return Ok(ConnectionLease::new(conn.clone()));
            }
        }

        let stream = self.transport.connect(endpoint).await.map_err(|e| {
            debug!("connect to {} failed: {}", endpoint, e);
            match e {
                GiopError::Timeout => system(SystemExceptionKind::Timeout, CompletionStatus::No),
                _ => system(SystemExceptionKind::Transient, CompletionStatus::No),
            }
        })?;
        let fresh = Connection::open(stream, endpoint.clone(), self.config.clone());

        let mut connections = self.connections.lock();
        match connections.get(endpoint) {
            Some(existing) if !existing.is_closed() => {
                // lost a race with another caller; keep theirs
                let existing = existing.clone();
                fresh.close();
                Ok(ConnectionLease::new(existing))
            }
            _ => {
                connections.insert(endpoint.clone(), fresh.clone());
                Ok(ConnectionLease::new(fresh))
            }
        }
    }

    /// Close connections no reference uses and no request waits on
    pub fn close_idle(&self) -> usize {
        let idle: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            let keys: Vec<Endpoint> = connections
                .iter()
                .filter(|(_, c)| c.is_closed() || (c.user_count() == 0 && c.pending_count() == 0))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| connections.remove(k)).collect()
        };
        for conn in &idle {
            conn.close();
        }
        idle.len()
    }

    pub fn close_all(&self) {
        let all: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in all {
            conn.close();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
