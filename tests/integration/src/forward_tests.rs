//! Location Forward Tests
//!
//! A bare GIOP server answers every request with LOCATION_FORWARD, the way
//! a locator agent or a migrated object's old home does. The client must
//! follow the forward, rebind the reference, and give up on loops.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use corba_cdr::ior::IiopProfile;
use giop::{
    GiopServer, IncomingRequest, LocateReplyHeader, LocateRequestHeader, LocateStatus, Message,
    MessageWriter, MsgType, ReplyHeader, ReplyStatus, RequestHandler, Version,
};
use matecorba::{Endpoint, Ior, Orb, SystemExceptionKind, MAX_FORWARD_HOPS};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Forwards every request to `target`
struct Forwarder {
    target: Mutex<Option<Ior>>,
    hits: AtomicUsize,
}

impl Forwarder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            target: Mutex::new(None),
            hits: AtomicUsize::new(0),
        })
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for Forwarder {
    async fn handle_request(&self, request: IncomingRequest) -> Option<Message> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let target = self.target.lock().clone()?;
        let mut w = MessageWriter::new(request.version(), MsgType::Reply);
        ReplyHeader::new(request.header.request_id, ReplyStatus::LocationForward)
            .encode(&mut w)
            .ok()?;
        w.write(&target).ok()?;
        w.finish().ok()
    }

    async fn handle_locate(&self, version: Version, request: LocateRequestHeader) -> Message {
        let mut w = MessageWriter::new(version, MsgType::LocateReply);
        let _ = LocateReplyHeader {
            request_id: request.request_id,
            status: LocateStatus::UnknownObject,
        }
        .encode(&mut w);
        match w.finish() {
            Ok(message) => message,
            Err(_) => Message::header_only(version, MsgType::MessageError),
        }
    }
}

/// Start `forwarder` on a loopback port; the sender stops it
async fn start_forwarder(forwarder: Arc<Forwarder>) -> (Endpoint, watch::Sender<bool>) {
    let server = GiopServer::new(forwarder);
    let listener = server.bind(&Endpoint::new("127.0.0.1", 0)).await.unwrap();
    let endpoint = listener.local_endpoint().unwrap();
    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server
            .serve_until(listener, async move {
                let _ = stop_rx.changed().await;
            })
            .await;
    });
    (endpoint, stop_tx)
}

/// An IOR naming some object at `endpoint`
fn ior_at(endpoint: &Endpoint, key: &[u8]) -> Ior {
    Ior::with_iiop(
        ECHO_REPO_ID,
        IiopProfile {
            major: Version::V1_2.major,
            minor: Version::V1_2.minor,
            host: endpoint.host.clone(),
            port: endpoint.port,
            object_key: key.to_vec(),
        },
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_is_followed_and_remembered() {
    init_logging();

    let server = start_server(config("forward-target")).await;
    let client = Orb::new(config("forward-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let target = server.root_poa().servant_to_reference(&servant).unwrap();

    let forwarder = Forwarder::new();
    *forwarder.target.lock() = Some(target.ior());
    let (forwarder_endpoint, _stop) = start_forwarder(forwarder.clone()).await;

    let initial = ior_at(&forwarder_endpoint, b"old-home");
    let moved = client.string_to_object(&initial.to_string()).unwrap();
    assert!(!moved.is_local());

    assert_eq!(echo(&moved, "follow me").await.unwrap(), "follow me");
    assert_eq!(forwarder.hits(), 1);
    assert_eq!(tally.calls(), 1);

    // the reference now points at the new home
    let rebound = moved.ior().iiop().unwrap();
    assert_eq!(rebound.port, server.endpoint().unwrap().port);
    assert_eq!(echo(&moved, "direct").await.unwrap(), "direct");
    assert_eq!(forwarder.hits(), 1);
    assert_eq!(tally.calls(), 2);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_loop_gives_up() {
    init_logging();

    let client = Orb::new(config("forward-loop-client")).unwrap();
    let forwarder = Forwarder::new();
    let (endpoint, _stop) = start_forwarder(forwarder.clone()).await;
    let itself = ior_at(&endpoint, b"loop");
    *forwarder.target.lock() = Some(itself.clone());

    let looping = client.string_to_object(&itself.to_string()).unwrap();
    assert_eq!(
        system_kind(echo(&looping, "round and round").await),
        SystemExceptionKind::Transient
    );
    assert_eq!(forwarder.hits(), MAX_FORWARD_HOPS + 1);

    client.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forward_to_missing_object() {
    init_logging();

    let server = start_server(config("forward-missing-target")).await;
    let client = Orb::new(config("forward-missing-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    let oid = server.root_poa().activate_object(servant.clone()).unwrap();
    let target = server.root_poa().servant_to_reference(&servant).unwrap();
    let target_ior = target.ior();
    server.root_poa().deactivate_object(&oid).unwrap();

    let forwarder = Forwarder::new();
    *forwarder.target.lock() = Some(target_ior);
    let (endpoint, _stop) = start_forwarder(forwarder.clone()).await;

    let moved = client
        .string_to_object(&ior_at(&endpoint, b"old-home").to_string())
        .unwrap();
    assert_eq!(
        system_kind(echo(&moved, "anyone?").await),
        SystemExceptionKind::ObjectNotExist
    );

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}
