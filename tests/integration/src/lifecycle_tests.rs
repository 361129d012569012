//! Lifecycle Tests - Adapters, References and ORBs Over Time
//!
//! These tests follow objects through creation, use and teardown:
//! - POA manager states as seen by remote callers
//! - transient references dying with their adapter
//! - persistent references surviving adapter re-creation
//! - destruction waiting for running requests
//! - connections released with the last reference
//! - ORB sharing by id and shutdown

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use matecorba::poa::{IdAssignmentPolicy, LifespanPolicy};
use matecorba::{
    AdapterActivator, Exception, Orb, OrbConfig, OrbError, Poa, Policy, SystemExceptionKind,
};

fn persistent_policies() -> Vec<Policy> {
    vec![
        Policy::Lifespan(LifespanPolicy::Persistent),
        Policy::IdAssignment(IdAssignmentPolicy::UserId),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_states_seen_remotely() {
    init_logging();

    let server = start_server(config("lifecycle-manager-server")).await;
    let client = Orb::new(config("lifecycle-manager-client")).unwrap();
    let child = server.root_poa().create_poa("gated", None, &[]).unwrap();
    let manager = child.the_poa_manager();
    let servant = echo_servant(&Tally::new());
    child.activate_object(servant.clone()).unwrap();
    let local = child.servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);

    // a new manager holds requests until activated
    let parked = {
        let remote = remote.clone();
        tokio::spawn(async move { echo(&remote, "held").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!parked.is_finished());
    manager.activate().unwrap();
    assert_eq!(parked.await.unwrap().unwrap(), "held");

    manager.discard_requests(true).await.unwrap();
    assert_eq!(
        system_kind(echo(&remote, "discarded").await),
        SystemExceptionKind::Transient
    );

    manager.hold_requests(true).await.unwrap();
    let parked = {
        let remote = remote.clone();
        tokio::spawn(async move { echo(&remote, "held again").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!parked.is_finished());

    // deactivating releases parked requests with OBJ_ADAPTER
    manager.deactivate(true, true).await.unwrap();
    assert_eq!(
        system_kind(parked.await.unwrap()),
        SystemExceptionKind::ObjAdapter
    );

    // other adapters are unaffected
    let other = echo_servant(&Tally::new());
    server.root_poa().activate_object(other.clone()).unwrap();
    let other_local = server.root_poa().servant_to_reference(&other).unwrap();
    let other_remote = remote_view(&server, &client, &other_local);
    assert_eq!(echo(&other_remote, "root").await.unwrap(), "root");

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_reference_dies_with_adapter() {
    init_logging();

    let server = start_server(config("lifecycle-transient-server")).await;
    let client = Orb::new(config("lifecycle-transient-client")).unwrap();
    let root = server.root_poa();

    let poa = root
        .create_poa("short-lived", Some(root.the_poa_manager()), &[])
        .unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    poa.activate_object(servant.clone()).unwrap();
    let local = poa.servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);
    assert_eq!(echo(&remote, "alive").await.unwrap(), "alive");

    poa.destroy(true, true).await.unwrap();
    assert!(poa.is_destroyed());
    assert_eq!(tally.finalized(), 1);
    assert!(root.find_poa("short-lived", false).is_err());

    // a new adapter of the same name is a different adapter
    let reborn = root
        .create_poa("short-lived", Some(root.the_poa_manager()), &[])
        .unwrap();
    reborn.activate_object(echo_servant(&Tally::new())).unwrap();
    assert_eq!(
        system_kind(echo(&remote, "stale").await),
        SystemExceptionKind::ObjectNotExist
    );
    assert!(remote.non_existent().await.unwrap());
    assert_eq!(
        system_kind(echo(&local, "stale").await),
        SystemExceptionKind::ObjectNotExist
    );

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistent_reference_survives_adapter_recreation() {
    init_logging();

    let server = start_server(config("lifecycle-persistent-server")).await;
    let client = Orb::new(config("lifecycle-persistent-client")).unwrap();
    let root = server.root_poa();

    let poa = root
        .create_poa("durable", Some(root.the_poa_manager()), &persistent_policies())
        .unwrap();
    poa.activate_object_with_id(b"ledger", echo_servant(&Tally::new()))
        .unwrap();
    let local = poa.id_to_reference(b"ledger").unwrap();
    let ior = server.object_to_string(&local).unwrap();
    let remote = client.string_to_object(&ior).unwrap();
    assert_eq!(echo(&remote, "first life").await.unwrap(), "first life");

    poa.destroy(true, true).await.unwrap();
    assert_eq!(
        system_kind(echo(&remote, "between lives").await),
        SystemExceptionKind::ObjectNotExist
    );

    let poa = root
        .create_poa("durable", Some(root.the_poa_manager()), &persistent_policies())
        .unwrap();
    poa.activate_object_with_id(b"ledger", echo_servant(&Tally::new()))
        .unwrap();
    assert_eq!(echo(&remote, "second life").await.unwrap(), "second life");

    // a reference read back from the string works as well
    let reread = client.string_to_object(&ior).unwrap();
    assert_eq!(whoami(&reread).await.unwrap(), "ledger");
    assert_eq!(poa.reference_to_id(&local).unwrap(), b"ledger".to_vec());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

/// Brings back "archive" with its one object; declines every other name
#[derive(Default)]
struct ArchiveActivator {
    calls: AtomicUsize,
}

impl AdapterActivator for ArchiveActivator {
    fn unknown_adapter(&self, parent: &Arc<Poa>, name: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if name != "archive" {
            return false;
        }
        let Ok(poa) = parent.create_poa(name, Some(parent.the_poa_manager()), &persistent_policies())
        else {
            return false;
        };
        poa.activate_object_with_id(b"volume-1", echo_servant(&Tally::new()))
            .is_ok()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adapter_activator_recreates_adapters() {
    init_logging();

    let server = start_server(config("lifecycle-activator-server")).await;
    let client = Orb::new(config("lifecycle-activator-client")).unwrap();
    let root = server.root_poa();
    assert!(root.the_activator().is_none());
    assert!(matches!(
        root.find_poa("archive", true),
        Err(OrbError::AdapterNonExistent(_))
    ));

    let activator = Arc::new(ArchiveActivator::default());
    root.set_the_activator(Some(activator.clone()));
    assert!(root.the_activator().is_some());

    // without activate_it the activator is not asked
    assert!(root.find_poa("archive", false).is_err());
    assert_eq!(activator.calls.load(Ordering::SeqCst), 0);

    let archive = root.find_poa("archive", true).unwrap();
    assert_eq!(activator.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&archive, &root.find_poa("archive", false).unwrap()));
    assert!(matches!(
        root.find_poa("scratch", true),
        Err(OrbError::AdapterNonExistent(_))
    ));
    assert_eq!(activator.calls.load(Ordering::SeqCst), 2);

    let local = archive.id_to_reference(b"volume-1").unwrap();
    let ior = server.object_to_string(&local).unwrap();
    let remote = client.string_to_object(&ior).unwrap();
    assert_eq!(whoami(&remote).await.unwrap(), "volume-1");

    // a request for the destroyed adapter brings it back
    archive.destroy(true, true).await.unwrap();
    assert_eq!(whoami(&remote).await.unwrap(), "volume-1");
    assert_eq!(activator.calls.load(Ordering::SeqCst), 3);
    assert!(!Arc::ptr_eq(&archive, &root.find_poa("archive", false).unwrap()));

    root.set_the_activator(None);
    assert!(root.the_activator().is_none());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_waits_for_running_requests() {
    init_logging();

    let server = start_server(config("lifecycle-destroy-server")).await;
    let client = Orb::new(config("lifecycle-destroy-client")).unwrap();
    let root = server.root_poa();
    let poa = root
        .create_poa("busy", Some(root.the_poa_manager()), &[])
        .unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    poa.activate_object(servant.clone()).unwrap();
    let local = poa.servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);

    let running = {
        let remote = remote.clone();
        tokio::spawn(async move { pause(&remote, 300).await })
    };
    assert!(eventually(Duration::from_secs(5), || tally.active.load(Ordering::SeqCst) == 1).await);

    let start = Instant::now();
    poa.destroy(true, true).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(tally.finalized(), 1);
    assert!(running.await.unwrap().is_ok());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_released_with_last_reference() {
    init_logging();

    let server = start_server(config("lifecycle-release-server")).await;
    let client = Orb::new(config("lifecycle-release-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);

    let disposed = Arc::new(AtomicBool::new(false));
    {
        let disposed = disposed.clone();
        remote.on_dispose(move || disposed.store(true, Ordering::SeqCst));
    }

    assert_eq!(client.connection_count(), 0);
    assert_eq!(echo(&remote, "connect").await.unwrap(), "connect");
    assert_eq!(client.connection_count(), 1);

    let duplicate = remote.duplicate();
    assert_eq!(remote.ref_count(), 2);
    remote.release();
    assert!(!disposed.load(Ordering::SeqCst));
    assert_eq!(client.connection_count(), 1);
    assert_eq!(echo(&duplicate, "still").await.unwrap(), "still");

    duplicate.release();
    assert!(disposed.load(Ordering::SeqCst));
    assert_eq!(client.connection_count(), 0);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_stops_serving() {
    init_logging();

    let server = start_server(config("lifecycle-shutdown-server")).await;
    let client = Orb::new(config("lifecycle-shutdown-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);
    assert_eq!(echo(&remote, "up").await.unwrap(), "up");

    server.shutdown(true).await.unwrap();
    assert!(server.is_shut_down());
    assert_eq!(tally.finalized(), 1);
    assert!(server.root_poa().is_destroyed());

    match echo(&remote, "down").await {
        Err(Exception::System(ex)) => assert!(
            matches!(
                ex.kind,
                SystemExceptionKind::CommFailure | SystemExceptionKind::Transient
            ),
            "unexpected {}",
            ex.kind
        ),
        other => panic!("call to a stopped ORB returned {:?}", other),
    }

    // a second shutdown is harmless
    server.shutdown(true).await.unwrap();
    client.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_during_call_still_replies() {
    init_logging();

    let server = start_server(config("lifecycle-closing-server")).await;
    let client = Orb::new(config("lifecycle-closing-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);

    let running = {
        let remote = remote.clone();
        tokio::spawn(async move { pause(&remote, 200).await })
    };
    assert!(eventually(Duration::from_secs(5), || tally.active.load(Ordering::SeqCst) == 1).await);

    server.shutdown(true).await.unwrap();
    // the servant ran to the end, so the caller gets its answer
    assert_eq!(running.await.unwrap().unwrap(), 1);
    assert_eq!(tally.calls(), 1);

    client.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_orb_init_shares_by_id() {
    init_logging();

    let id = config("lifecycle-shared").orb_id;
    let args = vec![
        "app".to_string(),
        "-ORBid".to_string(),
        id.clone(),
        "--verbose".to_string(),
    ];
    let (first, rest) = Orb::init(args.clone(), OrbConfig::new()).unwrap();
    assert_eq!(rest, vec!["app".to_string(), "--verbose".to_string()]);
    assert_eq!(first.id(), id);

    let (second, _) = Orb::init(args.clone(), OrbConfig::new()).unwrap();
    let obj = first.root_poa();
    assert!(std::ptr::eq(obj.as_ref(), second.root_poa().as_ref()));

    second.shutdown(true).await.unwrap();
    assert!(!first.is_shut_down());
    first.shutdown(true).await.unwrap();
    assert!(first.is_shut_down());

    // after the last shutdown the id starts a fresh ORB
    let (third, _) = Orb::init(args, OrbConfig::new()).unwrap();
    assert!(!third.is_shut_down());
    third.shutdown(true).await.unwrap();
}
