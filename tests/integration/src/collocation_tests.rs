//! Collocation Tests - In-Process Calls Through the Adapter
//!
//! References to objects of the calling ORB skip the wire but not the
//! adapter: managers, deferred deactivation, threading policies and the
//! per-call context behave as they do for remote requests.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use futures::future::join_all;
use matecorba::poa::{
    IdAssignmentPolicy, IdUniquenessPolicy, ImplicitActivationPolicy, RequestProcessingPolicy,
    ServantRetentionPolicy, ThreadPolicy,
};
use matecorba::{
    object_id_to_string, string_to_object_id, Environment, ManagerState, Orb, OrbError,
    PoaCurrent, Policy, ServantRef, SystemExceptionKind, Value,
};

fn same_servant(a: &ServantRef, b: &ServantRef) -> bool {
    std::ptr::eq(
        std::sync::Arc::as_ptr(a) as *const (),
        std::sync::Arc::as_ptr(b) as *const (),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_collocated_calls_match_remote_semantics() {
    init_logging();

    let orb = start_server(config("colloc-semantics")).await;
    let servant = echo_servant(&Tally::new());
    orb.root_poa().activate_object(servant.clone()).unwrap();
    let echo_ref = orb.root_poa().servant_to_reference(&servant).unwrap();
    assert!(echo_ref.is_local());

    // going through the string form keeps the call in process
    let ior = orb.object_to_string(&echo_ref).unwrap();
    let again = orb.string_to_object(&ior).unwrap();
    assert!(again.is_local());
    assert!(again.is_equivalent(&echo_ref));

    assert_eq!(echo(&again, "local").await.unwrap(), "local");
    assert!(again.is_a(ECHO_REPO_ID).await.unwrap());

    let mut env = Environment::new();
    assert!(again
        .invoke(&refuse_op(), &[Value::from("no")], &mut env)
        .await
        .is_none());
    assert_eq!(env.exception_id().as_deref(), Some(REFUSED_REPO_ID));
    env.clear();

    assert!(again.invoke(&missing_op(), &[], &mut env).await.is_none());
    assert_eq!(env.system_exception().unwrap().kind, SystemExceptionKind::BadOperation);

    orb.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deactivation_waits_for_running_call() {
    init_logging();

    let orb = start_server(config("colloc-deferred")).await;
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    let poa = orb.root_poa();
    let oid = poa.activate_object(servant.clone()).unwrap();
    let echo_ref = poa.servant_to_reference(&servant).unwrap();

    let running = {
        let echo_ref = echo_ref.clone();
        tokio::spawn(async move { pause(&echo_ref, 300).await })
    };
    assert!(eventually(Duration::from_secs(5), || tally.active.load(Ordering::SeqCst) == 1).await);

    poa.deactivate_object(&oid).unwrap();
    // deactivating twice while pending is harmless
    poa.deactivate_object(&oid).unwrap();

    // new calls are refused while the old one finishes
    assert_eq!(
        system_kind(echo(&echo_ref, "late").await),
        SystemExceptionKind::ObjectNotExist
    );
    assert_eq!(tally.finalized(), 0);

    assert!(running.await.unwrap().is_ok());
    poa.wait_for_deactivation(&oid).await;
    assert_eq!(tally.finalized(), 1);

    // the id is free again
    let replacement = echo_servant(&Tally::new());
    let new_oid = poa.activate_object(replacement.clone()).unwrap();
    assert_ne!(new_oid, oid);

    orb.shutdown(true).await.unwrap();
    assert_eq!(tally.finalized(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_thread_adapter_serializes_requests() {
    init_logging();

    let orb = start_server(config("colloc-single-thread")).await;
    let root = orb.root_poa();
    let serial = root
        .create_poa(
            "serial",
            Some(root.the_poa_manager()),
            &[Policy::Thread(ThreadPolicy::SingleThreadModel)],
        )
        .unwrap();
    let parallel = root
        .create_poa("parallel", Some(root.the_poa_manager()), &[])
        .unwrap();

    let serial_tally = Tally::new();
    let serial_servant = echo_servant(&serial_tally);
    serial.activate_object(serial_servant.clone()).unwrap();
    let serial_ref = serial.servant_to_reference(&serial_servant).unwrap();

    let parallel_tally = Tally::new();
    let parallel_servant = echo_servant(&parallel_tally);
    parallel.activate_object(parallel_servant.clone()).unwrap();
    let parallel_ref = parallel.servant_to_reference(&parallel_servant).unwrap();

    let calls = (0..4).map(|_| {
        let serial_ref = serial_ref.clone();
        let parallel_ref = parallel_ref.clone();
        async move {
            let (a, b) = tokio::join!(pause(&serial_ref, 40), pause(&parallel_ref, 40));
            a.unwrap();
            b.unwrap();
        }
    });
    join_all(calls).await;

    assert_eq!(serial_tally.calls(), 4);
    assert_eq!(serial_tally.max_active(), 1);
    assert_eq!(parallel_tally.calls(), 4);
    assert!(parallel_tally.max_active() > 1);

    orb.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_poa_current_reports_the_call() {
    init_logging();

    let orb = start_server(config("colloc-current")).await;
    let root = orb.root_poa();
    let named = root
        .create_poa(
            "named",
            Some(root.the_poa_manager()),
            &[Policy::IdAssignment(IdAssignmentPolicy::UserId)],
        )
        .unwrap();
    let servant = echo_servant(&Tally::new());
    named.activate_object_with_id(b"alpha", servant.clone()).unwrap();
    let alpha = named.id_to_reference(b"alpha").unwrap();
    assert_eq!(named.reference_to_id(&alpha).unwrap(), b"alpha".to_vec());

    assert_eq!(whoami(&alpha).await.unwrap(), "alpha");
    assert!(PoaCurrent.get_object_id().is_err());

    // the pseudo-object is reachable as an initial reference
    let current = orb.resolve_initial_references("POACurrent").unwrap();
    assert!(current.as_current().is_some());

    orb.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_implicit_activation() {
    init_logging();

    let orb = start_server(config("colloc-implicit")).await;
    let root = orb.root_poa();
    let implicit = root
        .create_poa(
            "implicit",
            Some(root.the_poa_manager()),
            &[Policy::ImplicitActivation(ImplicitActivationPolicy::ImplicitActivation)],
        )
        .unwrap();
    let servant = echo_servant(&Tally::new());

    let first = implicit.servant_to_reference(&servant).unwrap();
    let second = implicit.servant_to_reference(&servant).unwrap();
    assert!(first.is_equivalent(&second));
    assert_eq!(echo(&first, "implicit").await.unwrap(), "implicit");

    // adapters with default policies do not activate implicitly
    let explicit = root
        .create_poa("explicit", Some(root.the_poa_manager()), &[])
        .unwrap();
    let other = echo_servant(&Tally::new());
    assert!(explicit.servant_to_reference(&other).is_err());
    explicit.activate_object(other.clone()).unwrap();
    assert!(explicit.servant_to_reference(&other).is_ok());

    orb.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reference_to_servant() {
    init_logging();

    let orb = start_server(config("colloc-ref-to-servant")).await;
    let root = orb.root_poa();
    let servant = echo_servant(&Tally::new());
    let oid = root.activate_object(servant.clone()).unwrap();
    let obj = root.servant_to_reference(&servant).unwrap();
    assert!(same_servant(&root.reference_to_servant(&obj).unwrap(), &servant));

    // a reference issued by another adapter
    let other = root
        .create_poa("elsewhere", Some(root.the_poa_manager()), &[])
        .unwrap();
    let foreign_servant = echo_servant(&Tally::new());
    other.activate_object(foreign_servant.clone()).unwrap();
    let foreign = other.servant_to_reference(&foreign_servant).unwrap();
    assert!(matches!(
        root.reference_to_servant(&foreign),
        Err(OrbError::WrongAdapter)
    ));

    root.deactivate_object(&oid).unwrap();
    root.wait_for_deactivation(&oid).await;
    assert!(matches!(
        root.reference_to_servant(&obj),
        Err(OrbError::ObjectNotActive)
    ));

    // NON_RETAIN adapters answer with their default servant
    let shared = root
        .create_poa(
            "shared",
            Some(root.the_poa_manager()),
            &[
                Policy::IdAssignment(IdAssignmentPolicy::UserId),
                Policy::IdUniqueness(IdUniquenessPolicy::MultipleId),
                Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
                Policy::RequestProcessing(RequestProcessingPolicy::UseDefaultServant),
            ],
        )
        .unwrap();
    let oid = string_to_object_id("row-42");
    let row = shared.create_reference_with_id(&oid, ECHO_REPO_ID).unwrap();
    assert!(matches!(
        shared.reference_to_servant(&row),
        Err(OrbError::ObjectNotActive)
    ));
    let fallback = echo_servant(&Tally::new());
    shared.set_servant(fallback.clone()).unwrap();
    assert!(same_servant(&shared.reference_to_servant(&row).unwrap(), &fallback));
    assert_eq!(
        object_id_to_string(&shared.reference_to_id(&row).unwrap()).unwrap(),
        "row-42"
    );

    // neither a retained map nor a default servant to look in
    let located = root
        .create_poa(
            "located",
            Some(root.the_poa_manager()),
            &[
                Policy::ServantRetention(ServantRetentionPolicy::NonRetain),
                Policy::RequestProcessing(RequestProcessingPolicy::UseServantManager),
            ],
        )
        .unwrap();
    let nobody = located.create_reference(ECHO_REPO_ID).unwrap();
    assert!(matches!(
        located.reference_to_servant(&nobody),
        Err(OrbError::WrongPolicy(_))
    ));

    orb.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_states_govern_collocated_calls() {
    init_logging();

    let orb = start_server(config("colloc-manager")).await;
    let root = orb.root_poa();
    let child = root.create_poa("managed", None, &[]).unwrap();
    let manager = child.the_poa_manager();
    assert_eq!(manager.state(), ManagerState::Holding);

    let servant = echo_servant(&Tally::new());
    child.activate_object(servant.clone()).unwrap();
    let echo_ref = child.servant_to_reference(&servant).unwrap();

    let parked = {
        let echo_ref = echo_ref.clone();
        tokio::spawn(async move { echo(&echo_ref, "parked").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!parked.is_finished());

    manager.activate().unwrap();
    assert_eq!(parked.await.unwrap().unwrap(), "parked");

    manager.discard_requests(false).await.unwrap();
    assert_eq!(
        system_kind(echo(&echo_ref, "dropped").await),
        SystemExceptionKind::Transient
    );

    manager.deactivate(false, true).await.unwrap();
    assert_eq!(manager.state(), ManagerState::Inactive);
    assert_eq!(
        system_kind(echo(&echo_ref, "refused").await),
        SystemExceptionKind::ObjAdapter
    );
    // an inactive manager cannot be brought back
    assert!(manager.activate().is_err());

    orb.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_calls_after_shutdown_fail() {
    init_logging();

    let orb = Orb::new(config("colloc-after-shutdown")).unwrap();
    orb.root_poa().the_poa_manager().activate().unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    orb.root_poa().activate_object(servant.clone()).unwrap();
    let echo_ref = orb.root_poa().servant_to_reference(&servant).unwrap();
    assert_eq!(echo(&echo_ref, "before").await.unwrap(), "before");

    orb.shutdown(true).await.unwrap();
    assert!(orb.is_shut_down());
    assert_eq!(tally.finalized(), 1);
    assert_eq!(
        system_kind(echo(&echo_ref, "after").await),
        SystemExceptionKind::BadInvOrder
    );
}
