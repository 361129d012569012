//! Remote Invocation Tests
//!
//! A client ORB calls objects served by a second ORB over loopback IIOP:
//! - results, out and inout arguments
//! - user and system exceptions crossing the wire
//! - oneway requests
//! - per-reference timeouts

mod common;

use std::time::Duration;

use common::*;
use matecorba::{
    Environment, ExceptionMajor, InvocationPolicy, Orb, Policy, SystemExceptionKind, Value,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_echo() {
    init_logging();

    let server = start_server(config("remote-echo-server")).await;
    let client = Orb::new(config("remote-echo-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    let poa = server.root_poa();
    poa.activate_object(servant.clone()).unwrap();
    let local = poa.servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    assert_eq!(echo(&echo_ref, "Hello, MateCORBA!").await.unwrap(), "Hello, MateCORBA!");
    assert_eq!(echo(&echo_ref, "").await.unwrap(), "");
    assert_eq!(tally.calls(), 2);

    assert!(echo_ref.is_a(ECHO_REPO_ID).await.unwrap());
    assert!(echo_ref.is_a("IDL:omg.org/CORBA/Object:1.0").await.unwrap());
    assert!(!echo_ref.is_a("IDL:Other/Thing:1.0").await.unwrap());
    assert!(!echo_ref.non_existent().await.unwrap());
    assert_eq!(client.connection_count(), 1);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_out_and_inout_arguments() {
    init_logging();

    let server = start_server(config("remote-out-server")).await;
    let client = Orb::new(config("remote-out-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let split_ref = remote_view(&server, &client, &local);

    let mut env = Environment::new();
    let reply = split_ref
        .invoke(
            &split_op(),
            &[Value::from("three little words"), Value::from(10u32)],
            &mut env,
        )
        .await
        .unwrap();
    assert_eq!(reply.result, Value::Null);
    assert_eq!(reply.out_args.len(), 2);
    assert_eq!(reply.out_args[0].as_str(), Some("three"));
    assert_eq!(reply.out_args[1].as_u32(), Some(13));

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_user_exception() {
    init_logging();

    let server = start_server(config("remote-user-ex-server")).await;
    let client = Orb::new(config("remote-user-ex-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let mut env = Environment::new();
    let reply = echo_ref
        .invoke(&refuse_op(), &[Value::from("closed for lunch")], &mut env)
        .await;
    assert!(reply.is_none());
    assert_eq!(env.major(), ExceptionMajor::UserException);
    let ex = env.user_exception().unwrap();
    assert_eq!(ex.repo_id(), REFUSED_REPO_ID);
    assert_eq!(ex.member("reason").and_then(Value::as_str), Some("closed for lunch"));

    // the environment refuses reuse until cleared
    assert!(echo_ref
        .invoke(&echo_op(), &[Value::from("again")], &mut env)
        .await
        .is_none());
    assert_eq!(env.exception_id().as_deref(), Some(REFUSED_REPO_ID));
    env.clear();
    assert!(echo_ref
        .invoke(&echo_op(), &[Value::from("again")], &mut env)
        .await
        .is_some());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_system_exceptions() {
    init_logging();

    let server = start_server(config("remote-sys-ex-server")).await;
    let client = Orb::new(config("remote-sys-ex-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    let oid = server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let mut env = Environment::new();
    assert!(echo_ref.invoke(&missing_op(), &[], &mut env).await.is_none());
    assert_eq!(env.major(), ExceptionMajor::SystemException);
    assert_eq!(env.system_exception().unwrap().kind, SystemExceptionKind::BadOperation);
    env.clear();

    assert!(echo_ref.invoke(&unimplemented_op(), &[], &mut env).await.is_none());
    assert_eq!(env.system_exception().unwrap().kind, SystemExceptionKind::NoImplement);
    env.clear();

    // wrong argument count never reaches the server
    assert!(echo_ref.invoke(&echo_op(), &[], &mut env).await.is_none());
    assert_eq!(env.system_exception().unwrap().kind, SystemExceptionKind::BadParam);
    env.clear();
    assert!(echo_ref
        .invoke(&echo_op(), &[Value::from(7u32)], &mut env)
        .await
        .is_none());
    assert_eq!(env.system_exception().unwrap().kind, SystemExceptionKind::BadParam);
    assert_eq!(tally.calls(), 0);

    server.root_poa().deactivate_object(&oid).unwrap();
    assert_eq!(
        system_kind(echo(&echo_ref, "gone?").await),
        SystemExceptionKind::ObjectNotExist
    );
    assert!(echo_ref.non_existent().await.unwrap());

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_oneway() {
    init_logging();

    let server = start_server(config("remote-oneway-server")).await;
    let client = Orb::new(config("remote-oneway-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let mut env = Environment::new();
    for _ in 0..5 {
        echo_ref.send_oneway(&ping_op(), &[], &mut env).await;
        assert!(!env.is_exception());
    }
    assert!(eventually(Duration::from_secs(5), || tally.calls() == 5).await);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_fails_only_that_request() {
    init_logging();

    let server = start_server(config("remote-timeout-server")).await;
    let client = Orb::new(config("remote-timeout-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    echo_ref
        .set_policy(Policy::Invocation(
            InvocationPolicy::default().with_timeout(Duration::from_millis(50)),
        ))
        .unwrap();
    assert_eq!(
        system_kind(pause(&echo_ref, 500).await),
        SystemExceptionKind::Timeout
    );

    // the late reply is dropped and the connection stays usable
    echo_ref
        .set_policy(Policy::Invocation(InvocationPolicy::default()))
        .unwrap();
    assert_eq!(echo(&echo_ref, "still here").await.unwrap(), "still here");
    assert_eq!(client.connection_count(), 1);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_blocking_invoke_from_plain_thread() {
    init_logging();

    let server = start_server(config("remote-blocking-server")).await;
    let client = Orb::new(config("remote-blocking-client")).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let result = tokio::task::spawn_blocking(move || {
        let mut env = Environment::new();
        echo_ref
            .invoke_blocking(&echo_op(), &[Value::from("sync")], &mut env)
            .map(|reply| reply.result)
    })
    .await
    .unwrap();
    assert_eq!(result.as_ref().and_then(Value::as_str), Some("sync"));

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}
