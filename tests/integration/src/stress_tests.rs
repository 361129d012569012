//! Stress Tests - Concurrency at Scale
//!
//! These tests run many callers against one server at once:
//! - several client ORBs multiplexing calls over their connections
//! - objects activated and deactivated while being called
//! - oneway floods interleaved with two-way calls

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use futures::future::join_all;
use matecorba::{Environment, Exception, Orb, SystemExceptionKind};
use tokio::sync::Barrier;

const CLIENTS: usize = 4;
const TASKS_PER_CLIENT: usize = 8;
const CALLS_PER_TASK: usize = 25;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_clients_many_calls() {
    init_logging();

    let server = start_server(config("stress-server")).await;
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let ior = server.object_to_string(&local).unwrap();

    let clients: Vec<Orb> = (0..CLIENTS)
        .map(|i| Orb::new(config(&format!("stress-client-{}", i))).unwrap())
        .collect();
    let barrier = Arc::new(Barrier::new(CLIENTS * TASKS_PER_CLIENT));
    let failures = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for (c, client) in clients.iter().enumerate() {
        let echo_ref = client.string_to_object(&ior).unwrap();
        // open the connection before the herd arrives
        assert!(!echo_ref.non_existent().await.unwrap());
        for t in 0..TASKS_PER_CLIENT {
            let echo_ref = echo_ref.clone();
            let barrier = barrier.clone();
            let failures = failures.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                for n in 0..CALLS_PER_TASK {
                    let text = format!("client {} task {} call {}", c, t, n);
                    match echo(&echo_ref, &text).await {
                        Ok(reply) if reply == text => {}
                        _ => {
                            failures.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }));
        }
    }
    for handle in join_all(handles).await {
        handle.unwrap();
    }
    let total = CLIENTS * TASKS_PER_CLIENT * CALLS_PER_TASK;
    println!("{} calls in {:?}", total, start.elapsed());

    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(tally.calls(), total);
    for client in &clients {
        // calls from one ORB share a single connection
        assert_eq!(client.connection_count(), 1);
    }
    let stats = server.server_stats().unwrap();
    assert!(stats.requests_received >= total as u64);
    assert_eq!(stats.connections_accepted, CLIENTS as u64);

    for client in clients {
        client.shutdown(true).await.unwrap();
    }
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_activation_churn_under_load() {
    init_logging();

    let server = start_server(config("churn-server")).await;
    let client = Orb::new(config("churn-client")).unwrap();
    let poa = server.root_poa();

    const ROUNDS: usize = 20;
    let tally = Tally::new();
    let unexpected = Arc::new(AtomicUsize::new(0));
    let served = Arc::new(AtomicUsize::new(0));

    for round in 0..ROUNDS {
        let servant = echo_servant(&tally);
        let oid = poa.activate_object(servant.clone()).unwrap();
        let local = poa.servant_to_reference(&servant).unwrap();
        let remote = remote_view(&server, &client, &local);

        let callers: Vec<_> = (0..4)
            .map(|i| {
                let remote = remote.clone();
                let unexpected = unexpected.clone();
                let served = served.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        match pause(&remote, 2).await {
                            Ok(_) => {
                                served.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(Exception::System(ex))
                                if ex.kind == SystemExceptionKind::ObjectNotExist => {}
                            Err(other) => {
                                eprintln!("round {} caller {}: {:?}", round, i, other);
                                unexpected.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(5)).await;
        poa.deactivate_object(&oid).unwrap();
        for caller in join_all(callers).await {
            caller.unwrap();
        }
        poa.wait_for_deactivation(&oid).await;
    }

    assert_eq!(unexpected.load(Ordering::SeqCst), 0);
    // every servant was finalized exactly once, after its last call
    assert_eq!(tally.finalized(), ROUNDS);
    assert_eq!(tally.active.load(Ordering::SeqCst), 0);
    println!("{} calls served across {} activations", served.load(Ordering::SeqCst), ROUNDS);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oneway_flood_with_twoway_calls() {
    init_logging();

    let server = start_server(config("flood-server")).await;
    let client = Orb::new(config("flood-client")).unwrap();
    let tally = Tally::new();
    let servant = echo_servant(&tally);
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let remote = remote_view(&server, &client, &local);

    const PINGS: usize = 200;
    let mut env = Environment::new();
    for i in 0..PINGS {
        remote.send_oneway(&ping_op(), &[], &mut env).await;
        assert!(!env.is_exception());
        if i % 50 == 0 {
            assert_eq!(echo(&remote, "between").await.unwrap(), "between");
        }
    }

    // four echo calls plus every ping
    assert!(eventually(Duration::from_secs(10), || tally.calls() == PINGS + 4).await);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}
