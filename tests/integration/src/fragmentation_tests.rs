//! Fragmentation Tests - Large Messages and Protocol Versions
//!
//! These tests push large arguments and results through the ORB:
//! - requests and replies split into GIOP 1.1 and 1.2 fragments
//! - GIOP 1.0 peers, which never fragment
//! - mixed client and server versions
//! - the receive size limit

mod common;

use std::time::Instant;

use common::*;
use futures::future::join_all;
use matecorba::{Orb, OrbConfig, SystemExceptionKind, Version};

/// Deterministic text of `len` characters
fn pattern(len: usize) -> String {
    (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
}

/// Serve an echo object under `server_config` and echo `len` characters
/// through a client using `client_config`
async fn large_echo(server_config: OrbConfig, client_config: OrbConfig, len: usize) {
    let server = start_server(server_config).await;
    let client = Orb::new(client_config).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let payload = pattern(len);
    let start = Instant::now();
    let result = echo(&echo_ref, &payload).await.unwrap();
    println!(
        "echoed {} characters (server {:?}, client {:?}) in {:?}",
        len,
        server.config().giop_version,
        client.config().giop_version,
        start.elapsed()
    );
    assert_eq!(result.len(), payload.len());
    assert_eq!(result, payload);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_giop_1_2_fragmented_request_and_reply() {
    init_logging();
    large_echo(
        config("frag-12-server")
            .with_giop_version(Version::V1_2)
            .with_max_fragment_size(256),
        config("frag-12-client")
            .with_giop_version(Version::V1_2)
            .with_max_fragment_size(256),
        100_000,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_giop_1_1_fragmented_request_and_reply() {
    init_logging();
    large_echo(
        config("frag-11-server")
            .with_giop_version(Version::V1_1)
            .with_max_fragment_size(512),
        config("frag-11-client")
            .with_giop_version(Version::V1_1)
            .with_max_fragment_size(512),
        50_000,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_giop_1_0_sends_whole_messages() {
    init_logging();
    large_echo(
        config("frag-10-server")
            .with_giop_version(Version::V1_0)
            .with_max_fragment_size(256),
        config("frag-10-client")
            .with_giop_version(Version::V1_0)
            .with_max_fragment_size(256),
        20_000,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_old_client_against_new_server() {
    init_logging();
    large_echo(
        config("frag-mixed-server").with_giop_version(Version::V1_2),
        config("frag-mixed-client")
            .with_giop_version(Version::V1_0)
            .with_max_fragment_size(256),
        10_000,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_client_against_old_server() {
    init_logging();
    // the profile advertises 1.0, so the client downgrades its requests
    large_echo(
        config("frag-down-server").with_giop_version(Version::V1_0),
        config("frag-down-client")
            .with_giop_version(Version::V1_2)
            .with_max_fragment_size(256),
        10_000,
    )
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fragmented_calls_share_a_connection() {
    init_logging();

    let server = start_server(
        config("frag-concurrent-server").with_max_fragment_size(128),
    )
    .await;
    let client = Orb::new(config("frag-concurrent-client").with_max_fragment_size(128)).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    let calls = (0..16).map(|i| {
        let echo_ref = echo_ref.clone();
        async move {
            let payload = format!("{}:{}", i, pattern(4_000 + i * 97));
            let result = echo(&echo_ref, &payload).await.unwrap();
            assert_eq!(result, payload);
        }
    });
    join_all(calls).await;
    assert_eq!(client.connection_count(), 1);

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_request_is_refused() {
    init_logging();

    let server = start_server(config("frag-limit-server").with_max_message_size(16 * 1024)).await;
    let client = Orb::new(config("frag-limit-client").with_max_fragment_size(1024)).unwrap();
    let servant = echo_servant(&Tally::new());
    server.root_poa().activate_object(servant.clone()).unwrap();
    let local = server.root_poa().servant_to_reference(&servant).unwrap();
    let echo_ref = remote_view(&server, &client, &local);

    assert_eq!(
        system_kind(echo(&echo_ref, &pattern(64 * 1024)).await),
        SystemExceptionKind::ImpLimit
    );
    // smaller requests still go through on the same connection
    assert_eq!(echo(&echo_ref, "small").await.unwrap(), "small");

    client.shutdown(true).await.unwrap();
    server.shutdown(true).await.unwrap();
}
