//! Daemon lifecycle and wire-level tests
//!
//! Restarts, lazy reconnects, and clients speaking the raw protocol.

mod integration_harness;

use integration_harness::TestDaemon;
use std::time::Duration;
use teebroker_client::ResultKind;
use teebroker_protocol::{Command, CommandHeader, HEADER_SIZE, ResponseHeader, ResultCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

async fn raw_exchange(
    stream: &mut UnixStream,
    header: CommandHeader,
    payload: &[u8],
) -> ResponseHeader {
    stream.write_all(&header.encode()).await.unwrap();
    stream.write_all(payload).await.unwrap();

    let mut head = [0u8; HEADER_SIZE];
    stream.read_exact(&mut head).await.unwrap();
    let response = ResponseHeader::decode(&head);

    let mut body = vec![0u8; response.data_size as usize];
    stream.read_exact(&mut body).await.unwrap();
    response
}

#[tokio::test]
async fn test_token_survives_restart() {
    let daemon = TestDaemon::start().await;
    daemon.client().store_auth_token(b"ABCD1234").await.unwrap();

    let daemon = daemon.restart().await;
    assert_eq!(daemon.client().read_auth_token().await.unwrap(), b"ABCD1234");
}

#[tokio::test]
async fn test_client_reconnects_after_daemon_restart() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.client();
    client.store_auth_token(b"ABCD1234").await.unwrap();

    let (dir, config) = daemon.stop().await;
    // Let the connection task see the shutdown and hang up
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Daemon gone: the failure is a transport error, not a protocol one
    let err = client.read_auth_token().await.unwrap_err();
    assert_eq!(err.kind(), ResultKind::TransportError);
    assert!(!client.is_connection_alive());

    let _daemon = TestDaemon::resume(dir, config).await;

    // Same client, fresh connection and sequence
    assert_eq!(client.read_auth_token().await.unwrap(), b"ABCD1234");
    assert_eq!(client.last_command_id(), 1);
}

#[tokio::test]
async fn test_raw_ids_echoed_across_gaps() {
    let daemon = TestDaemon::start().await;
    let mut stream = UnixStream::connect(daemon.socket()).await.unwrap();

    let write = CommandHeader::new(5, Command::WriteAuthToken.code(), 4);
    let response = raw_exchange(&mut stream, write, b"abcd").await;
    assert_eq!(response.id, 5);
    assert_eq!(response.result, ResultCode::Ok.code());

    // Skipped ids are answered normally
    let read = CommandHeader::new(9, Command::ReadAuthToken.code(), 0);
    let response = raw_exchange(&mut stream, read, b"").await;
    assert_eq!(response.id, 9);
    assert_eq!(response.data_size, 4);
}

#[tokio::test]
async fn test_raw_unknown_command() {
    let daemon = TestDaemon::start().await;
    let mut stream = UnixStream::connect(daemon.socket()).await.unwrap();

    let response = raw_exchange(&mut stream, CommandHeader::new(1, 42, 0), b"").await;
    assert_eq!(response.id, 1);
    assert_eq!(response.result, ResultCode::UnknownCommand.code());
}

#[tokio::test]
async fn test_raw_oversized_command_closes_connection() {
    let daemon = TestDaemon::start().await;
    let mut stream = UnixStream::connect(daemon.socket()).await.unwrap();

    let header = CommandHeader::new(3, Command::WriteAuthToken.code(), u32::MAX);
    stream.write_all(&header.encode()).await.unwrap();

    let mut head = [0u8; HEADER_SIZE];
    stream.read_exact(&mut head).await.unwrap();
    let response = ResponseHeader::decode(&head);
    assert_eq!(response.id, 3);
    assert_eq!(response.result, ResultCode::PayloadTooLarge.code());

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("daemon kept the connection open");
    assert_eq!(read.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_clients() {
    let daemon = TestDaemon::start().await;

    let mut tasks = Vec::new();
    for i in 0..4u8 {
        let mut client = daemon.client();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                client.store_auth_token(&[i; 16]).await.unwrap();
                let token = client.read_auth_token().await.unwrap();
                // Some writer's whole token, never a mix
                assert_eq!(token.len(), 16);
                assert!(token.iter().all(|b| *b == token[0]));
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
}
