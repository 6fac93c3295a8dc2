//! Integration tests for the ident responder over loopback sockets

use rustidentd_core::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn start_server(
    config: Config,
    registry: Arc<dyn ConnectionRegistry>,
) -> (IdentdServer, SocketAddr) {
    let server = IdentdServer::new(
        config.into_shared(),
        registry,
        Arc::new(FixedSystemInfo::new("linux", "account")),
    );
    server.start_on(loopback()).await.unwrap();
    let addr = server.local_addr().await.unwrap();
    (server, addr)
}

async fn exchange(addr: SocketAddr, query: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(query).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn wait_for_clients(server: &IdentdServer, expected: usize) {
    for _ in 0..200 {
        if server.client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} clients, found {}", expected, server.client_count());
}

#[tokio::test]
async fn test_no_user_for_unknown_port() {
    let (server, addr) = start_server(Config::default(), Arc::new(ActiveConnections::new())).await;

    let response = exchange(addr, b"6667,54321\r\n").await;
    assert_eq!(response, "6667 , 54321 : ERROR : NO-USER\r\n");

    server.stop_server().await;
}

#[tokio::test]
async fn test_user_id_for_registered_connection() {
    let registry = Arc::new(ActiveConnections::new());
    registry.add(Uuid::new_v4(), ActiveConnection::new(6667, "alice", "alice_user"));

    let mut config = Config::default();
    config.general.use_nickname = true;
    let (server, addr) = start_server(config, registry.clone()).await;

    let response = exchange(addr, b"6667, 54321\r\n").await;
    assert_eq!(response, "6667 , 54321 : USERID : UNIX : alice\r\n");

    let response = exchange(addr, b"6668, 54321\r\n").await;
    assert_eq!(response, "6668 , 54321 : ERROR : NO-USER\r\n");

    server.stop_server().await;
}

#[tokio::test]
async fn test_malformed_queries() {
    let (server, addr) = start_server(Config::default(), Arc::new(NoConnections)).await;

    assert_eq!(exchange(addr, b"abc\r\n").await, "abc : ERROR : X-INVALID-INPUT\r\n");
    assert_eq!(exchange(addr, b"0,1\r\n").await, "0 , 1 : ERROR : INVALID-PORT\r\n");
    assert_eq!(exchange(addr, b"70000,1\n").await, "70000 , 1 : ERROR : INVALID-PORT\r\n");

    server.stop_server().await;
}

#[tokio::test]
async fn test_query_without_terminator_is_answered_at_eof() {
    let (server, addr) = start_server(Config::default(), Arc::new(NoConnections)).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"113, 6667").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert_eq!(response, "113 , 6667 : ERROR : NO-USER\r\n");

    server.stop_server().await;
}

#[tokio::test]
async fn test_lookup_against_server() {
    let registry = Arc::new(ActiveConnections::new());
    registry.add(Uuid::new_v4(), ActiveConnection::new(40000, "bob", "bob_user"));

    let mut config = Config::default();
    config.general.use_username = true;
    let (server, addr) = start_server(config, registry).await;

    let lookup = IdentLookup::new(Duration::from_secs(5));
    let response = lookup.query(addr, 40000, 6667).await.unwrap();
    assert_eq!(
        response,
        IdentResponse::UserId {
            os: "UNIX".to_string(),
            user: "bob_user".to_string(),
        }
    );

    let response = lookup.query(addr, 40001, 6667).await.unwrap();
    assert_eq!(response, IdentResponse::Error("NO-USER".to_string()));

    server.stop_server().await;
}

#[tokio::test]
async fn test_stop_closes_waiting_clients() {
    let (server, addr) = start_server(Config::default(), Arc::new(NoConnections)).await;

    let mut waiting = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&server, 1).await;

    server.stop_server().await;
    assert!(!server.is_running().await);
    assert_eq!(server.client_count(), 0);

    let mut response = Vec::new();
    let _ = waiting.read_to_end(&mut response).await;
    assert!(response.is_empty());

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = Config::default();
    config.server.max_connections = 1;
    let (server, addr) = start_server(config, Arc::new(NoConnections)).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&server, 1).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut rejected = Vec::new();
    let _ = second.read_to_end(&mut rejected).await;
    assert!(rejected.is_empty());

    first.write_all(b"1,2\r\n").await.unwrap();
    let mut response = String::new();
    first.read_to_string(&mut response).await.unwrap();
    assert_eq!(response, "1 , 2 : ERROR : NO-USER\r\n");

    wait_for_clients(&server, 0).await;
    assert_eq!(exchange(addr, b"3,4\r\n").await, "3 , 4 : ERROR : NO-USER\r\n");

    server.stop_server().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let (server, addr) = start_server(Config::default(), Arc::new(NoConnections)).await;
    server.stop_server().await;

    server.start_on(addr).await.unwrap();
    assert_eq!(server.bind_attempts(), 2);
    assert_eq!(exchange(addr, b"5,6\r\n").await, "5 , 6 : ERROR : NO-USER\r\n");

    server.stop_server().await;
}
