//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! End-to-end tests for the raw TCP and Telnet transports

use std::net::SocketAddr;
use std::time::Duration;
use telbridge_service::{BridgeServer, ServerConfig, Target, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Spawn a TCP server that echoes everything back, per connection
async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buffer = [0u8; 4096];
                loop {
                    match socket.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(count) => {
                            if socket.write_all(&buffer[..count]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Spawn a TCP server that accepts connections and never reads from them
async fn spawn_stalled_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            held.push(socket);
        }
    });
    addr
}

fn target_for(addr: SocketAddr) -> Target {
    Target::new(addr.ip().to_string(), addr.port())
}

async fn start_server(config: ServerConfig) -> BridgeServer {
    let server = BridgeServer::new(config.with_bind("127.0.0.1", 0))
        .await
        .unwrap();
    server.start().await.unwrap();
    server
}

#[tokio::test]
async fn tcp_raw_relays_both_directions() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw).with_default_target(target_for(upstream)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    client.write_all(b"hello upstream").await.unwrap();
    let mut echoed = [0u8; 14];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello upstream");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    drop(client);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn telnet_raw_refuses_negotiation_and_relays_payload() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TelnetRaw).with_default_target(target_for(upstream)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    // IAC DO ECHO followed by payload; the option is refused locally and
    // never reaches the echo upstream
    client.write_all(&[255, 253, 1]).await.unwrap();
    client.write_all(b"abc").await.unwrap();

    let mut received = [0u8; 6];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, &[255, 252, 1, b'a', b'b', b'c']);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn telnet_raw_unescapes_and_reescapes_iac() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TelnetRaw).with_default_target(target_for(upstream)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    // IAC IAC means a literal 0xFF byte; the echo sends 0xFF back and the
    // bridge re-escapes it on the way out
    client.write_all(&[b'x', 255, 255, b'y']).await.unwrap();

    let mut received = [0u8; 4];
    client.read_exact(&mut received).await.unwrap();
    assert_eq!(&received, &[b'x', 255, 255, b'y']);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn connection_limit_rejects_excess_clients() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_max_connections(1),
    )
    .await;

    let mut first = TcpStream::connect(server.bind_address()).await.unwrap();
    first.write_all(b"one").await.unwrap();
    let mut echoed = [0u8; 3];
    first.read_exact(&mut echoed).await.unwrap();

    let mut second = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut rejection = Vec::new();
    second.read_to_end(&mut rejection).await.unwrap();
    assert_eq!(rejection, b"[connection limit reached]\r\n");

    // the first connection is unaffected
    first.write_all(b"two").await.unwrap();
    first.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"two");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn limit_slot_freed_after_disconnect() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_max_connections(1),
    )
    .await;

    let first = TcpStream::connect(server.bind_address()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = TcpStream::connect(server.bind_address()).await.unwrap();
    second.write_all(b"ok").await.unwrap();
    let mut echoed = [0u8; 2];
    second.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ok");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn idle_timeout_closes_connection() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_idle_timeout(Duration::from_millis(300)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"[idle timeout]\r\n");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn steady_traffic_is_never_idle() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_idle_timeout(Duration::from_millis(300)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut echoed = [0u8; 4];
    // trickle well under the idle interval, across several idle windows
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        client.write_all(b"tick").await.unwrap();
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"tick");
    }
    assert_eq!(server.connection_count(), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn stalled_upstream_write_still_times_out() {
    let upstream = spawn_stalled_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_idle_timeout(Duration::from_millis(300)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    // flood until the relay parks on the upstream write, then keep pushing
    let flood = tokio::spawn(async move {
        let chunk = vec![0u8; 64 * 1024];
        while client.write_all(&chunk).await.is_ok() {}
    });

    let mut released = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if server.connection_count() == 0 {
            released = true;
            break;
        }
    }
    assert!(released, "stalled connection never timed out");

    flood.abort();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_aborts_stalled_connections() {
    let upstream = spawn_stalled_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_idle_timeout(Duration::from_secs(60))
            .with_shutdown_timeout(Duration::from_millis(500)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    let flood = tokio::spawn(async move {
        let chunk = vec![0u8; 64 * 1024];
        while client.write_all(&chunk).await.is_ok() {}
    });

    // let the relay fill the socket buffers and park on the upstream write
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connection_count(), 1);

    server.shutdown().await.unwrap();
    assert_eq!(server.connection_count(), 0);

    flood.abort();
}

#[tokio::test]
async fn missing_default_target_rejected() {
    let server = start_server(ServerConfig::new(Transport::TcpRaw)).await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"[no target specified]\r\n");
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_rejected() {
    // bind then drop to get a port with no listener
    let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = vacant.local_addr().unwrap();
    drop(vacant);

    let server = start_server(
        ServerConfig::new(Transport::TcpRaw).with_default_target(target_for(addr)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    let text = String::from_utf8(received).unwrap();
    assert!(text.contains("unreachable"), "got: {text}");
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_notifies_connected_clients() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::TcpRaw)
            .with_default_target(target_for(upstream))
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .await;

    let mut client = TcpStream::connect(server.bind_address()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    server.shutdown().await.unwrap();

    let mut received = Vec::new();
    client.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"[server shutting down]\r\n");
    assert_eq!(server.connection_count(), 0);
}
