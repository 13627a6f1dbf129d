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

//! End-to-end tests for the WebSocket transports and the monitor endpoint

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use telbridge_service::{BridgeServer, ServerConfig, Target, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

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

/// Read frames until a binary payload arrives, answering nothing else
async fn next_binary<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> Bytes
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Binary(data) => return data,
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn websocket_relays_to_default_target() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket).with_default_target(target_for(upstream)),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"hello")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"hello");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn query_parameter_selects_target() {
    let upstream = spawn_echo_server().await;
    let server = start_server(ServerConfig::new(Transport::Websocket)).await;

    let url = format!(
        "ws://{}/ws?target={}:{}",
        server.bind_address(),
        upstream.ip(),
        upstream.port()
    );
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"routed")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"routed");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn path_mapping_selects_target() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket).with_path_mapping("/game", target_for(upstream)),
    )
    .await;

    let url = format!("ws://{}/game", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"mapped")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"mapped");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn subpath_selects_target() {
    let upstream = spawn_echo_server().await;
    let server = start_server(ServerConfig::new(Transport::Websocket)).await;

    let url = format!(
        "ws://{}/ws/{}/{}",
        server.bind_address(),
        upstream.ip(),
        upstream.port()
    );
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"subpath")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"subpath");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_target_closes_with_reason() {
    let server = start_server(ServerConfig::new(Transport::Websocket)).await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    match ws.next().await.unwrap().unwrap() {
        Message::Close(Some(frame)) => {
            assert_eq!(frame.reason.as_str(), "no target specified");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn ws_telnet_refuses_negotiation() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::WsTelnet).with_default_target(target_for(upstream)),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(&[
        255, 253, 1, b'a', b'b', b'c',
    ])))
    .await
    .unwrap();

    // the refusal comes straight back, the payload round-trips the echo
    assert_eq!(&next_binary(&mut ws).await[..], &[255, 252, 1]);
    assert_eq!(&next_binary(&mut ws).await[..], b"abc");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn disallowed_origin_rejected() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket)
            .with_default_target(target_for(upstream))
            .with_allow_origins(vec!["https://play.example.com".to_string()]),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        header::ORIGIN,
        "https://evil.example.com".parse().unwrap(),
    );
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn allowed_origin_accepted() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket)
            .with_default_target(target_for(upstream))
            .with_allow_origins(vec!["https://play.example.com".to_string()]),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        header::ORIGIN,
        "https://play.example.com".parse().unwrap(),
    );
    let (mut ws, _) = connect_async(request).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"welcome")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"welcome");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn server_pings_on_heartbeat_interval() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket)
            .with_default_target(target_for(upstream))
            .with_heartbeat(Duration::from_millis(100), Duration::from_secs(5)),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();

    let ping = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Message::Ping(_) = ws.next().await.unwrap().unwrap() {
                break;
            }
        }
    })
    .await;
    assert!(ping.is_ok(), "no ping within two seconds");

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn monitor_reports_active_connections() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket)
            .with_default_target(target_for(upstream))
            .with_monitor("/monitor"),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    ws.send(Message::Binary(Bytes::from_static(b"busy")))
        .await
        .unwrap();
    assert_eq!(&next_binary(&mut ws).await[..], b"busy");

    let mut http = TcpStream::connect(server.bind_address()).await.unwrap();
    http.write_all(b"GET /monitor HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    http.read_to_end(&mut raw).await.unwrap();
    let response = String::from_utf8(raw).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "got: {response}");
    assert!(response.contains("Content-Type: application/json"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(snapshot["connections"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["connections"][0]["bytes_in"], 4);
    assert!(snapshot["connections"][0]["duration_s"].is_u64());
    assert_eq!(snapshot["targets"][0]["host"], "127.0.0.1");
    assert_eq!(snapshot["targets"][0]["active_count"], 1);

    // the monitor request never occupied a slot
    assert_eq!(server.connection_count(), 1);

    ws.close(None).await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn monitor_disabled_path_is_not_served() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket).with_default_target(target_for(upstream)),
    )
    .await;

    let mut http = TcpStream::connect(server.bind_address()).await.unwrap();
    http.write_all(b"GET /monitor HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    http.read_to_end(&mut raw).await.unwrap();
    let response = String::from_utf8_lossy(&raw);
    assert!(!response.starts_with("HTTP/1.1 200"), "got: {response}");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_websocket_clients() {
    let upstream = spawn_echo_server().await;
    let server = start_server(
        ServerConfig::new(Transport::Websocket)
            .with_default_target(target_for(upstream))
            .with_shutdown_timeout(Duration::from_secs(5)),
    )
    .await;

    let url = format!("ws://{}/ws", server.bind_address());
    let (mut ws, _) = connect_async(url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    server.shutdown().await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    assert_eq!(frame.reason.as_str(), "server shutting down");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "no close within two seconds");
    assert_eq!(server.connection_count(), 0);
}
